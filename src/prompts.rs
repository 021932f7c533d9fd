//! Instruction templates for table and figure conversion, and the delimiters
//! that wrap converted segments in the final text.
//!
//! The output is read on refreshable Braille displays, so both prompts insist
//! on "no intro, just the result": any preamble the model adds costs the
//! reader a full line of cells.

/// Instruction prepended to the raw LaTeX of a table.
///
/// The raw table source is appended after a newline by
/// [`table_prompt`].
pub const TABLE_PROMPT: &str = r#"Your role is to prepare scientific papers for blind scientists. You need to convert tables in scientific articles for their display on Braille linear displays. Attached is a certain table in LaTeX format. You need to:
1.) Understand where the header is and where the content is.
2.) Then, for each row, output the information in the following format: <Column 1 Name>: <value for column 1 for the current row>; <Column 2 Name>: <value for column 2 for the current row>; ...; <Last Column Name>: <value for the last column for the current row>
3.) Each row of the table should be output on a separate line.
4.) Do not skip lines, replace them with 'etc.', or similar abbreviations. All information from the table must be fully preserved.
5.) If the header consists of more than one line, then the name of each column is formed from the vertical combination of all header cells for that column. The combination is made through a comma.
6.) If the header has merged cells that extend to 2 or more columns - the value of this merged cell must be added to each vertical column and not only for the first in this merge.
7.) Do not display any additional information except the result of performing the task according to the described algorithm. It is necessary to output the result immediately, otherwise, it will break the Braille monitor. NO INTROS. JUST RESULT.
8.) If first column doesn't have a name, then write values for it without colon.
9.) Remove all TeX or LaTeX syntax in the output, use only understandable to the layman math symbols and notations.

Here is the table:"#;

/// Instruction sent alongside a figure image to the vision model.
pub const IMAGE_PROMPT: &str = r#"Your role is to prepare scientific papers for blind scientists. You need to understand images in scientific articles for their text interpretation on Braille linear displays. Attached is a certain image from a scientific paper. You need to:
1.) Understand what is in front of you - a plot/graph/diagram, a photo, or a schematic.
2.) For a plot/graph/diagram, you need to provide a description of its purpose (if a description text is present), the names or meaning of each axis/dimension, and VERY IMPORTANT estimate and reproduce all the specific tabular values on which this image was created with repeated name of the metric together with each value itself.
3.) For a photo, you need to describe what is depicted.
4.) For a schematic, you need to describe all its elements and the connections between them.
5.) For other images that do not fit into any of the three aforementioned categories, you need to describe in maximum detail what is depicted as if you are describing the image to an artist who needs to reproduce it in maximum detail, and another artist-critic will then compare and look for the smallest differences.
6.) Do not skip lines, replace them with 'etc.', or similar abbreviations. All information from the image must be fully preserved.
7.) Do not display any additional intro information except the result of performing the task according to the described algorithm. It is necessary to output the result immediately, otherwise, it will break the Braille monitor. NO INTROS. JUST DESCRIPTIVE RESULT."#;

pub const TABLE_START_DELIMITER: &str = "\n<===TABLE START===>\n";
pub const TABLE_END_DELIMITER: &str = "\n<===TABLE END===>\n";
pub const IMAGE_START_DELIMITER: &str = "\n<===IMAGE START===>\n";
pub const IMAGE_END_DELIMITER: &str = "\n<===IMAGE END===>\n";

/// Build the single-turn table request: instruction, newline, raw table.
pub fn table_prompt(raw_table: &str) -> String {
    format!("{TABLE_PROMPT}\n{raw_table}")
}

/// Wrap a table description in its start/end markers.
pub fn wrap_table(description: &str) -> String {
    format!("{TABLE_START_DELIMITER}{description}{TABLE_END_DELIMITER}")
}

/// Wrap an image description in its start/end markers.
pub fn wrap_image(description: &str) -> String {
    format!("{IMAGE_START_DELIMITER}{description}{IMAGE_END_DELIMITER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_prompt_appends_source_after_instruction() {
        let p = table_prompt("\\begin{tabular}{c}1\\end{tabular}");
        assert!(p.starts_with("Your role is to prepare"));
        assert!(p.ends_with("Here is the table:\n\\begin{tabular}{c}1\\end{tabular}"));
    }

    #[test]
    fn wrap_table_matches_marker_layout() {
        assert_eq!(
            wrap_table("Col: 1"),
            "\n<===TABLE START===>\nCol: 1\n<===TABLE END===>\n"
        );
    }

    #[test]
    fn wrap_image_matches_marker_layout() {
        assert_eq!(
            wrap_image("A bar chart."),
            "\n<===IMAGE START===>\nA bar chart.\n<===IMAGE END===>\n"
        );
    }

    #[test]
    fn image_prompt_names_all_categories() {
        for word in ["plot", "photo", "schematic"] {
            assert!(IMAGE_PROMPT.contains(word), "missing {word}");
        }
    }
}
