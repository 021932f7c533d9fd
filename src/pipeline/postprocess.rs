//! Post-processing: deterministic cleanup of the reassembled LaTeX document.
//!
//! After table and figure chunks have been replaced by delimited model
//! output, the document is still LaTeX. This module turns it into plain text
//! that reads well line by line.
//!
//! ## Rule Order
//!
//! Layout macros and hyperlinks are rewritten on the raw source first, while
//! their arguments are still intact. The LaTeX→text pass runs next, and the
//! whitespace rules run last so they see the final line structure.

use crate::pipeline::latex::{self, Node, NodeKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to the assembled document.
///
/// Rules (applied in order):
/// 1. Remove `\urlstyle{…}` and `\graphicspath{…}`
/// 2. Rewrite `\href{url}{text}` as `text (url) `
/// 3. Normalise line endings (CRLF → LF)
/// 4. Render the remaining LaTeX as plain text
/// 5. Strip leading horizontal whitespace on every line
/// 6. Trim trailing whitespace per line
/// 7. Collapse runs of blank lines to a single blank line
/// 8. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 9. Ensure the text ends with exactly one newline
pub fn clean_text(input: &str) -> String {
    let s = strip_layout_macros(input);
    let s = rewrite_hyperlinks(&s);
    let s = normalise_line_endings(&s);
    let s = latex_to_text(&s);
    let s = strip_leading_whitespace(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Remove layout macros ─────────────────────────────────────────────

static RE_URLSTYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\urlstyle\s*\{[^{}]*\}").unwrap());

// One level of nesting covers `\graphicspath{{./images/}}`.
static RE_GRAPHICSPATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\graphicspath\s*\{(?:[^{}]|\{[^{}]*\})*\}").unwrap());

fn strip_layout_macros(input: &str) -> String {
    let s = RE_URLSTYLE.replace_all(input, "");
    RE_GRAPHICSPATH.replace_all(&s, "").into_owned()
}

// ── Rule 2: Rewrite hyperlinks ───────────────────────────────────────────────

static RE_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\href\s*\{([^{}]*)\}\s*\{([^{}]*)\}").unwrap());

fn rewrite_hyperlinks(input: &str) -> String {
    RE_HREF.replace_all(input, "${2} (${1}) ").into_owned()
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: LaTeX → plain text ───────────────────────────────────────────────

/// Render LaTeX markup as plain text.
///
/// Formatting macros keep their argument text, sectioning commands become
/// their own paragraph, preamble and layout macros disappear, and common
/// math symbols map to Unicode. Unknown macros are dropped, but any `{…}`
/// that follows them is kept as ordinary text.
pub fn latex_to_text(input: &str) -> String {
    let nodes = latex::parse(input);
    let mut out = String::with_capacity(input.len());
    render_nodes(input, &nodes, &mut out);
    out
}

fn render_nodes(src: &str, nodes: &[Node], out: &mut String) {
    for node in nodes {
        render_node(src, node, out);
    }
}

fn render_node(src: &str, node: &Node, out: &mut String) {
    match &node.kind {
        NodeKind::Chars => out.push_str(&node.source(src).replace('~', " ")),
        NodeKind::Comment => {
            // Only a `%` that starts its line is a comment; elsewhere (model
            // output such as "45%") it is literal text.
            let line_start = src[..node.span.start].rfind('\n').map_or(0, |i| i + 1);
            if !src[line_start..node.span.start].trim().is_empty() {
                out.push_str(node.source(src));
            }
        }
        NodeKind::Group { children, .. } => render_nodes(src, children, out),
        NodeKind::Math { display, children } => {
            if *display {
                out.push('\n');
                render_nodes(src, children, out);
                out.push('\n');
            } else {
                render_nodes(src, children, out);
            }
        }
        NodeKind::Environment {
            name,
            children,
            body,
            ..
        } => render_environment(src, name, children, body.clone(), out),
        NodeKind::Macro { name, args, .. } => render_macro(src, name, args, out),
    }
}

fn render_environment(
    src: &str,
    name: &str,
    children: &[Node],
    body: std::ops::Range<usize>,
    out: &mut String,
) {
    match name.trim_end_matches('*') {
        "comment" => {}
        "verbatim" | "lstlisting" | "minted" => {
            out.push('\n');
            out.push_str(&src[body]);
            out.push('\n');
        }
        "equation" | "align" | "gather" | "multline" | "eqnarray" | "displaymath" => {
            out.push('\n');
            render_nodes(src, children, out);
            out.push('\n');
        }
        "abstract" => {
            out.push_str("\n\nAbstract\n\n");
            render_nodes(src, children, out);
            out.push_str("\n\n");
        }
        "thebibliography" => {
            out.push_str("\n\nReferences\n\n");
            render_nodes(src, children, out);
        }
        _ => render_nodes(src, children, out),
    }
}

fn arg_text(src: &str, args: &[Node], index: usize) -> String {
    let mut out = String::new();
    if let Some(arg) = args.get(index) {
        render_node(src, arg, &mut out);
    }
    out.trim().to_string()
}

fn render_macro(src: &str, name: &str, args: &[Node], out: &mut String) {
    match name {
        // Line and paragraph breaks.
        "\\" | "newline" | "linebreak" => out.push('\n'),
        "par" => out.push_str("\n\n"),

        // Escaped specials and spacing.
        "%" | "&" | "$" | "#" | "_" | "{" | "}" => out.push_str(name),
        " " | "," | ";" | ":" | "quad" | "qquad" | "enspace" => out.push(' '),
        "!" | "-" | "/" => {}

        "part" | "chapter" | "section" | "subsection" | "subsubsection" | "paragraph"
        | "subparagraph" | "title" => {
            out.push_str("\n\n");
            out.push_str(&arg_text(src, args, 0));
            out.push_str("\n\n");
        }
        "author" | "date" | "address" | "affiliation" | "email" | "keywords" => {
            out.push('\n');
            out.push_str(&arg_text(src, args, 0));
            out.push('\n');
        }
        "item" => out.push_str("\n  * "),

        "textbf" | "textit" | "emph" | "texttt" | "textrm" | "textsf" | "textsc" | "textup"
        | "textnormal" | "underline" | "mathrm" | "mathbf" | "mathit" | "mathcal" | "mathbb"
        | "mathsf" | "mathtt" | "boldsymbol" | "operatorname" | "text" | "mbox" | "fbox"
        | "hbox" | "hat" | "bar" | "tilde" | "vec" | "dot" | "overline" | "url" => {
            out.push_str(&arg_text(src, args, 0))
        }
        "caption" => {
            out.push('\n');
            out.push_str(&arg_text(src, args, 0));
            out.push('\n');
        }
        "footnote" => {
            out.push_str(" (");
            out.push_str(&arg_text(src, args, 0));
            out.push(')');
        }
        "href" => {
            out.push_str(&arg_text(src, args, 1));
            out.push_str(" (");
            out.push_str(&arg_text(src, args, 0));
            out.push_str(") ");
        }
        "frac" | "dfrac" | "tfrac" => {
            out.push_str(&math_operand(&arg_text(src, args, 0)));
            out.push('/');
            out.push_str(&math_operand(&arg_text(src, args, 1)));
        }
        "binom" => {
            out.push_str(&format!(
                "C({}, {})",
                arg_text(src, args, 0),
                arg_text(src, args, 1)
            ));
        }
        "sqrt" => {
            out.push('√');
            out.push_str(&math_operand(&arg_text(src, args, 0)));
        }
        "cite" | "citep" | "citet" => out.push_str("<cit.>"),
        "ref" | "eqref" | "autoref" | "cref" | "pageref" => out.push_str("<ref>"),

        _ => {
            if let Some(symbol) = symbol(name) {
                out.push_str(symbol);
            }
            // Everything else is layout or preamble: dropped with its
            // declared arguments.
        }
    }
}

/// Parenthesise compound operands of `/` and `√`.
fn math_operand(s: &str) -> String {
    let simple = s.chars().all(|c| c.is_alphanumeric() || c == '.');
    if simple && !s.is_empty() {
        s.to_string()
    } else {
        format!("({s})")
    }
}

fn symbol(name: &str) -> Option<&'static str> {
    let s = match name {
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "delta" => "δ",
        "epsilon" | "varepsilon" => "ε",
        "zeta" => "ζ",
        "eta" => "η",
        "theta" | "vartheta" => "θ",
        "iota" => "ι",
        "kappa" => "κ",
        "lambda" => "λ",
        "mu" => "μ",
        "nu" => "ν",
        "xi" => "ξ",
        "pi" => "π",
        "rho" => "ρ",
        "sigma" => "σ",
        "tau" => "τ",
        "upsilon" => "υ",
        "phi" | "varphi" => "φ",
        "chi" => "χ",
        "psi" => "ψ",
        "omega" => "ω",
        "Gamma" => "Γ",
        "Delta" => "Δ",
        "Theta" => "Θ",
        "Lambda" => "Λ",
        "Xi" => "Ξ",
        "Pi" => "Π",
        "Sigma" => "Σ",
        "Phi" => "Φ",
        "Psi" => "Ψ",
        "Omega" => "Ω",
        "times" => "×",
        "cdot" => "·",
        "div" => "÷",
        "pm" => "±",
        "mp" => "∓",
        "leq" | "le" => "≤",
        "geq" | "ge" => "≥",
        "neq" | "ne" => "≠",
        "approx" => "≈",
        "sim" => "~",
        "simeq" => "≃",
        "equiv" => "≡",
        "propto" => "∝",
        "infty" => "∞",
        "partial" => "∂",
        "nabla" => "∇",
        "sum" => "∑",
        "prod" => "∏",
        "int" => "∫",
        "in" => "∈",
        "notin" => "∉",
        "subset" => "⊂",
        "subseteq" => "⊆",
        "cup" => "∪",
        "cap" => "∩",
        "forall" => "∀",
        "exists" => "∃",
        "to" | "rightarrow" => "→",
        "leftarrow" => "←",
        "leftrightarrow" => "↔",
        "Rightarrow" => "⇒",
        "Leftarrow" => "⇐",
        "Leftrightarrow" => "⇔",
        "ldots" | "dots" => "…",
        "cdots" => "⋯",
        "circ" => "∘",
        "prime" => "′",
        "degree" => "°",
        "ell" => "ℓ",
        "textasciitilde" => "~",
        "textbackslash" => "\\",
        "S" => "§",
        "P" => "¶",
        "copyright" => "©",
        "log" => "log",
        "ln" => "ln",
        "exp" => "exp",
        "sin" => "sin",
        "cos" => "cos",
        "tan" => "tan",
        "max" => "max",
        "min" => "min",
        "lim" => "lim",
        _ => return None,
    };
    Some(s)
}

// ── Rule 5: Strip leading whitespace ─────────────────────────────────────────

static RE_LEADING_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]+").unwrap());

fn strip_leading_whitespace(input: &str) -> String {
    RE_LEADING_WS.replace_all(input, "").into_owned()
}

// ── Rule 6: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 7: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 8: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 9: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_matches('\n');
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_layout_macros() {
        let input = "\\urlstyle{same}\\graphicspath{{./images/}}Text";
        assert_eq!(strip_layout_macros(input), "Text");
    }

    #[test]
    fn test_rewrite_hyperlinks() {
        let input = "See \\href{https://example.org}{the site}.";
        assert_eq!(
            rewrite_hyperlinks(input),
            "See the site (https://example.org) ."
        );
    }

    #[test]
    fn test_sections_become_paragraphs() {
        let out = clean_text("\\section{Introduction}\nWe study \\textbf{graphs}.");
        assert_eq!(out, "Introduction\n\nWe study graphs.\n");
    }

    #[test]
    fn test_escaped_specials_become_literal() {
        assert_eq!(latex_to_text("50\\% of \\$3 \\& more"), "50% of $3 & more");
    }

    #[test]
    fn test_inline_percent_is_kept() {
        let out = clean_text("Accuracy: 45%; F1: 0.3\n% a real comment\nnext");
        assert_eq!(out, "Accuracy: 45%; F1: 0.3\n\nnext\n");
    }

    #[test]
    fn test_math_symbols() {
        assert_eq!(latex_to_text("$\\alpha \\leq \\frac{1}{2}$"), "α ≤ 1/2");
        assert_eq!(latex_to_text("$\\sqrt{x+1}$"), "√(x+1)");
    }

    #[test]
    fn test_citations_and_refs() {
        assert_eq!(
            latex_to_text("as shown \\cite{smith2020} in Fig. \\ref{fig:a}"),
            "as shown <cit.> in Fig. <ref>"
        );
    }

    #[test]
    fn test_preamble_is_dropped() {
        let input = "\\documentclass[10pt]{article}\n\\usepackage{amsmath}\n\\begin{document}\nBody\n\\end{document}";
        assert_eq!(clean_text(input), "Body\n");
    }

    #[test]
    fn test_unknown_macro_keeps_group_text() {
        assert_eq!(latex_to_text("\\foo{kept}"), "kept");
    }

    #[test]
    fn test_line_break_macro() {
        assert_eq!(clean_text("first\\\\second"), "first\nsecond\n");
    }

    #[test]
    fn test_leading_whitespace_stripped() {
        assert_eq!(clean_text("  indented\n\tline"), "indented\nline\n");
    }

    #[test]
    fn test_blank_lines_collapsed() {
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb\n");
        assert_eq!(clean_text("a\n  \n \t\n\nb"), "a\n\nb\n");
    }

    #[test]
    fn test_delimiters_survive_cleanup() {
        let input = "Intro text. \n<===TABLE START===>\nCol: 1\n<===TABLE END===>\n More text.";
        assert_eq!(
            clean_text(input),
            "Intro text.\n<===TABLE START===>\nCol: 1\n<===TABLE END===>\nMore text.\n"
        );
    }

    #[test]
    fn test_tilde_is_space() {
        assert_eq!(latex_to_text("Fig.~3"), "Fig. 3");
    }

    #[test]
    fn test_invisible_chars_removed() {
        assert_eq!(clean_text("a\u{200B}b\u{FEFF}"), "ab\n");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(clean_text(""), "\n");
    }

    #[test]
    fn test_crlf_normalised() {
        assert_eq!(clean_text("a\r\nb"), "a\nb\n");
    }
}
