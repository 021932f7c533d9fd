//! A small, tolerant LaTeX tokenizer producing a span-annotated syntax tree.
//!
//! This is not a TeX engine. It recognises just enough structure for the two
//! consumers in this crate:
//!
//! * [`crate::pipeline::segment`] needs exact byte spans of `tabular`-family
//!   environments and `\includegraphics` macros, plus the filename argument.
//! * [`crate::pipeline::postprocess`] renders the remaining markup to plain
//!   text.
//!
//! Node kinds: character runs, `%` comments, `{…}` groups, macros (with the
//! arguments of a fixed set of known macros attached), `\begin…\end`
//! environments, and math (`$…$`, `$$…$$`, `\(…\)`, `\[…\]`).
//!
//! Malformed input never fails here. An unclosed group, environment or math
//! span extends to the end of the input; a stray `}` or `\end{…}` becomes an
//! ordinary node. Nesting deeper than [`MAX_NESTING`] levels is not
//! tokenised: the rest of the input becomes one character run at that
//! depth. Every node's span is a byte range of the source and
//! siblings tile their parent without gaps.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Byte range in the source, including delimiters and arguments.
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Plain characters without special meaning.
    Chars,
    /// `%` to end of line (newline excluded).
    Comment,
    /// `{…}`; `inner` excludes the braces.
    Group { children: Vec<Node>, inner: Range<usize> },
    /// `\name` or a control symbol such as `\\` or `\%`.
    Macro {
        name: String,
        star: bool,
        /// Inner range of a `[…]` optional argument, if the macro takes one.
        optional: Option<Range<usize>>,
        /// Mandatory arguments, each a [`NodeKind::Group`].
        args: Vec<Node>,
    },
    /// `\begin{name}…\end{name}`.
    Environment {
        name: String,
        optional: Option<Range<usize>>,
        args: Vec<Node>,
        children: Vec<Node>,
        /// Range between the arguments and `\end{name}`.
        body: Range<usize>,
    },
    Math { display: bool, children: Vec<Node> },
}

impl Node {
    pub fn source<'a>(&self, src: &'a str) -> &'a str {
        &src[self.span.clone()]
    }
}

/// Deepest group / environment / math nesting that is tokenised.
pub const MAX_NESTING: usize = 256;

/// Environments whose bodies are never tokenised.
const VERBATIM_ENVIRONMENTS: &[&str] = &["verbatim", "verbatim*", "lstlisting", "comment", "minted"];

/// `(takes optional [..], number of mandatory {..})` for macros whose
/// arguments matter to segmentation or rendering. Unknown macros take no
/// arguments; any `{…}` after them parses as a sibling group.
fn macro_args(name: &str) -> (bool, usize) {
    match name {
        "includegraphics" | "documentclass" | "usepackage" | "caption" | "captionsetup"
        | "sqrt" | "cite" | "citep" | "citet" | "footnote" | "part" | "chapter" | "section"
        | "subsection" | "subsubsection" | "paragraph" | "subparagraph" => (true, 1),
        "item" => (true, 0),
        "label" | "ref" | "eqref" | "autoref" | "cref" | "pageref" | "url" | "textbf"
        | "textit" | "emph" | "texttt" | "textrm" | "textsf" | "textsc" | "textup"
        | "textnormal" | "underline" | "mathrm" | "mathbf" | "mathit" | "mathcal" | "mathbb"
        | "mathsf" | "mathtt" | "boldsymbol" | "operatorname" | "text" | "mbox" | "fbox"
        | "hbox" | "title" | "author" | "date" | "vspace" | "hspace" | "urlstyle"
        | "graphicspath" | "bibliographystyle" | "bibliography" | "pagestyle"
        | "thispagestyle" | "hat" | "bar" | "tilde" | "vec" | "dot" | "overline" | "cline"
        | "email" | "address" | "affiliation" | "keywords" | "end" => (false, 1),
        "href" | "frac" | "dfrac" | "tfrac" | "binom" | "setlength" => (false, 2),
        _ => (false, 0),
    }
}

/// Arguments that follow `\begin{name}` before the body starts.
fn environment_args(name: &str) -> (bool, usize) {
    match name {
        "tabular" | "array" | "longtable" | "thebibliography" | "multicols" => (true, 1),
        "tabular*" | "tabularx" | "tabulary" => (true, 2),
        "minipage" => (true, 1),
        "figure" | "figure*" | "table" | "table*" => (true, 0),
        _ => (false, 0),
    }
}

/// Parse `src` into a list of top-level nodes.
pub fn parse(src: &str) -> Vec<Node> {
    let mut parser = Parser {
        src,
        pos: 0,
        depth: 0,
    };
    parser.parse_list(Until::Eof)
}

#[derive(Clone, Copy)]
enum Until<'n> {
    Eof,
    Brace,
    Env(&'n str),
    Math(&'static str),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    /// Open `parse_list` calls.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn len(&self) -> usize {
        self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn parse_list(&mut self, until: Until<'_>) -> Vec<Node> {
        if self.depth >= MAX_NESTING {
            let start = self.pos;
            self.pos = self.len();
            return vec![Node {
                kind: NodeKind::Chars,
                span: start..self.pos,
            }];
        }

        self.depth += 1;
        let mut nodes = Vec::new();
        while self.pos < self.len() && !self.at_stop(until) {
            nodes.push(self.parse_node());
        }
        self.depth -= 1;
        nodes
    }

    fn at_stop(&self, until: Until<'_>) -> bool {
        match until {
            Until::Eof => false,
            Until::Brace => self.peek() == Some(b'}'),
            Until::Env(name) => self.end_environment_len(name).is_some(),
            Until::Math(delim) => self.rest().starts_with(delim),
        }
    }

    /// Always consumes at least one byte.
    fn parse_node(&mut self) -> Node {
        let start = self.pos;
        match self.bytes()[self.pos] {
            b'%' => {
                let end = self.rest().find('\n').map_or(self.len(), |i| self.pos + i);
                self.pos = end.max(start + 1);
                Node {
                    kind: NodeKind::Comment,
                    span: start..self.pos,
                }
            }
            b'{' => self.parse_group(),
            b'}' => {
                self.pos += 1;
                Node {
                    kind: NodeKind::Chars,
                    span: start..self.pos,
                }
            }
            b'$' => self.parse_dollar_math(),
            b'\\' => self.parse_backslash(),
            _ => {
                self.pos += 1;
                while let Some(b) = self.peek() {
                    if matches!(b, b'\\' | b'{' | b'}' | b'%' | b'$') {
                        break;
                    }
                    self.pos += 1;
                }
                Node {
                    kind: NodeKind::Chars,
                    span: start..self.pos,
                }
            }
        }
    }

    fn parse_group(&mut self) -> Node {
        let start = self.pos;
        self.pos += 1;
        let children = self.parse_list(Until::Brace);
        let inner = start + 1..self.pos;
        if self.peek() == Some(b'}') {
            self.pos += 1;
        }
        Node {
            kind: NodeKind::Group { children, inner },
            span: start..self.pos,
        }
    }

    fn parse_dollar_math(&mut self) -> Node {
        let start = self.pos;
        let delim = if self.rest().starts_with("$$") { "$$" } else { "$" };
        self.pos += delim.len();
        let children = self.parse_list(Until::Math(delim));
        if self.rest().starts_with(delim) {
            self.pos += delim.len();
        }
        Node {
            kind: NodeKind::Math {
                display: delim == "$$",
                children,
            },
            span: start..self.pos,
        }
    }

    fn parse_backslash(&mut self) -> Node {
        let start = self.pos;
        let after = start + 1;
        let Some(first) = self.src[after..].chars().next() else {
            self.pos = self.len();
            return Node {
                kind: NodeKind::Chars,
                span: start..self.pos,
            };
        };

        if !first.is_ascii_alphabetic() {
            let close = match first {
                '(' => Some("\\)"),
                '[' => Some("\\]"),
                _ => None,
            };
            self.pos = after + first.len_utf8();
            if let Some(close) = close {
                let children = self.parse_list(Until::Math(close));
                if self.rest().starts_with(close) {
                    self.pos += close.len();
                }
                return Node {
                    kind: NodeKind::Math {
                        display: first == '[',
                        children,
                    },
                    span: start..self.pos,
                };
            }
            return Node {
                kind: NodeKind::Macro {
                    name: first.to_string(),
                    star: false,
                    optional: None,
                    args: Vec::new(),
                },
                span: start..self.pos,
            };
        }

        let mut end = after;
        while end < self.len() && self.bytes()[end].is_ascii_alphabetic() {
            end += 1;
        }
        let name = &self.src[after..end];
        self.pos = end;

        if name == "begin" {
            if let Some(node) = self.parse_environment(start) {
                return node;
            }
        }

        let arity = macro_args(name);
        let mut star = false;
        if arity != (false, 0) && self.peek() == Some(b'*') {
            star = true;
            self.pos += 1;
        }
        let (optional, args) = self.parse_args(arity);
        Node {
            kind: NodeKind::Macro {
                name: name.to_string(),
                star,
                optional,
                args,
            },
            span: start..self.pos,
        }
    }

    /// Called with `pos` just past `\begin`. Returns `None` (position
    /// unchanged) when no `{name}` follows.
    fn parse_environment(&mut self, start: usize) -> Option<Node> {
        let resume = self.pos;
        self.skip_inline_space();
        if self.peek() != Some(b'{') {
            self.pos = resume;
            return None;
        }
        let Some(close) = self.rest().find('}') else {
            self.pos = resume;
            return None;
        };
        let name = self.src[self.pos + 1..self.pos + close].trim().to_string();
        self.pos += close + 1;

        if VERBATIM_ENVIRONMENTS.contains(&name.as_str()) {
            let body_start = self.pos;
            let terminator = format!("\\end{{{name}}}");
            let (body_end, end) = match self.rest().find(&terminator) {
                Some(off) => (body_start + off, body_start + off + terminator.len()),
                None => (self.len(), self.len()),
            };
            self.pos = end;
            return Some(Node {
                kind: NodeKind::Environment {
                    name,
                    optional: None,
                    args: Vec::new(),
                    children: Vec::new(),
                    body: body_start..body_end,
                },
                span: start..self.pos,
            });
        }

        let (optional, args) = self.parse_args(environment_args(&name));
        let body_start = self.pos;
        let children = self.parse_list(Until::Env(&name));
        let body_end = self.pos;
        if let Some(n) = self.end_environment_len(&name) {
            self.pos += n;
        }
        Some(Node {
            kind: NodeKind::Environment {
                name,
                optional,
                args,
                children,
                body: body_start..body_end,
            },
            span: start..self.pos,
        })
    }

    fn parse_args(&mut self, (takes_optional, mandatory): (bool, usize)) -> (Option<Range<usize>>, Vec<Node>) {
        let mut optional = None;
        if takes_optional {
            let resume = self.pos;
            self.skip_inline_space();
            match self.optional_arg_end() {
                Some(close) => {
                    optional = Some(self.pos + 1..close);
                    self.pos = close + 1;
                }
                None => self.pos = resume,
            }
        }

        let mut args = Vec::with_capacity(mandatory);
        for _ in 0..mandatory {
            let resume = self.pos;
            self.skip_inline_space();
            if self.peek() != Some(b'{') {
                self.pos = resume;
                break;
            }
            args.push(self.parse_group());
        }
        (optional, args)
    }

    /// Position of the `]` closing an optional argument at `pos`, tracking
    /// brace depth so `[width={a]b}]` works.
    fn optional_arg_end(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut depth = 0usize;
        for (i, b) in self.bytes()[self.pos + 1..].iter().enumerate() {
            match b {
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                b']' if depth == 0 => return Some(self.pos + 1 + i),
                _ => {}
            }
        }
        None
    }

    /// Spaces, tabs and at most one line break (a blank line ends argument
    /// scanning, as in TeX).
    fn skip_inline_space(&mut self) {
        let mut newlines = 0;
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'\n' if newlines == 0 => {
                    newlines += 1;
                    self.pos += 1;
                }
                _ => break,
            }
        }
    }

    /// Byte length of `\end{name}` (optional spaces before the brace) at `pos`.
    fn end_environment_len(&self, name: &str) -> Option<usize> {
        let rest = self.rest();
        let after_end = rest.strip_prefix("\\end")?;
        let trimmed = after_end.trim_start_matches([' ', '\t']);
        let skipped = after_end.len() - trimmed.len();
        let inner = trimmed.strip_prefix('{')?;
        let close = inner.find('}')?;
        if inner[..close].trim() != name {
            return None;
        }
        Some("\\end".len() + skipped + 1 + close + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(nodes: &[Node]) -> Vec<&'static str> {
        nodes
            .iter()
            .map(|n| match n.kind {
                NodeKind::Chars => "chars",
                NodeKind::Comment => "comment",
                NodeKind::Group { .. } => "group",
                NodeKind::Macro { .. } => "macro",
                NodeKind::Environment { .. } => "env",
                NodeKind::Math { .. } => "math",
            })
            .collect()
    }

    fn assert_tiles(nodes: &[Node], range: Range<usize>) {
        let mut pos = range.start;
        for n in nodes {
            assert_eq!(n.span.start, pos, "gap before {:?}", n);
            pos = n.span.end;
        }
        assert_eq!(pos, range.end);
    }

    #[test]
    fn top_level_nodes_tile_input() {
        let src = "Intro $x^2$ and {\\bf b} % note\n\\begin{center}c\\end{center} tail}";
        let nodes = parse(src);
        assert_tiles(&nodes, 0..src.len());
    }

    #[test]
    fn environment_with_column_spec() {
        let src = "\\begin{tabular}{|c|c|}a & b \\\\ \\hline\\end{tabular}";
        let nodes = parse(src);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].span, 0..src.len());
        match &nodes[0].kind {
            NodeKind::Environment { name, args, .. } => {
                assert_eq!(name, "tabular");
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].source(src), "{|c|c|}");
            }
            other => panic!("expected environment, got {other:?}"),
        }
    }

    #[test]
    fn nested_same_name_environments_match_correctly() {
        let src = "\\begin{itemize}\\begin{itemize}x\\end{itemize}y\\end{itemize}z";
        let nodes = parse(src);
        assert_eq!(kinds(&nodes), vec!["env", "chars"]);
        assert_eq!(nodes[1].source(src), "z");
    }

    #[test]
    fn includegraphics_optional_and_filename() {
        let src = "\\includegraphics[max width=\\textwidth, center]{2024_03_01_abc-1}";
        let nodes = parse(src);
        assert_eq!(nodes.len(), 1);
        match &nodes[0].kind {
            NodeKind::Macro {
                name,
                optional,
                args,
                ..
            } => {
                assert_eq!(name, "includegraphics");
                let opt = optional.clone().unwrap();
                assert_eq!(&src[opt], "max width=\\textwidth, center");
                match &args[0].kind {
                    NodeKind::Group { inner, .. } => {
                        assert_eq!(&src[inner.clone()], "2024_03_01_abc-1")
                    }
                    other => panic!("expected group, got {other:?}"),
                }
            }
            other => panic!("expected macro, got {other:?}"),
        }
    }

    #[test]
    fn unclosed_group_extends_to_end() {
        let src = "a {b c";
        let nodes = parse(src);
        assert_eq!(kinds(&nodes), vec!["chars", "group"]);
        assert_eq!(nodes[1].span, 2..src.len());
    }

    #[test]
    fn stray_end_is_a_macro() {
        let src = "x\\end{tabular}y";
        let nodes = parse(src);
        assert_eq!(kinds(&nodes), vec!["chars", "macro", "chars"]);
    }

    #[test]
    fn escaped_dollar_is_not_math() {
        let src = "costs \\$5 total";
        let nodes = parse(src);
        assert!(!kinds(&nodes).contains(&"math"));
        assert_tiles(&nodes, 0..src.len());
    }

    #[test]
    fn display_math_variants() {
        for src in ["$$a+b$$", "\\[a+b\\]"] {
            let nodes = parse(src);
            assert_eq!(nodes.len(), 1, "{src}");
            assert!(matches!(nodes[0].kind, NodeKind::Math { display: true, .. }));
        }
        let nodes = parse("\\(a\\)");
        assert!(matches!(nodes[0].kind, NodeKind::Math { display: false, .. }));
    }

    #[test]
    fn verbatim_body_is_opaque() {
        let src = "\\begin{verbatim}\\begin{tabular}{c}1\\end{tabular}\\end{verbatim}";
        let nodes = parse(src);
        assert_eq!(nodes.len(), 1);
        match &nodes[0].kind {
            NodeKind::Environment { children, body, .. } => {
                assert!(children.is_empty());
                assert_eq!(&src[body.clone()], "\\begin{tabular}{c}1\\end{tabular}");
            }
            other => panic!("expected environment, got {other:?}"),
        }
    }

    #[test]
    fn multibyte_text_keeps_char_boundaries() {
        let src = "Δx ≈ 5 \\textbf{µm} ü";
        let nodes = parse(src);
        assert_tiles(&nodes, 0..src.len());
        for n in &nodes {
            let _ = n.source(src);
        }
    }

    #[test]
    fn comment_stops_at_newline() {
        let src = "% hidden {\nshown";
        let nodes = parse(src);
        assert_eq!(kinds(&nodes), vec!["comment", "chars"]);
        assert_eq!(nodes[0].source(src), "% hidden {");
    }

    #[test]
    fn trailing_backslash_is_chars() {
        let nodes = parse("abc\\");
        assert_eq!(kinds(&nodes), vec!["chars", "chars"]);
    }

    fn nesting_depth(nodes: &[Node]) -> usize {
        nodes
            .iter()
            .map(|n| match &n.kind {
                NodeKind::Group { children, .. }
                | NodeKind::Math { children, .. }
                | NodeKind::Environment { children, .. } => 1 + nesting_depth(children),
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn deep_nesting_is_capped() {
        let src = "{".repeat(200_000);
        let nodes = parse(&src);
        assert_tiles(&nodes, 0..src.len());
        assert!(nesting_depth(&nodes) <= MAX_NESTING);
    }

    #[test]
    fn nesting_below_cap_is_parsed_normally() {
        let src = format!("{}x{}", "{".repeat(10), "}".repeat(10));
        let nodes = parse(&src);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nesting_depth(&nodes), 10);
    }

    #[test]
    fn capped_tail_is_one_character_run() {
        let src = format!("{}inside \\begin{{tabular}}", "{".repeat(MAX_NESTING + 5));
        let nodes = parse(&src);
        assert_tiles(&nodes, 0..src.len());
        let mut level = &nodes;
        for _ in 0..MAX_NESTING - 1 {
            match &level[0].kind {
                NodeKind::Group { children, .. } => level = children,
                other => panic!("expected group, got {other:?}"),
            }
        }
        assert_eq!(kinds(level), vec!["group"]);
        match &level[0].kind {
            NodeKind::Group { children, .. } => {
                assert_eq!(kinds(children), vec!["chars"]);
                assert!(children[0].source(&src).ends_with("tabular}"));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }
}
