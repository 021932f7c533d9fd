//! Split a LaTeX document into text, table and image chunks.
//!
//! ## Contract
//!
//! The chunks returned by [`segment`] are ordered by `start`, contiguous and
//! non-overlapping, and cover the input exactly: concatenating every
//! `raw_content` reproduces the source byte for byte. Special chunks are
//! found by walking the syntax tree from [`crate::pipeline::latex`]; the walk
//! descends into groups, environments and macro arguments but never into
//! math or into a chunk it has already claimed, so a table nested inside
//! another table belongs to the outer one.
//!
//! An empty document yields no chunks at all.

use crate::error::Pdf2TxtError;
use crate::pipeline::latex::{self, Node, NodeKind};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Environments converted as tables.
pub const TABLE_ENVIRONMENTS: &[&str] = &["tabular", "tabular*", "tabularx", "tabulary", "longtable"];

/// Macros converted as images; the first mandatory argument is the filename.
pub const IMAGE_MACROS: &[&str] = &["includegraphics"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Table,
    Image { filename: String },
}

impl ChunkKind {
    /// Short name used in logs and progress events.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Table => "table",
            ChunkKind::Image { .. } => "image",
        }
    }
}

/// One contiguous slice of the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatexChunk {
    /// Byte offset of the first character (inclusive).
    pub start: usize,
    /// Byte offset past the last character (exclusive).
    pub end: usize,
    pub kind: ChunkKind,
    pub raw_content: String,
    /// Model output for table and image chunks, once converted.
    pub processed_content: Option<String>,
}

impl LatexChunk {
    fn new(src: &str, span: Range<usize>, kind: ChunkKind) -> Self {
        Self {
            start: span.start,
            end: span.end,
            kind,
            raw_content: src[span].to_string(),
            processed_content: None,
        }
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn filename(&self) -> Option<&str> {
        match &self.kind {
            ChunkKind::Image { filename } => Some(filename),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == ChunkKind::Text
    }
}

/// Segment `raw_latex` into ordered chunks.
///
/// Fails with [`Pdf2TxtError::MalformedLatex`] only when an image macro has
/// no usable filename argument; every other irregularity is absorbed by the
/// tolerant parser.
pub fn segment(raw_latex: &str) -> Result<Vec<LatexChunk>, Pdf2TxtError> {
    let nodes = latex::parse(raw_latex);
    let mut specials = Vec::new();
    collect_specials(raw_latex, &nodes, &mut specials)?;

    let mut chunks = Vec::with_capacity(specials.len() * 2 + 1);
    let mut pos = 0;
    for (span, kind) in specials {
        if span.start > pos {
            chunks.push(LatexChunk::new(raw_latex, pos..span.start, ChunkKind::Text));
        }
        pos = span.end;
        chunks.push(LatexChunk::new(raw_latex, span, kind));
    }
    if pos < raw_latex.len() {
        chunks.push(LatexChunk::new(raw_latex, pos..raw_latex.len(), ChunkKind::Text));
    }
    Ok(chunks)
}

fn collect_specials(
    src: &str,
    nodes: &[Node],
    out: &mut Vec<(Range<usize>, ChunkKind)>,
) -> Result<(), Pdf2TxtError> {
    for node in nodes {
        match &node.kind {
            NodeKind::Environment {
                name,
                args,
                children,
                ..
            } => {
                if TABLE_ENVIRONMENTS.contains(&name.as_str()) {
                    out.push((node.span.clone(), ChunkKind::Table));
                } else {
                    collect_specials(src, args, out)?;
                    collect_specials(src, children, out)?;
                }
            }
            NodeKind::Macro { name, args, .. } if IMAGE_MACROS.contains(&name.as_str()) => {
                let filename = args
                    .first()
                    .and_then(|arg| match &arg.kind {
                        NodeKind::Group { inner, .. } => Some(src[inner.clone()].trim()),
                        _ => None,
                    })
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| Pdf2TxtError::MalformedLatex {
                        offset: node.span.start,
                        detail: format!("\\{name} without a filename argument"),
                    })?;
                out.push((
                    node.span.clone(),
                    ChunkKind::Image {
                        filename: filename.to_string(),
                    },
                ));
            }
            NodeKind::Macro { args, .. } => collect_specials(src, args, out)?,
            NodeKind::Group { children, .. } => collect_specials(src, children, out)?,
            NodeKind::Math { .. } | NodeKind::Chars | NodeKind::Comment => {}
        }
    }
    Ok(())
}

/// Split chunks into `(text, tables, images)`, each in source order.
pub fn partition(chunks: &[LatexChunk]) -> (Vec<LatexChunk>, Vec<LatexChunk>, Vec<LatexChunk>) {
    let mut text = Vec::new();
    let mut tables = Vec::new();
    let mut images = Vec::new();
    for chunk in chunks {
        match chunk.kind {
            ChunkKind::Text => text.push(chunk.clone()),
            ChunkKind::Table => tables.push(chunk.clone()),
            ChunkKind::Image { .. } => images.push(chunk.clone()),
        }
    }
    (text, tables, images)
}
