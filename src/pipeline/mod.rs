//! Pipeline stages for scientific-PDF-to-text conversion.
//!
//! Each submodule implements one step and is tested on its own; the
//! [`crate::convert::Converter`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! service ──▶ archive ──▶ latex ──▶ segment ──▶ llm ──▶ postprocess
//! (OCR job)   (tex.zip)   (tree)    (chunks)   (+encode) (plain text)
//! ```
//!
//! 1. [`service`] — submit the PDF, poll the job under a deadline, download
//!    the result archive; the only stage talking to the OCR service
//! 2. [`archive`] — open the zip, find the `.tex` source and figure images,
//!    detect corrupt downloads
//! 3. [`latex`]   — tolerant LaTeX parser producing a span-annotated tree
//! 4. [`segment`] — walk the tree and tile the source into text, table and
//!    image chunks
//! 5. [`llm`]     — describe table and image chunks with a text or vision
//!    model; [`encode`] prepares the inline image payload
//! 6. [`postprocess`] — deterministic cleanup and LaTeX-to-text rewrites on
//!    the reassembled document

pub mod archive;
pub mod encode;
pub mod latex;
pub mod llm;
pub mod postprocess;
pub mod segment;
pub mod service;
