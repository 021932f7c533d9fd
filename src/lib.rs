//! # scipdf2txt
//!
//! Convert scientific PDFs to plain text that keeps the content of tables
//! and figures.
//!
//! ## Why this crate?
//!
//! Text extractors lose everything that is not running prose: tables come
//! out as number soup and figures disappear entirely. This crate sends the
//! PDF to an OCR service that returns LaTeX, cuts the LaTeX into text, table
//! and figure chunks, and asks an LLM to turn each table into
//! "Column: value" rows and each figure into a description. The results are
//! spliced back between delimiters so downstream tools can tell generated
//! text from the paper's own words.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Cache     sha256(content) → job id; upload only on a miss
//!  ├─ 2. Service   poll until completed, download tex.zip (retry if corrupt)
//!  ├─ 3. Segment   LaTeX → ordered text / table / image chunks
//!  ├─ 4. LLM       table → text model, figure → vision model
//!  ├─ 5. Assemble  concatenate chunks, delimiters around model output
//!  └─ 6. Clean     strip layout macros, LaTeX → plain text
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scipdf2txt::{ConversionConfig, Converter, ServiceCredentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ConversionConfig::builder()
//!         .credentials(ServiceCredentials::from_env()?)
//!         .build()?;
//!     let converter = Converter::from_config(config)?;
//!     let result = converter.convert("paper.pdf").await?;
//!     println!("{}", result.text);
//!     eprintln!("{} tables, {} figures",
//!         result.stats.table_chunks,
//!         result.stats.image_chunks);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scipdf2txt` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{pending_documents, run_batch, BatchConfig, BatchReport};
pub use cache::{CacheEntry, JobCache};
pub use config::{ConversionConfig, ConversionConfigBuilder, ServiceCredentials};
pub use convert::Converter;
pub use error::Pdf2TxtError;
pub use output::{ConversionJob, ConversionResult, ConversionStats, JobStatus};
pub use pipeline::archive::DownloadedArchive;
pub use pipeline::llm::{LlmSegmentConverter, SegmentConverter, SegmentOutput};
pub use pipeline::postprocess::clean_text;
pub use pipeline::segment::{segment, ChunkKind, LatexChunk};
pub use pipeline::service::{MathpixClient, OcrService, ServiceStatus};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, DocumentOutcome, DocumentStream};
