//! Output and bookkeeping types for a single document conversion.

use crate::pipeline::segment::LatexChunk;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::info;

/// Lifecycle of one PDF inside the orchestrator.
///
/// Transitions only move forward:
/// `Submitted → Polling → Downloading → Parsing → Converting → Complete`,
/// with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Downloading,
    Parsing,
    Converting,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Polling => "polling",
            JobStatus::Downloading => "downloading",
            JobStatus::Parsing => "parsing",
            JobStatus::Converting => "converting",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One PDF being converted. Owned by the orchestrator for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub source: PathBuf,
    pub content_hash: Option<String>,
    /// Identifier assigned by the OCR service; `None` until submitted or
    /// found in the cache.
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub error: Option<String>,
}

impl ConversionJob {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            content_hash: None,
            job_id: None,
            status: JobStatus::Submitted,
            error: None,
        }
    }

    /// Move to `next`. Terminal states are sticky.
    pub fn advance(&mut self, next: JobStatus) {
        if self.status.is_terminal() {
            return;
        }
        info!(
            "{}: {} → {}",
            self.source.display(),
            self.status,
            next
        );
        self.status = next;
    }

    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
        self.advance(JobStatus::Failed);
    }
}

/// Per-document statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub image_chunks: usize,
    /// LLM requests issued (one per table or image chunk).
    pub llm_calls: usize,
    /// The job id came from the cache; nothing was uploaded.
    pub cache_hit: bool,
    /// Archive downloads, including re-downloads of corrupt archives.
    pub download_attempts: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Submission + polling + download.
    pub service_duration_ms: u64,
    /// Segmentation + LLM conversion + cleanup.
    pub conversion_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The final product of one conversion.
///
/// `text` is what gets written to the fulltext store; the chunk collections
/// are kept (with `processed_content` filled in) so a reader can trace every
/// table/figure description back to the LaTeX it replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub source: PathBuf,
    pub content_hash: String,
    pub job_id: String,
    /// SHA-256 of the downloaded archive bytes.
    pub archive_sha256: String,
    pub raw_latex: String,
    /// Concatenated chunks after delimiter wrapping, before cleanup.
    pub assembled: String,
    /// Final cleaned text.
    pub text: String,
    pub text_chunks: Vec<LatexChunk>,
    pub tables: Vec<LatexChunk>,
    pub images: Vec<LatexChunk>,
    pub stats: ConversionStats,
}
