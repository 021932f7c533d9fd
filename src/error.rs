//! Error types for the scipdf2txt library.
//!
//! Every failure that stops a document from converting is a
//! [`Pdf2TxtError`]. There is no "partial success" type: if one
//! table or figure description fails, the already-converted chunks of that
//! document are discarded and the error is returned to the caller. The
//! [`crate::batch`] driver is where failures are isolated per document.
//!
//! The variants follow the pipeline stages:
//!
//! * **Submission / polling / download** — [`Pdf2TxtError::Submission`],
//!   [`Pdf2TxtError::Transport`], [`Pdf2TxtError::Service`],
//!   [`Pdf2TxtError::Timeout`], [`Pdf2TxtError::ArchiveCorrupt`]
//! * **Archive structure** — [`Pdf2TxtError::MalformedArchive`],
//!   [`Pdf2TxtError::ArchiveIntegrity`], [`Pdf2TxtError::MalformedLatex`]
//! * **LLM conversion** — [`Pdf2TxtError::Conversion`]
//! * **Local I/O, cache and configuration** — everything else.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the scipdf2txt library.
#[derive(Debug, Error)]
pub enum Pdf2TxtError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Reading an input file failed part-way.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── OCR service errors ────────────────────────────────────────────────
    /// The service was unreachable, rejected the credentials, or echoed an
    /// inline error while accepting the upload.
    #[error("Submission of '{filename}' failed: {detail}")]
    Submission {
        filename: String,
        detail: String,
        /// Extra structured detail echoed by the service, if any.
        info: Option<serde_json::Value>,
    },

    /// Unexpected HTTP failure while polling or downloading.
    #[error("Transport error for job '{job_id}' during {stage}: {detail}")]
    Transport {
        job_id: String,
        stage: &'static str,
        detail: String,
    },

    /// The service reported a terminal processing failure.
    #[error("OCR service failed to process job '{job_id}': {detail}")]
    Service { job_id: String, detail: String },

    /// No `completed` status was observed within the polling budget.
    #[error("Job '{job_id}' did not complete within {secs}s\nRe-run later; the submission is cached and will not be repeated.")]
    Timeout { job_id: String, secs: u64 },

    /// Every download attempt returned bytes that do not open as an archive.
    #[error("Archive for job '{job_id}' was still corrupt after {attempts} download attempts: {detail}")]
    ArchiveCorrupt {
        job_id: String,
        attempts: u32,
        detail: String,
    },

    // ── Archive / LaTeX errors ────────────────────────────────────────────
    /// The archive opened but is missing the `.tex` source or a referenced image.
    #[error("Malformed archive for job '{job_id}': {detail}")]
    MalformedArchive { job_id: String, detail: String },

    /// Archive bytes no longer match the hash recorded at download time.
    #[error("Archive for job '{job_id}' got broken during storage: expected sha256 {expected}, got {actual}")]
    ArchiveIntegrity {
        job_id: String,
        expected: String,
        actual: String,
    },

    /// The LaTeX source cannot be segmented.
    #[error("Malformed LaTeX at byte {offset}: {detail}")]
    MalformedLatex { offset: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// A table or image description request failed.
    #[error("Failed to convert {kind} chunk: {detail}")]
    Conversion { kind: &'static str, detail: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Cache errors ──────────────────────────────────────────────────────
    /// The submission cache could not be opened, read or written.
    #[error("Submission cache error at '{path}': {detail}")]
    Cache { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2TxtError {
    /// Whether re-running the same document later may succeed without any
    /// change to the input.
    ///
    /// Timeouts are the common case: the submission is cached, so the next
    /// run resumes polling the same job instead of uploading again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Pdf2TxtError::Transport { .. }
                | Pdf2TxtError::Timeout { .. }
                | Pdf2TxtError::ArchiveCorrupt { .. }
                | Pdf2TxtError::Submission { .. }
                | Pdf2TxtError::Conversion { .. }
        )
    }

    /// Short machine-friendly name of the variant, used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Pdf2TxtError::FileNotFound { .. } => "file_not_found",
            Pdf2TxtError::PermissionDenied { .. } => "permission_denied",
            Pdf2TxtError::NotAPdf { .. } => "not_a_pdf",
            Pdf2TxtError::ReadFailed { .. } => "read_failed",
            Pdf2TxtError::Submission { .. } => "submission",
            Pdf2TxtError::Transport { .. } => "transport",
            Pdf2TxtError::Service { .. } => "service",
            Pdf2TxtError::Timeout { .. } => "timeout",
            Pdf2TxtError::ArchiveCorrupt { .. } => "archive_corrupt",
            Pdf2TxtError::MalformedArchive { .. } => "malformed_archive",
            Pdf2TxtError::ArchiveIntegrity { .. } => "archive_integrity",
            Pdf2TxtError::MalformedLatex { .. } => "malformed_latex",
            Pdf2TxtError::Conversion { .. } => "conversion",
            Pdf2TxtError::ProviderNotConfigured { .. } => "provider_not_configured",
            Pdf2TxtError::Cache { .. } => "cache",
            Pdf2TxtError::OutputWriteFailed { .. } => "output_write_failed",
            Pdf2TxtError::InvalidConfig(_) => "invalid_config",
            Pdf2TxtError::Internal(_) => "internal",
        }
    }
}
