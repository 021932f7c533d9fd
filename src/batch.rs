//! Inbox processing: convert every new PDF in a directory.
//!
//! The work set is computed once, before any conversion starts:
//!
//! ```text
//! { inbox/*.pdf not starting with '_' }  −  { stems of fulltext/*.txt }
//! ```
//!
//! Each pending PDF is converted through [`crate::stream::convert_stream`]
//! with `workers` documents in flight. On success the text is written to
//! `fulltext/<stem>.txt` after the PDF is moved to the archive directory. A
//! failure is logged and recorded in the [`BatchReport`]; the PDF stays in
//! the inbox so the next run picks it up again (the submission cache makes
//! that cheap).

use crate::convert::{write_atomic, Converter};
use crate::error::Pdf2TxtError;
use crate::stream::convert_stream;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Directory layout and pool size for [`run_batch`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Where new PDFs are picked up.
    pub inbox_dir: PathBuf,
    /// Where converted PDFs are moved.
    pub archive_dir: PathBuf,
    /// Where `<stem>.txt` files are written.
    pub fulltext_dir: PathBuf,
    /// Documents converted concurrently. The OCR service rate-limits
    /// submissions, so keep this small.
    pub workers: usize,
}

impl BatchConfig {
    pub fn new(
        inbox_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        fulltext_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
            archive_dir: archive_dir.into(),
            fulltext_dir: fulltext_dir.into(),
            workers: 1,
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n.max(1);
        self
    }

    /// Output path for a given PDF.
    pub fn fulltext_path(&self, pdf: &Path) -> PathBuf {
        let stem = pdf.file_stem().unwrap_or(pdf.as_os_str());
        let mut name = stem.to_os_string();
        name.push(".txt");
        self.fulltext_dir.join(name)
    }
}

/// What a batch run did.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// PDFs converted and archived, as they were named in the inbox.
    pub converted: Vec<PathBuf>,
    /// PDFs left in the inbox, with the reason.
    pub failed: Vec<(PathBuf, Pdf2TxtError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// PDFs in the inbox that have no text in the fulltext directory yet.
///
/// Files whose name starts with `_` are parked and never picked up. The
/// extension match is case-sensitive (`.pdf` only). A missing fulltext
/// directory counts as empty. Results are sorted by path.
pub fn pending_documents(config: &BatchConfig) -> Result<Vec<PathBuf>, Pdf2TxtError> {
    let inbox = read_dir(&config.inbox_dir)?;

    let done: HashSet<_> = if config.fulltext_dir.is_dir() {
        read_dir(&config.fulltext_dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e == "txt"))
            .filter_map(|p| p.file_stem().map(|s| s.to_os_string()))
            .collect()
    } else {
        HashSet::new()
    };

    let mut pending: Vec<PathBuf> = inbox
        .into_iter()
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "pdf"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('_'))
        })
        .filter(|p| p.file_stem().is_some_and(|s| !done.contains(s)))
        .collect();
    pending.sort();
    Ok(pending)
}

/// Convert every pending document in the inbox.
///
/// Only directory-level failures (unreadable inbox) are returned as `Err`;
/// per-document failures end up in [`BatchReport::failed`].
pub async fn run_batch(
    converter: Arc<Converter>,
    config: &BatchConfig,
) -> Result<BatchReport, Pdf2TxtError> {
    let pending = pending_documents(config)?;
    info!(
        "Inbox {}: {} document(s) to convert",
        config.inbox_dir.display(),
        pending.len()
    );

    let mut report = BatchReport::default();
    if pending.is_empty() {
        return Ok(report);
    }

    let mut outcomes = convert_stream(converter, pending, config.workers);
    while let Some(outcome) = outcomes.next().await {
        let path = outcome.path;
        let stored = match outcome.result {
            Ok(result) => store(config, &path, &result.text).await,
            Err(e) => Err(e),
        };
        match stored {
            Ok(()) => {
                info!("Converted {}", path.display());
                report.converted.push(path);
            }
            Err(e) => {
                warn!(
                    "Failed {} [{}{}]: {}",
                    path.display(),
                    e.kind(),
                    if e.is_retryable() { ", retryable" } else { "" },
                    e
                );
                report.failed.push((path, e));
            }
        }
    }

    info!(
        "Batch finished: {} converted, {} failed",
        report.converted.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Move the PDF out of the inbox, then write the text.
///
/// A PDF is only ever counted as done once its text exists, so the move
/// comes first. If the text cannot be written the PDF is moved back and
/// stays pending.
async fn store(config: &BatchConfig, pdf: &Path, text: &str) -> Result<(), Pdf2TxtError> {
    let name = pdf
        .file_name()
        .ok_or_else(|| Pdf2TxtError::Internal(format!("no file name in {}", pdf.display())))?;
    let archived = config.archive_dir.join(name);
    move_file(pdf, &archived).await?;

    if let Err(e) = write_atomic(&config.fulltext_path(pdf), text).await {
        if let Err(restore) = move_file(&archived, pdf).await {
            warn!(
                "Could not return {} to the inbox: {}",
                archived.display(),
                restore
            );
        }
        return Err(e);
    }
    Ok(())
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), Pdf2TxtError> {
    let failed = |e: std::io::Error| Pdf2TxtError::OutputWriteFailed {
        path: to.to_path_buf(),
        source: e,
    };

    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await.map_err(failed)?;
    tokio::fs::remove_file(from).await.map_err(failed)?;
    Ok(())
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, Pdf2TxtError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Pdf2TxtError::FileNotFound {
            path: dir.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => Pdf2TxtError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => Pdf2TxtError::ReadFailed {
            path: dir.to_path_buf(),
            source: e,
        },
    })?;
    entries
        .map(|entry| {
            entry.map(|e| e.path()).map_err(|e| Pdf2TxtError::ReadFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        })
        .collect()
}
