//! Content-addressable submission cache.
//!
//! Maps the SHA-256 of a PDF's bytes to the job id the OCR service assigned
//! when that content was first uploaded. A cache hit means no upload: the
//! same paper under a different name or path reuses the existing job, and a
//! run that timed out resumes polling the same job on the next attempt.
//!
//! Schema:
//! - submissions: content_hash (primary key), filename, job_id, created_at
//!
//! Concurrent misses for the same hash inside one process are serialised by
//! a per-hash async lock, so only one of them submits. Across processes the
//! `INSERT OR IGNORE` keeps the first job id stored.

use crate::error::Pdf2TxtError;
use crate::pipeline::service::OcrService;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS submissions (
    content_hash TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    job_id TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
";

/// Block size for hashed reads.
const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// One stored submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_hash: String,
    pub filename: String,
    pub job_id: String,
}

/// Result of [`JobCache::lookup_or_submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub content_hash: String,
    pub job_id: String,
    /// `true` when the job id came from the cache and nothing was uploaded.
    pub from_cache: bool,
}

/// SQLite-backed submission cache.
pub struct JobCache {
    conn: Mutex<Connection>,
    path: PathBuf,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for JobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCache").field("path", &self.path).finish()
    }
}

impl JobCache {
    /// Open or create the cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Pdf2TxtError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| cache_error(&path, e))?;
        }

        let conn = Connection::open(&path).map_err(|e| cache_error(&path, e))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| cache_error(&path, e))?;
        Self::init(conn, path)
    }

    /// In-memory cache, gone when dropped.
    pub fn in_memory() -> Result<Self, Pdf2TxtError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| cache_error(&path, e))?;
        Self::init(conn, path)
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, Pdf2TxtError> {
        conn.execute_batch(SCHEMA).map_err(|e| cache_error(&path, e))?;
        debug!("Submission cache ready at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, Pdf2TxtError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| cache_error(&self.path, "connection lock poisoned"))?;
        f(&conn).map_err(|e| cache_error(&self.path, e))
    }

    pub fn lookup(&self, content_hash: &str) -> Result<Option<CacheEntry>, Pdf2TxtError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT content_hash, filename, job_id FROM submissions WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    Ok(CacheEntry {
                        content_hash: row.get(0)?,
                        filename: row.get(1)?,
                        job_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Store `entry` unless its hash is already present; returns whichever
    /// entry is stored afterwards.
    pub fn insert_if_absent(&self, entry: &CacheEntry) -> Result<CacheEntry, Pdf2TxtError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO submissions (content_hash, filename, job_id) VALUES (?1, ?2, ?3)",
                params![entry.content_hash, entry.filename, entry.job_id],
            )
        })?;
        self.lookup(&entry.content_hash)?.ok_or_else(|| {
            cache_error(
                &self.path,
                format!("entry {} vanished after insert", entry.content_hash),
            )
        })
    }

    pub fn len(&self) -> Result<usize, Pdf2TxtError> {
        let n: i64 = self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM submissions", [], |row| row.get(0))
        })?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, Pdf2TxtError> {
        Ok(self.len()? == 0)
    }

    /// Take the per-hash lock, creating it on first use. The map entry is
    /// dropped again when the last holder releases it.
    async fn lock_key(&self, content_hash: &str) -> Result<KeyLock<'_>, Pdf2TxtError> {
        let lock = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| cache_error(&self.path, "in-flight lock poisoned"))?;
            Arc::clone(
                in_flight
                    .entry(content_hash.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let guard = lock.lock_owned().await;
        Ok(KeyLock {
            cache: self,
            content_hash: content_hash.to_string(),
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Return the job id for the PDF at `pdf_path`, submitting it only if
    /// its content has never been submitted before.
    ///
    /// The file is read once; the stored hash is the hash of the bytes that
    /// were uploaded.
    pub async fn lookup_or_submit(
        &self,
        pdf_path: &Path,
        service: &dyn OcrService,
    ) -> Result<Submission, Pdf2TxtError> {
        let (bytes, content_hash) = read_hashed(pdf_path).await?;

        let _key = self.lock_key(&content_hash).await?;

        if let Some(entry) = self.lookup(&content_hash)? {
            info!(
                "Cache hit for {} (job {}, first seen as {})",
                pdf_path.display(),
                entry.job_id,
                entry.filename
            );
            return Ok(Submission {
                content_hash,
                job_id: entry.job_id,
                from_cache: true,
            });
        }

        let filename = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let job_id = service.submit(&bytes, &filename).await?;

        let stored = self.insert_if_absent(&CacheEntry {
            content_hash: content_hash.clone(),
            filename,
            job_id,
        })?;
        Ok(Submission {
            content_hash,
            job_id: stored.job_id,
            from_cache: false,
        })
    }
}

/// Held while one content hash is being looked up or submitted.
struct KeyLock<'a> {
    cache: &'a JobCache,
    content_hash: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut in_flight) = self.cache.in_flight.lock() {
            let idle = in_flight
                .get(&self.content_hash)
                .is_some_and(|lock| Arc::strong_count(lock) == 1);
            if idle {
                in_flight.remove(&self.content_hash);
            }
        }
    }
}

/// Read a file in fixed-size blocks, returning its bytes and their
/// lowercase hex SHA-256.
pub async fn read_hashed(path: &Path) -> Result<(Vec<u8>, String), Pdf2TxtError> {
    let read_failed = |e: std::io::Error| Pdf2TxtError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = tokio::fs::File::open(path).await.map_err(read_failed)?;
    let mut hasher = Sha256::new();
    let mut bytes = Vec::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(read_failed)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        bytes.extend_from_slice(&buf[..n]);
    }
    Ok((bytes, format!("{:x}", hasher.finalize())))
}

fn cache_error(path: &Path, detail: impl std::fmt::Display) -> Pdf2TxtError {
    Pdf2TxtError::Cache {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}
