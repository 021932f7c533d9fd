//! Eager (whole-document) conversion: the pipeline orchestrator.
//!
//! A [`Converter`] owns the OCR service client, the submission cache and the
//! segment converter, all injected at construction. [`Converter::convert`]
//! takes one PDF through every stage in order:
//!
//! 1. validate the input file
//! 2. get a job id from the cache (uploads only on a miss)
//! 3. poll until the service reports completion
//! 4. download the archive, re-downloading while it does not open
//! 5. read the `.tex` source and segment it
//! 6. convert table and figure chunks, wrapped in delimiters
//! 7. concatenate and clean up
//!
//! Steps 3 and 4 share one wall-clock budget (`timeout_secs`). Any error
//! stops the document; nothing partial is returned. Use
//! [`crate::stream::convert_stream`] or [`crate::batch::run_batch`] for many
//! documents.

use crate::cache::JobCache;
use crate::config::ConversionConfig;
use crate::error::Pdf2TxtError;
use crate::output::{ConversionJob, ConversionResult, ConversionStats, JobStatus};
use crate::pipeline::archive::{DownloadedArchive, ResultArchive};
use crate::pipeline::llm::{LlmSegmentConverter, SegmentConverter, SegmentOutput};
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::segment::{partition, segment, ChunkKind, LatexChunk};
use crate::pipeline::service::{await_completion, Deadline, MathpixClient, OcrService};
use crate::prompts::{wrap_image, wrap_table};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The document-conversion pipeline.
pub struct Converter {
    service: Arc<dyn OcrService>,
    cache: Arc<JobCache>,
    segments: Arc<dyn SegmentConverter>,
    config: ConversionConfig,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

/// Input to one chunk's conversion, extracted before any model call.
enum ChunkInput {
    Text,
    Table(String),
    Image(Vec<u8>),
}

/// Everything produced from an opened archive.
struct ParsedArchive {
    raw_latex: String,
    chunks: Vec<LatexChunk>,
    assembled: String,
    text: String,
    input_tokens: u64,
    output_tokens: u64,
}

impl Converter {
    pub fn new(
        service: Arc<dyn OcrService>,
        cache: Arc<JobCache>,
        segments: Arc<dyn SegmentConverter>,
        config: ConversionConfig,
    ) -> Self {
        Self {
            service,
            cache,
            segments,
            config,
        }
    }

    /// Build the default collaborators from `config`: the HTTP service
    /// client (credentials required), the SQLite cache at `cache_path`, and
    /// LLM providers resolved from the config and environment.
    pub fn from_config(config: ConversionConfig) -> Result<Self, Pdf2TxtError> {
        let service = Arc::new(MathpixClient::from_config(&config)?);
        let cache = Arc::new(JobCache::open(&config.cache_path)?);
        let segments = Arc::new(LlmSegmentConverter::from_config(&config)?);
        Ok(Self::new(service, cache, segments, config))
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn cache(&self) -> &JobCache {
        &self.cache
    }

    /// Convert one PDF to cleaned text.
    pub async fn convert(&self, pdf_path: impl AsRef<Path>) -> Result<ConversionResult, Pdf2TxtError> {
        let path = pdf_path.as_ref();
        info!("Starting conversion: {}", path.display());

        let mut job = ConversionJob::new(path);
        self.notify_status(&job);
        let result = self.run(&mut job).await;

        if let Err(ref e) = result {
            warn!("{}: {}", path.display(), e);
            job.fail(e);
            self.notify_status(&job);
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_complete(path, result.as_ref().ok().map(|r| r.text.len()));
        }
        result
    }

    async fn run(&self, job: &mut ConversionJob) -> Result<ConversionResult, Pdf2TxtError> {
        let total_start = Instant::now();
        let path = job.source.clone();

        // ── Step 1: Validate input ──────────────────────────────────────────
        validate_pdf(&path)?;

        // ── Step 2: Job id via cache ────────────────────────────────────────
        let service_start = Instant::now();
        let submission = self
            .cache
            .lookup_or_submit(&path, self.service.as_ref())
            .await?;
        job.content_hash = Some(submission.content_hash.clone());
        job.job_id = Some(submission.job_id.clone());
        let job_id = submission.job_id.clone();

        // ── Step 3: Poll ────────────────────────────────────────────────────
        self.advance(job, JobStatus::Polling);
        let deadline = Deadline::after(self.config.timeout());
        await_completion(
            self.service.as_ref(),
            &job_id,
            &deadline,
            self.config.poll_interval(),
            self.config.progress_callback.as_ref(),
        )
        .await?;

        // ── Step 4: Download ────────────────────────────────────────────────
        self.advance(job, JobStatus::Downloading);
        let (downloaded, archive, attempts) = self.fetch_archive(&job_id, &deadline).await?;
        let service_duration_ms = service_start.elapsed().as_millis() as u64;

        // ── Steps 5–7: Parse, convert, clean ────────────────────────────────
        let conversion_start = Instant::now();
        let parsed = self.convert_archive(job, &job_id, archive).await?;
        let conversion_duration_ms = conversion_start.elapsed().as_millis() as u64;

        let mut result = build_result(job, &job_id, &downloaded, parsed);
        result.stats.cache_hit = submission.from_cache;
        result.stats.download_attempts = attempts;
        result.stats.service_duration_ms = service_duration_ms;
        result.stats.conversion_duration_ms = conversion_duration_ms;
        result.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        self.advance(job, JobStatus::Complete);
        info!(
            "Conversion complete: {} ({} tables, {} images, {}ms total)",
            path.display(),
            result.stats.table_chunks,
            result.stats.image_chunks,
            result.stats.total_duration_ms
        );
        Ok(result)
    }

    /// Download the archive, re-downloading after `download_retry_delay`
    /// while the bytes do not open as a zip. Retries stop once `deadline`
    /// has passed.
    async fn fetch_archive(
        &self,
        job_id: &str,
        deadline: &Deadline,
    ) -> Result<(DownloadedArchive, ResultArchive, u32), Pdf2TxtError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let downloaded = DownloadedArchive::new(self.service.download(job_id).await?);
            debug!(
                "Archive for {}: {} bytes, sha256 {}",
                job_id,
                downloaded.bytes.len(),
                downloaded.sha256
            );
            match ResultArchive::open(job_id, downloaded.bytes.clone()) {
                Ok(archive) => return Ok((downloaded, archive, attempts)),
                Err(Pdf2TxtError::ArchiveCorrupt { detail, .. }) => {
                    if deadline.expired() {
                        return Err(Pdf2TxtError::ArchiveCorrupt {
                            job_id: job_id.to_string(),
                            attempts,
                            detail,
                        });
                    }
                    let delay = self.config.download_retry_delay().min(deadline.remaining());
                    warn!(
                        "Archive for {} is corrupt (attempt {}): {}; retrying in {:?}",
                        job_id, attempts, detail, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse an archive that was downloaded earlier.
    ///
    /// The bytes are checked against the hash recorded at download time
    /// first. `job` must carry the job id the archive belongs to; its status
    /// is advanced as the stages run.
    pub async fn parse_archive(
        &self,
        job: &mut ConversionJob,
        downloaded: &DownloadedArchive,
    ) -> Result<ConversionResult, Pdf2TxtError> {
        let job_id = job
            .job_id
            .clone()
            .ok_or_else(|| Pdf2TxtError::Internal("parse_archive needs a job id".into()))?;
        downloaded.verify(&job_id)?;
        let archive = ResultArchive::open(&job_id, downloaded.bytes.clone())?;

        let start = Instant::now();
        let parsed = self.convert_archive(job, &job_id, archive).await?;
        let mut result = build_result(job, &job_id, downloaded, parsed);
        result.stats.download_attempts = 1;
        result.stats.conversion_duration_ms = start.elapsed().as_millis() as u64;
        result.stats.total_duration_ms = result.stats.conversion_duration_ms;
        self.advance(job, JobStatus::Complete);
        Ok(result)
    }

    async fn convert_archive(
        &self,
        job: &mut ConversionJob,
        job_id: &str,
        mut archive: ResultArchive,
    ) -> Result<ParsedArchive, Pdf2TxtError> {
        self.advance(job, JobStatus::Parsing);
        let raw_latex = archive.tex_source()?;
        let mut chunks = segment(&raw_latex)?;
        info!(
            "Job {}: {} bytes of LaTeX in {} chunks",
            job_id,
            raw_latex.len(),
            chunks.len()
        );

        // Every figure is read from the archive before any model call, so a
        // missing image fails the document without spending tokens.
        let inputs = chunks
            .iter()
            .map(|chunk| match &chunk.kind {
                ChunkKind::Text => Ok(ChunkInput::Text),
                ChunkKind::Table => Ok(ChunkInput::Table(chunk.raw_content.clone())),
                ChunkKind::Image { filename } => archive.image(filename).map(ChunkInput::Image),
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.advance(job, JobStatus::Converting);
        let outputs = self.convert_chunks(&chunks, inputs).await?;

        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        for (chunk, output) in chunks.iter_mut().zip(outputs) {
            let processed = match (&chunk.kind, output) {
                (ChunkKind::Text, _) => chunk.raw_content.clone(),
                (ChunkKind::Table, Some(out)) => {
                    input_tokens += out.input_tokens as u64;
                    output_tokens += out.output_tokens as u64;
                    wrap_table(&out.text)
                }
                (ChunkKind::Image { .. }, Some(out)) => {
                    input_tokens += out.input_tokens as u64;
                    output_tokens += out.output_tokens as u64;
                    wrap_image(&out.text)
                }
                (kind, None) => {
                    return Err(Pdf2TxtError::Internal(format!(
                        "no conversion output for {} chunk at byte {}",
                        kind.label(),
                        chunk.start
                    )))
                }
            };
            chunk.processed_content = Some(processed);
        }

        let assembled = assemble(&chunks);
        let text = clean_text(&assembled);
        Ok(ParsedArchive {
            raw_latex,
            chunks,
            assembled,
            text,
            input_tokens,
            output_tokens,
        })
    }

    /// Run model conversions with at most `chunk_concurrency` in flight.
    /// Outputs come back in chunk order; the first error cancels the rest.
    async fn convert_chunks(
        &self,
        chunks: &[LatexChunk],
        inputs: Vec<ChunkInput>,
    ) -> Result<Vec<Option<SegmentOutput>>, Pdf2TxtError> {
        let total = chunks.len();
        let jobs: Vec<(usize, &'static str, ChunkInput)> = chunks
            .iter()
            .zip(inputs)
            .enumerate()
            .map(|(index, (chunk, input))| (index, chunk.kind.label(), input))
            .collect();

        let futs: Vec<_> = jobs
            .into_iter()
            .map(|(index, kind, input)| {
                let segments = Arc::clone(&self.segments);
                let cb = self.config.progress_callback.clone();
                async move {
                    let output = match input {
                        ChunkInput::Text => return Ok::<_, Pdf2TxtError>(None),
                        ChunkInput::Table(raw) => {
                            if let Some(ref cb) = cb {
                                cb.on_chunk_start(index, total, kind);
                            }
                            segments.convert_table(&raw).await?
                        }
                        ChunkInput::Image(bytes) => {
                            if let Some(ref cb) = cb {
                                cb.on_chunk_start(index, total, kind);
                            }
                            segments.convert_image(&bytes).await?
                        }
                    };
                    debug!("Chunk {}/{} ({}) converted", index + 1, total, kind);
                    if let Some(ref cb) = cb {
                        cb.on_chunk_complete(index, total, kind, output.text.len());
                    }
                    Ok::<_, Pdf2TxtError>(Some(output))
                }
            })
            .collect();

        stream::iter(futs)
            .buffered(self.config.chunk_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Convert a PDF and write the cleaned text to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn convert_to_file(
        &self,
        pdf_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<ConversionResult, Pdf2TxtError> {
        let result = self.convert(pdf_path).await?;
        write_atomic(output_path.as_ref(), &result.text).await?;
        Ok(result)
    }

    /// Synchronous wrapper around [`Converter::convert`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn convert_sync(&self, pdf_path: impl AsRef<Path>) -> Result<ConversionResult, Pdf2TxtError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| Pdf2TxtError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.convert(pdf_path))
    }

    fn advance(&self, job: &mut ConversionJob, status: JobStatus) {
        job.advance(status);
        self.notify_status(job);
    }

    fn notify_status(&self, job: &ConversionJob) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_status_change(&job.source, job.status);
        }
    }
}

/// Concatenate processed content in chunk order (raw content for chunks
/// that have none).
pub fn assemble(chunks: &[LatexChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.processed_content.as_deref().unwrap_or(&c.raw_content))
        .collect()
}

fn build_result(
    job: &ConversionJob,
    job_id: &str,
    downloaded: &DownloadedArchive,
    parsed: ParsedArchive,
) -> ConversionResult {
    let (text_chunks, tables, images) = partition(&parsed.chunks);
    let stats = ConversionStats {
        text_chunks: text_chunks.len(),
        table_chunks: tables.len(),
        image_chunks: images.len(),
        llm_calls: tables.len() + images.len(),
        total_input_tokens: parsed.input_tokens,
        total_output_tokens: parsed.output_tokens,
        ..Default::default()
    };
    ConversionResult {
        source: job.source.clone(),
        content_hash: job.content_hash.clone().unwrap_or_default(),
        job_id: job_id.to_string(),
        archive_sha256: downloaded.sha256.clone(),
        raw_latex: parsed.raw_latex,
        assembled: parsed.assembled,
        text: parsed.text,
        text_chunks,
        tables,
        images,
        stats,
    }
}

/// Check the file exists, is readable, and starts with `%PDF`.
pub fn validate_pdf(path: &Path) -> Result<(), Pdf2TxtError> {
    use std::io::Read;

    let path_buf = path.to_path_buf();
    if !path.exists() {
        return Err(Pdf2TxtError::FileNotFound { path: path_buf });
    }
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            let mut read = 0;
            while read < magic.len() {
                match f.read(&mut magic[read..]) {
                    Ok(0) => break,
                    Ok(n) => read += n,
                    Err(e) => {
                        return Err(Pdf2TxtError::ReadFailed {
                            path: path_buf,
                            source: e,
                        })
                    }
                }
            }
            if &magic != b"%PDF" {
                return Err(Pdf2TxtError::NotAPdf {
                    path: path_buf,
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2TxtError::PermissionDenied { path: path_buf });
        }
        Err(e) => {
            return Err(Pdf2TxtError::ReadFailed {
                path: path_buf,
                source: e,
            });
        }
    }
    debug!("Validated PDF: {}", path.display());
    Ok(())
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), Pdf2TxtError> {
    let write_failed = |e: std::io::Error| Pdf2TxtError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)?;
    Ok(())
}
