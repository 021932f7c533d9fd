//! CLI binary for scipdf2txt.
//!
//! A thin shim over the library crate: a single PDF goes through
//! `Converter::convert`, a directory is treated as an inbox for `run_batch`.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scipdf2txt::{
    run_batch, BatchConfig, ConversionConfig, ConversionProgressCallback, Converter, JobStatus,
    ProgressCallback, ServiceCredentials,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar counting finished documents; the message shows the latest
/// lifecycle event. Works with several documents in flight.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-document start times for elapsed reporting.
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new(documents: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:32.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(documents as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        let total = self.bar.length().unwrap_or(0) as usize;
        let failed = self.failures.load(Ordering::SeqCst);
        self.bar.finish_and_clear();
        if total == 0 {
            return;
        }
        if failed == 0 {
            eprintln!("{} {} document(s) converted", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {}/{} document(s) converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_status_change(&self, source: &Path, status: JobStatus) {
        if status == JobStatus::Submitted {
            if let Ok(mut times) = self.start_times.lock() {
                times.insert(source.to_path_buf(), Instant::now());
            }
        }
        self.bar.set_message(format!("{} {}", short_name(source), dim(&status.to_string())));
    }

    fn on_poll_progress(&self, job_id: &str, percent_done: u8) {
        self.bar.set_message(format!("job {job_id} {}", dim(&format!("{percent_done}%"))));
    }

    fn on_chunk_complete(&self, index: usize, total: usize, kind: &str, output_len: usize) {
        self.bar.println(format!(
            "    {} {:<5} chunk {:>3}/{:<3}  {}",
            dim("·"),
            kind,
            index + 1,
            total,
            dim(&format!("{output_len:>5} chars")),
        ));
    }

    fn on_document_complete(&self, source: &Path, text_len: Option<usize>) {
        let elapsed = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(source))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        match text_len {
            Some(len) => self.bar.println(format!(
                "  {} {:<40}  {:<12}  {}",
                green("✓"),
                short_name(source),
                dim(&format!("{len:>7} chars")),
                dim(&format!("{elapsed:.1}s")),
            )),
            None => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                self.bar.println(format!(
                    "  {} {:<40}  {}",
                    red("✗"),
                    short_name(source),
                    dim(&format!("{elapsed:.1}s")),
                ));
            }
        }
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One paper to stdout
  scipdf2txt paper.pdf

  # One paper to a file
  scipdf2txt paper.pdf -o paper.txt

  # Full result (raw LaTeX, chunks, stats) as JSON
  scipdf2txt --json paper.pdf > paper.json

  # Process an inbox: new PDFs → library/<stem>.txt, PDFs moved to archive/
  scipdf2txt inbox/ --fulltext-dir library --archive-dir archive

  # Vision model different from the table model
  scipdf2txt --provider openai --text-model gpt-4.1-mini --vision-model gpt-4.1 paper.pdf

NOTES:
  PDF files whose name starts with '_' are skipped in inbox mode, as are
  PDFs that already have a <stem>.txt in the fulltext directory.

  Uploads are cached by content hash (--cache). Re-running after a timeout
  resumes the existing OCR job instead of uploading again.

ENVIRONMENT VARIABLES:
  MATHPIX_APP_ID          OCR service application id
  MATHPIX_APP_KEY         OCR service application key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID

  Variables are also read from a .env file in the working directory.
"#;

/// Convert scientific PDFs to plain text with table and figure descriptions.
#[derive(Parser, Debug)]
#[command(
    name = "scipdf2txt",
    version,
    about = "Convert scientific PDFs to plain text with LLM table and figure descriptions",
    long_about = "Convert scientific PDFs to plain text. The PDF is converted to LaTeX by an \
OCR service; tables are linearised by a text model and figures described by a vision model, \
and the results are spliced back between delimiters.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// A PDF file, or an inbox directory of PDFs.
    input: PathBuf,

    /// Write text to this file instead of stdout (single-file mode).
    #[arg(short, long, env = "SCIPDF2TXT_OUTPUT")]
    output: Option<PathBuf>,

    /// Output the full ConversionResult as JSON (single-file mode).
    #[arg(long, env = "SCIPDF2TXT_JSON")]
    json: bool,

    /// Directory for converted text (inbox mode). Default: <inbox>/../library
    #[arg(long, env = "SCIPDF2TXT_FULLTEXT_DIR")]
    fulltext_dir: Option<PathBuf>,

    /// Directory converted PDFs are moved to (inbox mode). Default: <inbox>/../archive
    #[arg(long, env = "SCIPDF2TXT_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// Documents converted concurrently in inbox mode.
    #[arg(short, long, env = "SCIPDF2TXT_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Submission cache (SQLite).
    #[arg(long, env = "SCIPDF2TXT_CACHE", default_value = "scipdf2txt-cache.sqlite3")]
    cache: PathBuf,

    /// Seconds to wait for the OCR job (polling and re-downloads share this budget).
    #[arg(long, env = "SCIPDF2TXT_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Delay between status polls in milliseconds.
    #[arg(long, env = "SCIPDF2TXT_POLL_INTERVAL_MS", default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Table/figure conversions in flight per document.
    #[arg(long, env = "SCIPDF2TXT_CHUNK_CONCURRENCY", default_value_t = 1)]
    chunk_concurrency: usize,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Model for table conversion. Default: gpt-4.1-mini
    #[arg(long, env = "SCIPDF2TXT_TEXT_MODEL")]
    text_model: Option<String>,

    /// Vision model for figure descriptions. Default: same as --text-model
    #[arg(long, env = "SCIPDF2TXT_VISION_MODEL")]
    vision_model: Option<String>,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "SCIPDF2TXT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-chunk LLM call timeout in seconds.
    #[arg(long, env = "SCIPDF2TXT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// OCR service PDF endpoint.
    #[arg(long, env = "SCIPDF2TXT_ENDPOINT", default_value = scipdf2txt::config::DEFAULT_SERVICE_ENDPOINT)]
    endpoint: String,

    /// OCR service application id.
    #[arg(long, env = "MATHPIX_APP_ID", hide_env_values = true)]
    app_id: Option<String>,

    /// OCR service application key.
    #[arg(long, env = "MATHPIX_APP_KEY", hide_env_values = true)]
    app_key: Option<String>,

    /// Disable progress bar.
    #[arg(long, env = "SCIPDF2TXT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCIPDF2TXT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCIPDF2TXT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.input.is_dir() {
        run_inbox(&cli, show_progress).await
    } else {
        run_single(&cli, show_progress).await
    }
}

async fn run_single(cli: &Cli, show_progress: bool) -> Result<()> {
    let progress = show_progress.then(|| CliProgressCallback::new(1));
    let converter = build_converter(cli, progress.clone())?;

    let outcome = match cli.output {
        Some(ref output_path) => converter.convert_to_file(&cli.input, output_path).await,
        None => converter.convert(&cli.input).await,
    };
    if let Some(ref p) = progress {
        p.finish();
    }
    let result = outcome.with_context(|| format!("Conversion of {} failed", cli.input.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise output")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(result.text.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet && !cli.json {
        let stats = &result.stats;
        eprintln!(
            "   {} tables, {} figures  {}  {} tokens in / {} tokens out  —  {}ms total",
            stats.table_chunks,
            stats.image_chunks,
            if stats.cache_hit { dim("(cached job)") } else { String::new() },
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
            stats.total_duration_ms,
        );
        if let Some(ref output_path) = cli.output {
            eprintln!("   →  {}", bold(&output_path.display().to_string()));
        }
    }
    Ok(())
}

async fn run_inbox(cli: &Cli, show_progress: bool) -> Result<()> {
    let parent = cli
        .input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let batch = BatchConfig::new(
        &cli.input,
        cli.archive_dir.clone().unwrap_or_else(|| parent.join("archive")),
        cli.fulltext_dir.clone().unwrap_or_else(|| parent.join("library")),
    )
    .workers(cli.workers);

    let pending = scipdf2txt::pending_documents(&batch)
        .with_context(|| format!("Failed to scan inbox {}", cli.input.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} new PDF(s) in {}", pending.len(), cli.input.display()))
        );
    }
    if pending.is_empty() {
        return Ok(());
    }

    let progress = show_progress.then(|| CliProgressCallback::new(pending.len()));
    let converter = Arc::new(build_converter(cli, progress.clone())?);
    let report = run_batch(converter, &batch).await.context("Batch failed")?;
    if let Some(ref p) = progress {
        p.finish();
    }

    if !cli.quiet {
        for (path, err) in &report.failed {
            eprintln!(
                "  {} {}  {}{}",
                red("✗"),
                path.display(),
                err,
                if err.is_retryable() { dim("  (will be retried next run)") } else { String::new() },
            );
        }
        if !show_progress {
            eprintln!(
                "Converted {} document(s), {} failed",
                report.converted.len(),
                report.failed.len()
            );
        }
    }
    if report.is_clean() {
        Ok(())
    } else {
        anyhow::bail!("{} document(s) failed", report.failed.len())
    }
}

/// Map CLI args to a `Converter`.
fn build_converter(cli: &Cli, progress: Option<Arc<CliProgressCallback>>) -> Result<Converter> {
    let mut builder = ConversionConfig::builder()
        .service_endpoint(&cli.endpoint)
        .cache_path(&cli.cache)
        .timeout_secs(cli.timeout)
        .poll_interval_ms(cli.poll_interval_ms)
        .chunk_concurrency(cli.chunk_concurrency)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    match (&cli.app_id, &cli.app_key) {
        (Some(id), Some(key)) => builder = builder.credentials(ServiceCredentials::new(id, key)),
        (None, None) => {}
        _ => anyhow::bail!("--app-id and --app-key must be given together"),
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name);
    }
    if let Some(ref model) = cli.text_model {
        builder = builder.text_model(model);
    }
    if let Some(ref model) = cli.vision_model {
        builder = builder.vision_model(model);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb as ProgressCallback);
    }

    let config = builder.build().context("Invalid configuration")?;
    Converter::from_config(config).context("Failed to set up the converter")
}
