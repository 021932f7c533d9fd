//! Configuration types for PDF-to-text conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The config is shared by every stage:
//! the OCR service client reads the endpoint, credentials and polling budget;
//! the segment converter reads the model settings; the orchestrator reads the
//! retry delay and chunk concurrency.
//!
//! Credentials never come from hidden globals. They are loaded once, by the
//! caller, through [`ServiceCredentials::from_env`] (or set explicitly) and
//! handed to the client that needs them.

use crate::error::Pdf2TxtError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default submission endpoint of the LaTeX-extraction service (no trailing slash).
pub const DEFAULT_SERVICE_ENDPOINT: &str = "https://api.mathpix.com/v3/pdf";

/// Environment variable holding the service application id.
pub const APP_ID_ENV: &str = "MATHPIX_APP_ID";

/// Environment variable holding the service application key.
pub const APP_KEY_ENV: &str = "MATHPIX_APP_KEY";

/// Credentials for the OCR service, sent as `app_id` / `app_key` headers.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub app_id: String,
    pub app_key: String,
}

impl ServiceCredentials {
    pub fn new(app_id: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_key: app_key.into(),
        }
    }

    /// Read `MATHPIX_APP_ID` and `MATHPIX_APP_KEY` from the environment.
    pub fn from_env() -> Result<Self, Pdf2TxtError> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    Pdf2TxtError::InvalidConfig(format!(
                        "{name} is not set; export it or add it to .env"
                    ))
                })
        };
        Ok(Self::new(read(APP_ID_ENV)?, read(APP_KEY_ENV)?))
    }
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for a PDF-to-text conversion.
///
/// # Example
/// ```rust
/// use scipdf2txt::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .timeout_secs(90)
///     .poll_interval_ms(2_000)
///     .text_model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.timeout().as_secs(), 90);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Submission endpoint; status is `{endpoint}/{job_id}`, the archive is
    /// `{endpoint}/{job_id}.tex`.
    pub service_endpoint: String,

    /// Service credentials. Required only when the default HTTP client is built.
    pub credentials: Option<ServiceCredentials>,

    /// Wall-clock budget in seconds for polling plus corrupt-archive
    /// re-downloads. Default: 60.
    ///
    /// Large papers routinely take longer than this on the service side; a
    /// timeout is not fatal for the document in the long run because the
    /// submission is cached and the next run resumes polling the same job.
    pub timeout_secs: u64,

    /// Delay between status polls in milliseconds. Default: 5000.
    pub poll_interval_ms: u64,

    /// Delay before re-downloading an archive that failed to open. Default: 5000.
    pub download_retry_delay_ms: u64,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub http_timeout_secs: u64,

    /// LLM provider name (e.g. "openai", "azure", "anthropic").
    pub provider_name: Option<String>,

    /// Model used for table linearisation. Default: provider default.
    pub text_model: Option<String>,

    /// Model used for figure descriptions. Falls back to `text_model`.
    pub vision_model: Option<String>,

    /// Pre-constructed text provider. Takes precedence over `provider_name`.
    pub text_provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision provider. Falls back to `text_provider`.
    pub vision_provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (transcription, not creativity).
    pub temperature: f32,

    /// Maximum tokens per table/figure description. Default: 4096.
    pub max_tokens: usize,

    /// Per-LLM-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// `detail` hint sent with figure images. Default: "auto".
    pub image_detail: String,

    /// How many table/figure chunks of one document may be converted at once.
    /// Output order is always source order. Default: 1.
    pub chunk_concurrency: usize,

    /// Location of the SQLite submission cache.
    pub cache_path: PathBuf,

    /// Receives lifecycle, polling and per-chunk events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            service_endpoint: DEFAULT_SERVICE_ENDPOINT.to_string(),
            credentials: None,
            timeout_secs: 60,
            poll_interval_ms: 5_000,
            download_retry_delay_ms: 5_000,
            http_timeout_secs: 120,
            provider_name: None,
            text_model: None,
            vision_model: None,
            text_provider: None,
            vision_provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            api_timeout_secs: 120,
            image_detail: "auto".to_string(),
            chunk_concurrency: 1,
            cache_path: PathBuf::from("scipdf2txt-cache.sqlite3"),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("service_endpoint", &self.service_endpoint)
            .field("credentials", &self.credentials)
            .field("timeout_secs", &self.timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("download_retry_delay_ms", &self.download_retry_delay_ms)
            .field("provider_name", &self.provider_name)
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field(
                "text_provider",
                &self.text_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field(
                "vision_provider",
                &self.vision_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("chunk_concurrency", &self.chunk_concurrency)
            .field("cache_path", &self.cache_path)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_retry_delay(&self) -> Duration {
        Duration::from_millis(self.download_retry_delay_ms)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn service_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.service_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn credentials(mut self, credentials: ServiceCredentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn download_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.download_retry_delay_ms = ms;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = Some(model.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn text_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.text_provider = Some(provider);
        self
    }

    pub fn vision_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.vision_provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn image_detail(mut self, detail: impl Into<String>) -> Self {
        self.config.image_detail = detail.into();
        self
    }

    pub fn chunk_concurrency(mut self, n: usize) -> Self {
        self.config.chunk_concurrency = n.max(1);
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = path.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2TxtError> {
        let c = &self.config;
        if c.timeout_secs == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Timeout must be ≥ 1 second".into(),
            ));
        }
        if c.poll_interval_ms == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Poll interval must be ≥ 1 ms".into(),
            ));
        }
        if c.chunk_concurrency == 0 {
            return Err(Pdf2TxtError::InvalidConfig(
                "Chunk concurrency must be ≥ 1".into(),
            ));
        }
        if !c.service_endpoint.starts_with("http://") && !c.service_endpoint.starts_with("https://")
        {
            return Err(Pdf2TxtError::InvalidConfig(format!(
                "Service endpoint must be an HTTP(S) URL, got '{}'",
                c.service_endpoint
            )));
        }
        Ok(self.config)
    }
}
