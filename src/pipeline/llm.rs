//! Model interaction: turn table and figure chunks into prose.
//!
//! All prompt wording lives in
//! [`crate::prompts`]; the orchestrator owns ordering and concurrency.
//!
//! ## Failure policy
//!
//! There is no retry loop here. A failed or timed-out request becomes
//! [`Pdf2TxtError::Conversion`] and the document conversion stops; whether
//! to re-run the document is the caller's decision.

use crate::config::ConversionConfig;
use crate::error::Pdf2TxtError;
use crate::pipeline::encode::encode_figure;
use crate::prompts::{table_prompt, IMAGE_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// A model response plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentOutput {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl From<String> for SegmentOutput {
    fn from(text: String) -> Self {
        Self {
            text,
            ..Default::default()
        }
    }
}

impl From<&str> for SegmentOutput {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

/// Converts special chunks to natural-language descriptions.
///
/// Implementations return the model output verbatim; they do not validate
/// its shape.
#[async_trait]
pub trait SegmentConverter: Send + Sync {
    /// Linearise a raw LaTeX table into "Column: value; …" rows.
    async fn convert_table(&self, raw_table: &str) -> Result<SegmentOutput, Pdf2TxtError>;

    /// Describe a figure given its image bytes.
    async fn convert_image(&self, image: &[u8]) -> Result<SegmentOutput, Pdf2TxtError>;
}

/// [`SegmentConverter`] backed by edgequake-llm providers.
pub struct LlmSegmentConverter {
    text_provider: Arc<dyn LLMProvider>,
    vision_provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    api_timeout: Duration,
    image_detail: String,
}

impl LlmSegmentConverter {
    pub fn new(
        text_provider: Arc<dyn LLMProvider>,
        vision_provider: Arc<dyn LLMProvider>,
        config: &ConversionConfig,
    ) -> Self {
        Self {
            text_provider,
            vision_provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_timeout: Duration::from_secs(config.api_timeout_secs),
            image_detail: config.image_detail.clone(),
        }
    }

    /// Resolve providers from the config (see [`resolve_providers`]).
    pub fn from_config(config: &ConversionConfig) -> Result<Self, Pdf2TxtError> {
        let (text, vision) = resolve_providers(config)?;
        Ok(Self::new(text, vision, config))
    }

    async fn complete(
        &self,
        provider: &Arc<dyn LLMProvider>,
        messages: Vec<ChatMessage>,
        kind: &'static str,
    ) -> Result<SegmentOutput, Pdf2TxtError> {
        let start = Instant::now();
        let options = build_options(self.temperature, self.max_tokens);
        let response = tokio::time::timeout(self.api_timeout, provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| Pdf2TxtError::Conversion {
                kind,
                detail: format!("no response within {}s", self.api_timeout.as_secs()),
            })?
            .map_err(|e| Pdf2TxtError::Conversion {
                kind,
                detail: e.to_string(),
            })?;

        debug!(
            "{} chunk: {} input tokens, {} output tokens, {:?}",
            kind,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        if response.content.trim().is_empty() {
            warn!("Model returned an empty {} description", kind);
        }

        Ok(SegmentOutput {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

#[async_trait]
impl SegmentConverter for LlmSegmentConverter {
    async fn convert_table(&self, raw_table: &str) -> Result<SegmentOutput, Pdf2TxtError> {
        let messages = vec![ChatMessage::user(table_prompt(raw_table))];
        self.complete(&self.text_provider, messages, "table").await
    }

    /// The request is a single user turn: instruction text plus the inline image.
    async fn convert_image(&self, image: &[u8]) -> Result<SegmentOutput, Pdf2TxtError> {
        let image_data = encode_figure(image, &self.image_detail)?;
        let messages = vec![ChatMessage::user_with_images(IMAGE_PROMPT, vec![image_data])];
        self.complete(&self.vision_provider, messages, "image").await
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2TxtError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2TxtError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the `(text, vision)` provider pair, from most to least specific.
///
/// 1. **Pre-built providers** (`text_provider` / `vision_provider`).
/// 2. **Named provider** (`provider_name`) with `text_model` / `vision_model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
///
/// The vision side falls back to the text provider unless a vision provider
/// or a distinct `vision_model` is configured.
pub fn resolve_providers(
    config: &ConversionConfig,
) -> Result<(Arc<dyn LLMProvider>, Arc<dyn LLMProvider>), Pdf2TxtError> {
    let (text, provider_name) = resolve_text_provider(config)?;

    let vision = match (&config.vision_provider, &config.vision_model, provider_name) {
        (Some(provider), _, _) => Arc::clone(provider),
        (None, Some(model), Some(name)) if config.text_model.as_ref() != Some(model) => {
            create_provider(&name, model)?
        }
        (None, Some(model), None) => {
            warn!(
                "vision model '{}' ignored: provider was auto-detected; set a provider name to use it",
                model
            );
            Arc::clone(&text)
        }
        _ => Arc::clone(&text),
    };
    Ok((text, vision))
}

/// Returns the text provider and, when known, the provider name used to build it.
fn resolve_text_provider(
    config: &ConversionConfig,
) -> Result<(Arc<dyn LLMProvider>, Option<String>), Pdf2TxtError> {
    if let Some(ref provider) = config.text_provider {
        return Ok((Arc::clone(provider), config.provider_name.clone()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.text_model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok((create_provider(name, model)?, Some(name.clone())));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let model = config.text_model.clone().unwrap_or(model);
            return Ok((create_provider(&prov, &model)?, Some(prov)));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.text_model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Ok((create_provider("openai", model)?, Some("openai".to_string())));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2TxtError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok((llm_provider, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::TABLE_PROMPT;
    use edgequake_llm::{LLMResponse, LlmError};
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    enum Reply {
        Text(&'static str),
        Fail,
        Hang,
    }

    /// Records every chat request and answers with a fixed reply.
    struct ScriptedProvider {
        reply: Reply,
        requests: Mutex<Vec<(Vec<ChatMessage>, Option<CompletionOptions>)>>,
    }

    impl ScriptedProvider {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<(Vec<ChatMessage>, Option<CompletionOptions>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        fn max_context_length(&self) -> usize {
            8192
        }

        async fn complete(&self, prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            self.chat(&[ChatMessage::user(prompt)], None).await
        }

        async fn complete_with_options(
            &self,
            prompt: &str,
            options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.chat(&[ChatMessage::user(prompt)], Some(options)).await
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((messages.to_vec(), options.cloned()));
            match self.reply {
                Reply::Text(text) => {
                    let mut response = LLMResponse::new(text, "scripted-1");
                    response.prompt_tokens = 120;
                    response.completion_tokens = 30;
                    Ok(response)
                }
                Reply::Fail => Err(LlmError::RateLimited("slow down".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(LLMResponse::new("too late", "scripted-1"))
                }
            }
        }
    }

    fn converter_with(provider: Arc<ScriptedProvider>) -> LlmSegmentConverter {
        let config = ConversionConfig::builder()
            .temperature(0.2)
            .max_tokens(512)
            .api_timeout_secs(5)
            .image_detail("high")
            .build()
            .unwrap();
        let text: Arc<dyn LLMProvider> = provider.clone();
        let vision: Arc<dyn LLMProvider> = provider;
        LlmSegmentConverter::new(text, vision, &config)
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[tokio::test]
    async fn table_request_is_prompt_plus_raw_latex() {
        let provider = ScriptedProvider::new(Reply::Text("Col: 1\n"));
        let converter = converter_with(Arc::clone(&provider));
        let raw = "\\begin{tabular}{c}Col\\\\1\\end{tabular}";

        let out = converter.convert_table(raw).await.unwrap();

        assert_eq!(out.text, "Col: 1\n");
        assert_eq!(out.input_tokens, 120);
        assert_eq!(out.output_tokens, 30);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let (messages, options) = &requests[0];
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.starts_with(TABLE_PROMPT));
        assert!(messages[0].content.ends_with(raw));
        assert!(messages[0].images.is_none());
        let options = options.as_ref().unwrap();
        assert_eq!(options.temperature, Some(0.2));
        assert_eq!(options.max_tokens, Some(512));
    }

    #[tokio::test]
    async fn image_request_carries_prompt_and_figure() {
        let provider = ScriptedProvider::new(Reply::Text("A red square."));
        let converter = converter_with(Arc::clone(&provider));

        let out = converter.convert_image(&png_bytes()).await.unwrap();
        assert_eq!(out.text, "A red square.");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let message = &requests[0].0[0];
        assert_eq!(message.content, IMAGE_PROMPT);
        let images = message.images.as_ref().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime_type, "image/png");
        assert_eq!(images[0].detail.as_deref(), Some("high"));
        assert!(!images[0].data.is_empty());
    }

    #[tokio::test]
    async fn model_output_is_returned_verbatim() {
        let provider = ScriptedProvider::new(Reply::Text("  not rows at all \n\n"));
        let converter = converter_with(provider);
        let out = converter.convert_table("x").await.unwrap();
        assert_eq!(out.text, "  not rows at all \n\n");
    }

    #[tokio::test]
    async fn provider_error_is_conversion_error() {
        let provider = ScriptedProvider::new(Reply::Fail);
        let converter = converter_with(Arc::clone(&provider));

        let err = converter.convert_table("x").await.unwrap_err();
        match err {
            Pdf2TxtError::Conversion { kind, detail } => {
                assert_eq!(kind, "table");
                assert!(detail.contains("slow down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider = ScriptedProvider::new(Reply::Hang);
        let converter = converter_with(Arc::clone(&provider));

        let err = converter.convert_image(&png_bytes()).await.unwrap_err();
        assert!(matches!(err, Pdf2TxtError::Conversion { kind: "image", .. }));
        assert_eq!(provider.requests().len(), 1);
    }

    #[test]
    fn build_options_follow_config() {
        let config = ConversionConfig::builder()
            .temperature(0.3)
            .max_tokens(1024)
            .build()
            .unwrap();
        let opts = build_options(config.temperature, config.max_tokens);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn default_options_are_deterministic() {
        let config = ConversionConfig::default();
        let opts = build_options(config.temperature, config.max_tokens);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn segment_output_from_str() {
        let out = SegmentOutput::from("Col: 1");
        assert_eq!(out.text, "Col: 1");
        assert_eq!(out.input_tokens, 0);
        assert_eq!(out.output_tokens, 0);
    }
}
