//! Configuration for a document processing run.
//!
//! Every knob lives in one immutable [`ProcessingConfig`] passed to
//! [`crate::process::process`] at call time. Stages read only the fields they
//! need; nothing is global.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::ProcessError;
use crate::pipeline::decode::DocumentDecoder;
use crate::pipeline::describe::ImageDescriber;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Default vision model for image descriptions.
pub const DEFAULT_DESCRIPTION_MODEL: &str = "gpt-4o-mini";

/// Upper bound accepted for [`ProcessingConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for one processing run.
///
/// Built via [`ProcessingConfig::builder()`] or [`ProcessingConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docbundle::{ProcessingConfig, TableMatchMode};
///
/// let config = ProcessingConfig::builder()
///     .enable_remote_services(false)
///     .table_mode(TableMatchMode::Fast)
///     .build()
///     .unwrap();
/// assert!(!config.descriptions_enabled());
/// ```
#[derive(Clone)]
pub struct ProcessingConfig {
    /// Allow calls to the remote image-analysis service. Default: true.
    pub enable_remote_services: bool,

    /// Ask the decoder to render page bitmaps. Default: true.
    ///
    /// Page images let the Image Extraction Stage crop a picture from its page
    /// when the decoder could not pull an embedded bitmap out directly.
    pub generate_page_images: bool,

    /// Run table-structure recognition and the Table Extraction Stage. Default: true.
    pub do_table_structure: bool,

    /// Run the Image Extraction Stage. Default: true.
    pub do_picture_extraction: bool,

    /// Request a description for each picture. Default: true.
    ///
    /// Only effective together with `enable_remote_services`.
    pub do_picture_description: bool,

    /// Ask the decoder to OCR bitmap-only regions. Default: true.
    pub do_ocr: bool,

    /// Table-structure accuracy, passed through to the decoder. Default: Accurate.
    pub table_mode: TableMatchMode,

    /// Match predicted table cells back to document text cells. Default: true.
    pub do_cell_matching: bool,

    /// Longest edge, in pixels, of rendered page images. Default: 2000.
    pub page_image_max_pixels: u32,

    /// Maximum in-flight description requests. Default: 4.
    ///
    /// Description calls are network-bound and independent, but the remote
    /// service rate-limits; lower this if you see `429` responses.
    pub concurrency: usize,

    /// Timeout per description call in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Extra attempts per failed description call, at most [`MAX_RETRIES`].
    /// Default: 0 (one attempt).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Vision model identifier. If None, uses [`DEFAULT_DESCRIPTION_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed describer. Takes precedence over every provider setting.
    pub describer: Option<Arc<dyn ImageDescriber>>,

    /// Pre-constructed decoder. If None, chosen from the input's extension.
    pub decoder: Option<Arc<dyn DocumentDecoder>>,

    /// Prompt sent with each image. If None, uses the built-in prompt.
    pub description_prompt: Option<String>,

    /// Maximum tokens per description. Default: 300.
    pub max_tokens: usize,

    /// Sampling temperature for descriptions. Default: 0.1.
    pub temperature: f32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress events receiver.
    pub progress_callback: Option<ProgressCallback>,

    /// Cancellation handle shared by every clone of this config.
    pub cancellation: CancelToken,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enable_remote_services: true,
            generate_page_images: true,
            do_table_structure: true,
            do_picture_extraction: true,
            do_picture_description: true,
            do_ocr: true,
            table_mode: TableMatchMode::default(),
            do_cell_matching: true,
            page_image_max_pixels: 2000,
            concurrency: 4,
            api_timeout_secs: 60,
            max_retries: 0,
            retry_backoff_ms: 500,
            model: None,
            provider_name: None,
            provider: None,
            describer: None,
            decoder: None,
            description_prompt: None,
            max_tokens: 300,
            temperature: 0.1,
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
            cancellation: CancelToken::new(),
        }
    }
}

impl fmt::Debug for ProcessingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfig")
            .field("enable_remote_services", &self.enable_remote_services)
            .field("generate_page_images", &self.generate_page_images)
            .field("do_table_structure", &self.do_table_structure)
            .field("do_picture_extraction", &self.do_picture_extraction)
            .field("do_picture_description", &self.do_picture_description)
            .field("do_ocr", &self.do_ocr)
            .field("table_mode", &self.table_mode)
            .field("do_cell_matching", &self.do_cell_matching)
            .field("concurrency", &self.concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("describer", &self.describer.as_ref().map(|d| d.name().to_string()))
            .field("decoder", &self.decoder.as_ref().map(|d| d.name().to_string()))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ProcessingConfig {
    /// Create a new builder for `ProcessingConfig`.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether the run will call the remote analysis collaborator.
    pub fn descriptions_enabled(&self) -> bool {
        self.enable_remote_services && self.do_picture_extraction && self.do_picture_description
    }

    /// The model used for descriptions.
    pub fn description_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_DESCRIPTION_MODEL)
    }
}

/// Builder for [`ProcessingConfig`].
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl fmt::Debug for ProcessingConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessingConfigBuilder {
    pub fn enable_remote_services(mut self, v: bool) -> Self {
        self.config.enable_remote_services = v;
        self
    }

    pub fn generate_page_images(mut self, v: bool) -> Self {
        self.config.generate_page_images = v;
        self
    }

    pub fn do_table_structure(mut self, v: bool) -> Self {
        self.config.do_table_structure = v;
        self
    }

    pub fn do_picture_extraction(mut self, v: bool) -> Self {
        self.config.do_picture_extraction = v;
        self
    }

    pub fn do_picture_description(mut self, v: bool) -> Self {
        self.config.do_picture_description = v;
        self
    }

    pub fn do_ocr(mut self, v: bool) -> Self {
        self.config.do_ocr = v;
        self
    }

    pub fn table_mode(mut self, mode: TableMatchMode) -> Self {
        self.config.table_mode = mode;
        self
    }

    pub fn do_cell_matching(mut self, v: bool) -> Self {
        self.config.do_cell_matching = v;
        self
    }

    pub fn page_image_max_pixels(mut self, px: u32) -> Self {
        self.config.page_image_max_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn describer(mut self, describer: Arc<dyn ImageDescriber>) -> Self {
        self.config.describer = Some(describer);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn DocumentDecoder>) -> Self {
        self.config.decoder = Some(decoder);
        self
    }

    pub fn description_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.description_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancellation(mut self, token: CancelToken) -> Self {
        self.config.cancellation = token;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, ProcessError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ProcessError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ProcessError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ProcessError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(ProcessError::InvalidConfig(format!(
                "max_retries must be ≤ {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Table-structure accuracy requested from the decoder.
///
/// Higher accuracy may change which regions are classified as tables; the
/// Table Extraction Stage itself behaves identically in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMatchMode {
    Fast,
    #[default]
    Accurate,
}

/// User-level cancellation handle.
///
/// Clones share state: cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_full_pipeline() {
        let c = ProcessingConfig::default();
        assert!(c.enable_remote_services);
        assert!(c.generate_page_images);
        assert!(c.do_table_structure);
        assert!(c.do_picture_description);
        assert_eq!(c.table_mode, TableMatchMode::Accurate);
        assert!(c.do_cell_matching);
        assert_eq!(c.max_retries, 0);
        assert_eq!(c.api_timeout_secs, 60);
        assert_eq!(c.description_model(), DEFAULT_DESCRIPTION_MODEL);
    }

    #[test]
    fn descriptions_need_remote_services() {
        let c = ProcessingConfig::builder()
            .enable_remote_services(false)
            .build()
            .unwrap();
        assert!(!c.descriptions_enabled());

        let c = ProcessingConfig::builder()
            .do_picture_extraction(false)
            .build()
            .unwrap();
        assert!(!c.descriptions_enabled());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = ProcessingConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, ProcessError::InvalidConfig(_)));
    }

    #[test]
    fn excessive_retries_rejected() {
        let err = ProcessingConfig::builder().max_retries(70).build().unwrap_err();
        assert!(matches!(err, ProcessError::InvalidConfig(ref m) if m.contains("max_retries")));
        assert!(ProcessingConfig::builder()
            .max_retries(MAX_RETRIES)
            .build()
            .is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ProcessingConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn debug_redacts_password() {
        let c = ProcessingConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("cancelled() should resolve")
            .expect("task should not panic");
    }
}
