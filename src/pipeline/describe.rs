//! Remote picture descriptions.
//!
//! The vision model sits behind the [`ImageDescriber`] trait so the pipeline
//! can be driven by any provider (or a fake in tests). [`LlmDescriber`] is the
//! built-in implementation on top of `edgequake-llm`.
//!
//! ## Scheduling
//!
//! Requests for different pictures are independent. [`describe_all`] runs them
//! through `buffer_unordered(concurrency)`, each attempt under its own
//! timeout, and keys every result by the picture's [`ArtifactId`]; completion
//! order never matters.
//!
//! ## Retry Strategy
//!
//! One attempt by default. With `max_retries > 0`, failed or timed-out calls
//! are retried with exponential backoff (`retry_backoff_ms * 2^attempt`).
//! Authentication errors are never retried.

use crate::config::ProcessingConfig;
use crate::error::{ProcessError, RemoteServiceError, StageError};
use crate::output::{ArtifactId, ArtifactKind, ImageDescription, Stage};
use crate::pipeline::{encode, postprocess};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// One picture to describe.
#[derive(Debug, Clone)]
pub struct DescriptionRequest {
    pub artifact: ArtifactId,
    /// The persisted PNG bytes.
    pub png: Arc<[u8]>,
    pub prompt: String,
}

/// Text and usage returned by a describer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Description {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A remote analysis collaborator: bitmap + prompt in, text out.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn describe(&self, request: &DescriptionRequest) -> Result<Description, RemoteServiceError>;
}

/// Describer backed by an `edgequake-llm` vision provider.
pub struct LlmDescriber {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    label: String,
}

impl LlmDescriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ProcessingConfig) -> Self {
        let label = match config.provider_name.as_deref() {
            Some(name) => format!("{}/{}", name, config.description_model()),
            None => format!("llm/{}", config.description_model()),
        };
        Self {
            provider,
            options: build_options(config),
            label,
        }
    }
}

#[async_trait]
impl ImageDescriber for LlmDescriber {
    fn name(&self) -> &str {
        &self.label
    }

    async fn describe(&self, request: &DescriptionRequest) -> Result<Description, RemoteServiceError> {
        let messages = vec![ChatMessage::user_with_images(
            request.prompt.clone(),
            vec![encode::to_image_data(&request.png)],
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        Ok(Description {
            text: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Build `CompletionOptions` from the processing config.
fn build_options(config: &ProcessingConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Split provider errors into rejected credentials and everything else.
fn classify_error(message: &str) -> RemoteServiceError {
    let lower = message.to_lowercase();
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        RemoteServiceError::Auth(message.to_string())
    } else {
        RemoteServiceError::Api(message.to_string())
    }
}

// ── Describer resolution ─────────────────────────────────────────────────

/// Hosted providers and the variable holding their API key.
const CREDENTIAL_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("mistral", "MISTRAL_API_KEY"),
    ("xai", "XAI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("azure", "AZURE_OPENAI_API_KEY"),
];

fn credential_var(provider: &str) -> Option<&'static str> {
    CREDENTIAL_VARS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(provider))
        .map(|(_, var)| *var)
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Fail with `MissingCredential` when a required key is absent.
pub(crate) fn require_credential(var: &str, value: Option<String>) -> Result<String, ProcessError> {
    value.ok_or_else(|| ProcessError::MissingCredential {
        variable: var.to_string(),
    })
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ProcessError> {
    if let Some(var) = credential_var(provider_name) {
        require_credential(var, env_value(var))?;
    }
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ProcessError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the describer for a run, before any stage executes.
///
/// Returns `None` when descriptions are disabled. Otherwise, from most to
/// least specific:
///
/// 1. `config.describer`
/// 2. `config.provider`, wrapped in an [`LlmDescriber`]
/// 3. `config.provider_name` + model
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 5. OpenAI when `OPENAI_API_KEY` is set
/// 6. `ProviderFactory::from_env` when any other hosted key is set
///
/// A hosted provider whose API key is missing is reported as
/// [`ProcessError::MissingCredential`]; with no key at all the default
/// (OpenAI) credential is named.
pub fn resolve_describer(config: &ProcessingConfig) -> Result<Option<Arc<dyn ImageDescriber>>, ProcessError> {
    if !config.descriptions_enabled() {
        return Ok(None);
    }

    if let Some(ref describer) = config.describer {
        return Ok(Some(Arc::clone(describer)));
    }

    let provider = if let Some(ref provider) = config.provider {
        Arc::clone(provider)
    } else if let Some(ref name) = config.provider_name {
        create_vision_provider(name, config.description_model())?
    } else if let (Some(prov), Some(model)) = (
        env_value("EDGEQUAKE_LLM_PROVIDER"),
        env_value("EDGEQUAKE_MODEL"),
    ) {
        create_vision_provider(&prov, &model)?
    } else if env_value("OPENAI_API_KEY").is_some() {
        create_vision_provider("openai", config.description_model())?
    } else {
        if !CREDENTIAL_VARS.iter().any(|(_, var)| env_value(var).is_some()) {
            return Err(ProcessError::MissingCredential {
                variable: "OPENAI_API_KEY".to_string(),
            });
        }
        let (llm_provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| ProcessError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "No vision provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                    Error: {}",
                    e
                ),
            })?;
        llm_provider
    };

    let describer = LlmDescriber::new(provider, config);
    info!("Picture descriptions via {}", describer.name());
    Ok(Some(Arc::new(describer)))
}

// ── Running requests ─────────────────────────────────────────────────────

/// Outcome of describing one picture.
pub type DescriptionOutcome = Result<ImageDescription, StageError>;

/// Describe every request, at most `config.concurrency` at a time.
///
/// Every request gets exactly one entry in the returned map. Requests that
/// had not finished when the run was cancelled map to
/// [`StageError::Cancelled`].
pub async fn describe_all(
    describer: &Arc<dyn ImageDescriber>,
    requests: Vec<DescriptionRequest>,
    config: &ProcessingConfig,
) -> BTreeMap<ArtifactId, DescriptionOutcome> {
    let ids: Vec<ArtifactId> = requests.iter().map(|r| r.artifact).collect();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Descriptions, requests.len());
    }

    let mut results: BTreeMap<ArtifactId, DescriptionOutcome> =
        stream::iter(requests.into_iter().map(|request| {
            let describer = Arc::clone(describer);
            async move {
                let outcome = describe_one(describer.as_ref(), &request, config).await;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_description_complete(request.artifact, outcome.is_ok());
                }
                (request.artifact, outcome)
            }
        }))
        .buffer_unordered(config.concurrency.max(1))
        .take_until(config.cancellation.cancelled())
        .collect()
        .await;

    for id in ids {
        results.entry(id).or_insert_with(|| {
            Err(StageError::Cancelled {
                kind: ArtifactKind::Picture,
                index: id.index,
                stage: Stage::Descriptions,
            })
        });
    }
    results
}

/// Describe one picture with timeout and retry.
async fn describe_one(
    describer: &dyn ImageDescriber,
    request: &DescriptionRequest,
    config: &ProcessingConfig,
) -> DescriptionOutcome {
    let index = request.artifact.index;
    let start = Instant::now();
    let limit = Duration::from_secs(config.api_timeout_secs);
    let mut last_err = RemoteServiceError::Api("no attempt made".into());
    let mut attempts = 0u32;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = retry_delay_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Picture {}: retry {}/{} after {}ms",
                index, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        attempts += 1;

        let result = match timeout(limit, describer.describe(request)).await {
            Ok(r) => r,
            Err(_) => Err(RemoteServiceError::Timeout {
                secs: config.api_timeout_secs,
            }),
        };

        match result {
            Ok(description) => {
                let text = postprocess::clean_description(&description.text);
                if text.is_empty() {
                    warn!("Picture {}: attempt {} returned no text", index, attempts);
                    last_err = RemoteServiceError::Api("empty description".into());
                    continue;
                }
                let duration = start.elapsed();
                debug!(
                    "Picture {}: {} input tokens, {} output tokens, {:?}",
                    index, description.input_tokens, description.output_tokens, duration
                );
                return Ok(ImageDescription {
                    artifact: request.artifact,
                    text,
                    input_tokens: description.input_tokens,
                    output_tokens: description.output_tokens,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            Err(e) => {
                warn!("Picture {}: attempt {} failed: {}", index, attempts, e);
                let fatal = matches!(e, RemoteServiceError::Auth(_));
                last_err = e;
                if fatal {
                    break;
                }
            }
        }
    }

    match last_err {
        RemoteServiceError::Timeout { secs } => Err(StageError::DescriptionTimeout { index, secs }),
        other => Err(StageError::DescriptionFailed {
            index,
            attempts,
            detail: other.to_string(),
        }),
    }
}

/// Delay before retry `attempt` (1-based), doubling from `base_ms` and
/// saturating instead of overflowing.
fn retry_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CancelToken;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedDescriber {
        calls: AtomicU32,
        fail_first: u32,
        error: RemoteServiceError,
    }

    #[async_trait]
    impl ImageDescriber for ScriptedDescriber {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn describe(&self, request: &DescriptionRequest) -> Result<Description, RemoteServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(self.error.clone());
            }
            Ok(Description {
                text: format!("```\npicture {}\n```", request.artifact.index),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    fn scripted(fail_first: u32, error: RemoteServiceError) -> ScriptedDescriber {
        ScriptedDescriber {
            calls: AtomicU32::new(0),
            fail_first,
            error,
        }
    }

    fn request(index: usize) -> DescriptionRequest {
        DescriptionRequest {
            artifact: ArtifactId::picture(index),
            png: Arc::from(&b"png"[..]),
            prompt: "Describe.".into(),
        }
    }

    fn config(max_retries: u32) -> ProcessingConfig {
        ProcessingConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&ProcessingConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(300));
    }

    #[test]
    fn success_is_cleaned() {
        let d = scripted(0, RemoteServiceError::Api("x".into()));
        let out = tokio_test::block_on(describe_one(&d, &request(3), &config(0))).unwrap();
        assert_eq!(out.text, "picture 3");
        assert_eq!(out.artifact, ArtifactId::picture(3));
        assert_eq!((out.input_tokens, out.output_tokens), (10, 5));
    }

    #[test]
    fn single_attempt_by_default() {
        let d = scripted(1, RemoteServiceError::Api("503".into()));
        let err = tokio_test::block_on(describe_one(&d, &request(1), &config(0))).unwrap_err();
        assert_eq!(
            err,
            StageError::DescriptionFailed {
                index: 1,
                attempts: 1,
                detail: "503".into()
            }
        );
        assert_eq!(d.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_when_configured() {
        let d = scripted(2, RemoteServiceError::Api("429".into()));
        let out = describe_one(&d, &request(1), &config(2)).await;
        assert!(out.is_ok());
        assert_eq!(d.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let d = scripted(5, RemoteServiceError::Auth("401".into()));
        let err = describe_one(&d, &request(1), &config(3)).await.unwrap_err();
        assert!(matches!(err, StageError::DescriptionFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn describe_all_keys_by_artifact() {
        let d: Arc<dyn ImageDescriber> = Arc::new(scripted(0, RemoteServiceError::Api("x".into())));
        let results = describe_all(&d, vec![request(2), request(1)], &config(0)).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[&ArtifactId::picture(1)].as_ref().unwrap().text, "picture 1");
        assert_eq!(results[&ArtifactId::picture(2)].as_ref().unwrap().text, "picture 2");
    }

    #[tokio::test]
    async fn cancelled_requests_are_reported() {
        let token = CancelToken::new();
        token.cancel();
        let cfg = ProcessingConfig::builder().cancellation(token).build().unwrap();
        let d: Arc<dyn ImageDescriber> = Arc::new(scripted(0, RemoteServiceError::Api("x".into())));
        let results = describe_all(&d, vec![request(1)], &cfg).await;
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[&ArtifactId::picture(1)],
            Err(StageError::Cancelled {
                kind: ArtifactKind::Picture,
                index: 1,
                stage: Stage::Descriptions,
            })
        );
    }

    #[test]
    fn retry_delay_doubles_and_saturates() {
        assert_eq!(retry_delay_ms(500, 1), 500);
        assert_eq!(retry_delay_ms(500, 3), 2000);
        assert_eq!(retry_delay_ms(500, 70), u64::MAX);
        assert_eq!(retry_delay_ms(u64::MAX, 2), u64::MAX);
    }

    #[test]
    fn credential_required() {
        let err = require_credential("OPENAI_API_KEY", None).unwrap_err();
        assert!(matches!(
            err,
            ProcessError::MissingCredential { ref variable } if variable == "OPENAI_API_KEY"
        ));
        assert_eq!(require_credential("X", Some("k".into())).unwrap(), "k");
    }

    #[test]
    fn disabled_descriptions_need_no_provider() {
        let cfg = ProcessingConfig::builder()
            .enable_remote_services(false)
            .build()
            .unwrap();
        assert!(resolve_describer(&cfg).unwrap().is_none());
    }

    #[test]
    fn explicit_describer_wins() {
        let cfg = ProcessingConfig::builder()
            .describer(Arc::new(scripted(0, RemoteServiceError::Api("x".into()))))
            .build()
            .unwrap();
        let d = resolve_describer(&cfg).unwrap().unwrap();
        assert_eq!(d.name(), "scripted");
    }

    #[test]
    fn errors_classified() {
        assert!(matches!(
            classify_error("HTTP 401 Unauthorized"),
            RemoteServiceError::Auth(_)
        ));
        assert!(matches!(
            classify_error("connection reset"),
            RemoteServiceError::Api(_)
        ));
        assert_eq!(credential_var("OpenAI"), Some("OPENAI_API_KEY"));
        assert_eq!(credential_var("ollama"), None);
    }
}
