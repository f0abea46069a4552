//! Vision inference: send one image to the model and get text back.
//!
//! [`AnalysisClient`] owns the retry policy; [`VisionBackend`] is the seam to
//! the actual endpoint so the policy can be exercised without a network.
//!
//! ## Retry Strategy
//!
//! Every failure class (provider error, timeout, empty answer) is retried the
//! same way. After failed attempt `n` (1-based) with attempts remaining the
//! client sleeps `retry_backoff_ms * 2^n`: with the 1 s default and three
//! attempts the waits are 2 s → 4 s, then the last error is reported.

use crate::config::PipelineConfig;
use crate::error::{BackendError, DocScanError};
use crate::output::ImagePayload;
use crate::prompts::ANALYSIS_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Everything one inference call needs.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub image: &'a ImagePayload,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A vision-capable inference endpoint.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Submit the image with the prompt and return the model's free-text answer.
    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<String, BackendError>;
}

// ── LLM provider backend ─────────────────────────────────────────────────

/// [`VisionBackend`] over any `edgequake_llm` provider.
///
/// The request is a system message holding the prompt followed by a user
/// message with the image attached at `detail: high` and no text.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Resolve a provider from `config` and the environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DocScanError> {
        resolve_provider(config).map(Self::new)
    }
}

#[async_trait]
impl VisionBackend for LlmBackend {
    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<String, BackendError> {
        let image = ImageData::new(request.image.data.clone(), request.image.mime_type.clone())
            .with_detail("high");
        let messages = vec![
            ChatMessage::system(request.prompt),
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| BackendError::Provider(e.to_string()))?;
        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A provider picked by name, before it is built.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NamedProvider {
    name: String,
    model: String,
}

/// Pick a named provider from config, then the environment.
///
/// Order: `config.provider_name` (with `config.model` or the default model),
/// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are non-empty,
/// then OpenAI when `OPENAI_API_KEY` is non-empty. `None` leaves the choice
/// to [`ProviderFactory::from_env`].
fn pick_named_provider(
    config: &PipelineConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Option<NamedProvider> {
    let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    let configured_model = || {
        config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    };

    if let Some(name) = &config.provider_name {
        return Some(NamedProvider {
            name: name.clone(),
            model: configured_model(),
        });
    }
    if let (Some(name), Some(model)) = (var("EDGEQUAKE_LLM_PROVIDER"), var("EDGEQUAKE_MODEL")) {
        return Some(NamedProvider { name, model });
    }
    var("OPENAI_API_KEY").map(|_| NamedProvider {
        name: "openai".to_string(),
        model: configured_model(),
    })
}

/// Resolve the vision provider for `config`.
///
/// A pre-built `config.provider` wins; otherwise a named provider is picked
/// (see `pick_named_provider`) and built, falling back to
/// [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, DocScanError> {
    if let Some(provider) = &config.provider {
        return Ok(Arc::clone(provider));
    }

    match pick_named_provider(config, |key| std::env::var(key).ok()) {
        Some(NamedProvider { name, model }) => {
            debug!("Using vision provider {} / {}", name, model);
            ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
                DocScanError::ProviderNotConfigured {
                    provider: name,
                    hint: e.to_string(),
                }
            })
        }
        None => ProviderFactory::from_env()
            .map(|(llm, _embedding)| llm)
            .map_err(|e| DocScanError::ProviderNotConfigured {
                provider: "auto".to_string(),
                hint: format!(
                    "nothing detected in the environment ({e}); set OPENAI_API_KEY \
                     or ANTHROPIC_API_KEY, or pass --provider"
                ),
            }),
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Calls a [`VisionBackend`] under bounded retries with exponential backoff.
pub struct AnalysisClient {
    backend: Arc<dyn VisionBackend>,
    prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_attempts: u32,
    retry_backoff_ms: u64,
    api_timeout: Duration,
}

impl AnalysisClient {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| ANALYSIS_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_attempts: config.max_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }

    /// Obtain the model's raw answer for `image`.
    ///
    /// # Errors
    /// [`DocScanError::AnalysisFailed`] once every attempt has failed.
    pub async fn analyze(&self, image: &ImagePayload) -> Result<String, DocScanError> {
        let request = InferenceRequest {
            image,
            prompt: &self.prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let start = Instant::now();
        let mut last_err = BackendError::EmptyResponse;

        for attempt in 1..=self.max_attempts {
            match self.attempt(&request).await {
                Ok(text) => {
                    info!(
                        "Analysis succeeded on attempt {}/{} in {:?}",
                        attempt,
                        self.max_attempts,
                        start.elapsed()
                    );
                    return Ok(text);
                }
                Err(e) => {
                    warn!("Attempt {}/{} failed — {}", attempt, self.max_attempts, e);
                    last_err = e;
                }
            }

            if attempt < self.max_attempts {
                let backoff = self.backoff_for(attempt);
                warn!("Retrying in {}ms", backoff.as_millis());
                sleep(backoff).await;
            }
        }

        Err(DocScanError::AnalysisFailed {
            attempts: self.max_attempts,
            last_error: last_err.to_string(),
        })
    }

    async fn attempt(&self, request: &InferenceRequest<'_>) -> Result<String, BackendError> {
        let text = timeout(self.api_timeout, self.backend.infer(request))
            .await
            .map_err(|_| BackendError::Timeout {
                secs: self.api_timeout.as_secs(),
            })??;
        if text.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant as TokioInstant;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    /// Replays scripted outcomes and records when each call happened.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: Mutex<Vec<TokioInstant>>,
        seen_prompt: Mutex<Option<String>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                seen_prompt: Mutex::new(None),
            })
        }

        fn call_times(&self) -> Vec<TokioInstant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        async fn infer(&self, request: &InferenceRequest<'_>) -> Result<String, BackendError> {
            self.calls.lock().unwrap().push(TokioInstant::now());
            *self.seen_prompt.lock().unwrap() = Some(request.prompt.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(BackendError::Provider("script exhausted".into())))
        }
    }

    /// Never answers within any sensible timeout.
    struct HangingBackend;

    #[async_trait]
    impl VisionBackend for HangingBackend {
        async fn infer(&self, _request: &InferenceRequest<'_>) -> Result<String, BackendError> {
            sleep(Duration::from_secs(3600)).await;
            Ok("too late".into())
        }
    }

    fn image() -> ImagePayload {
        ImagePayload {
            mime_type: "image/png".into(),
            data: "iVBORw0KGgo=".into(),
            width: Some(1),
            height: Some(1),
        }
    }

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_gap(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn client(backend: Arc<dyn VisionBackend>) -> AnalysisClient {
        AnalysisClient::new(backend, &PipelineConfig::default())
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let c = client(ScriptedBackend::new(vec![]));
        assert_eq!(c.backoff_for(1), Duration::from_secs(2));
        assert_eq!(c.backoff_for(2), Duration::from_secs(4));
        assert_eq!(c.backoff_for(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fail_succeed_waits_two_then_four_seconds() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Provider("503 Service Unavailable".into())),
            Err(BackendError::Provider("429 Too Many Requests".into())),
            Ok(r#"{"title":"x"}"#.into()),
        ]);
        let text = assert_ok!(client(backend.clone()).analyze(&image()).await);
        assert_eq!(text, r#"{"title":"x"}"#);

        let times = backend.call_times();
        assert_eq!(times.len(), 3);
        assert_gap(times[1] - times[0], Duration::from_secs(2));
        assert_gap(times[2] - times[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_last_error() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Provider("first".into())),
            Err(BackendError::Provider("second".into())),
            Err(BackendError::Provider("third".into())),
        ]);
        let err = assert_err!(client(backend.clone()).analyze(&image()).await);
        match err {
            DocScanError::AnalysisFailed { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("third"), "got: {last_error}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_is_retried() {
        let backend = ScriptedBackend::new(vec![Ok("   \n".into()), Ok("answer".into())]);
        let text = assert_ok!(client(backend.clone()).analyze(&image()).await);
        assert_eq!(text, "answer");
        assert_eq!(backend.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_per_attempt() {
        let config = PipelineConfig::builder()
            .max_attempts(2)
            .api_timeout_secs(5)
            .build()
            .unwrap();
        let c = AnalysisClient::new(Arc::new(HangingBackend), &config);

        let started = TokioInstant::now();
        let err = assert_err!(c.analyze(&image()).await);
        assert!(err.to_string().contains("timed out after 5s"), "got: {err}");
        // 5 s + 2 s backoff + 5 s
        assert_gap(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test]
    async fn single_attempt_does_not_sleep() {
        let config = PipelineConfig::builder().max_attempts(1).build().unwrap();
        let backend = ScriptedBackend::new(vec![Err(BackendError::EmptyResponse)]);
        let c = AnalysisClient::new(backend.clone(), &config);
        let err = assert_err!(c.analyze(&image()).await);
        assert!(matches!(err, DocScanError::AnalysisFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn custom_prompt_is_sent() {
        let config = PipelineConfig::builder()
            .system_prompt("Describe this.")
            .build()
            .unwrap();
        let backend = ScriptedBackend::new(vec![Ok("ok".into())]);
        let c = AnalysisClient::new(backend.clone(), &config);
        assert_ok!(c.analyze(&image()).await);
        assert_eq!(
            backend.seen_prompt.lock().unwrap().as_deref(),
            Some("Describe this.")
        );
    }

    // ── Provider selection ──

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn picked(name: &str, model: &str) -> Option<NamedProvider> {
        Some(NamedProvider {
            name: name.into(),
            model: model.into(),
        })
    }

    #[test]
    fn configured_provider_name_beats_environment() {
        let config = PipelineConfig::builder()
            .provider_name("anthropic")
            .model("claude-3-5-haiku")
            .build()
            .unwrap();
        let env = env_of(&[("EDGEQUAKE_LLM_PROVIDER", "ollama"), ("EDGEQUAKE_MODEL", "llava")]);
        assert_eq!(pick_named_provider(&config, env), picked("anthropic", "claude-3-5-haiku"));
    }

    #[test]
    fn provider_name_without_model_uses_default_model() {
        let config = PipelineConfig::builder().provider_name("openai").build().unwrap();
        assert_eq!(pick_named_provider(&config, env_of(&[])), picked("openai", DEFAULT_MODEL));
    }

    #[test]
    fn edgequake_env_pair_needs_both_values() {
        let config = PipelineConfig::default();
        let both = env_of(&[("EDGEQUAKE_LLM_PROVIDER", "ollama"), ("EDGEQUAKE_MODEL", "llava")]);
        assert_eq!(pick_named_provider(&config, both), picked("ollama", "llava"));

        let half = env_of(&[("EDGEQUAKE_LLM_PROVIDER", "ollama"), ("EDGEQUAKE_MODEL", " ")]);
        assert_eq!(pick_named_provider(&config, half), None);
    }

    #[test]
    fn openai_key_selects_openai() {
        let config = PipelineConfig::builder().model("gpt-4o").build().unwrap();
        let env = env_of(&[("OPENAI_API_KEY", "sk-test")]);
        assert_eq!(pick_named_provider(&config, env), picked("openai", "gpt-4o"));
        assert_eq!(pick_named_provider(&config, env_of(&[("OPENAI_API_KEY", "")])), None);
    }
}
