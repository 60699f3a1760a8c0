//! Model client façade.
//!
//! Wraps a text-in/text-out transport with the retry, deadline, and
//! JSON-extraction contract the tiers rely on. Transport-class failures
//! are retried with jittered exponential backoff; schema failures are not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use forecourt_core::client::{ModelClient, ModelError, ModelOutput, ModelRequest};

use crate::backoff::{BackoffConfig, BackoffState};

const MAX_OUTPUT_LOG_CHARS: usize = 2_000;

/// Transport-layer errors, classified for the retry policy.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Worth retrying: connect failures, 5xx, timeouts.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Not worth retrying: auth failures, bad requests.
    #[error("fatal transport error: {0}")]
    Fatal(String),
}

/// Raw generative transport behind the façade.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError>;
}

#[async_trait]
impl<T: ModelTransport + ?Sized> ModelTransport for std::sync::Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError> {
        (**self).complete(prompt).await
    }
}

/// Façade retry/deadline policy.
#[derive(Debug, Clone)]
pub struct ModelFacadeConfig {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    /// Wall-clock cap per `generate` call, all retries included.
    pub call_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for ModelFacadeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout: Duration::from_millis(12_000),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Retrying, cancellation-aware model client.
pub struct ModelFacade<T: ModelTransport> {
    transport: T,
    config: ModelFacadeConfig,
}

impl<T: ModelTransport> ModelFacade<T> {
    pub fn new(transport: T, config: ModelFacadeConfig) -> Self {
        Self { transport, config }
    }

    fn call_budget(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => self
                .config
                .call_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.config.call_timeout,
        }
    }

    async fn attempt_loop(&self, request: &ModelRequest) -> Result<ModelOutput, ModelError> {
        let mut backoff = BackoffState::new(self.config.backoff.clone());
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts.max(1) {
            match self.transport.complete(&request.prompt).await {
                Ok(text) => {
                    debug!(
                        attempt,
                        output = %truncate_for_log(&text, MAX_OUTPUT_LOG_CHARS),
                        "model transport responded"
                    );
                    let text = if request.want_json {
                        extract_json(&text).ok_or_else(|| {
                            ModelError::Malformed(
                                "no balanced JSON object in model output".to_string(),
                            )
                        })?
                    } else {
                        text
                    };
                    return Ok(ModelOutput {
                        text,
                        retried: attempt > 1,
                    });
                }
                Err(TransportError::Fatal(message)) => {
                    return Err(ModelError::Unavailable(message));
                }
                Err(TransportError::Transient(message)) => {
                    last_error = message;
                    if attempt == self.config.max_attempts.max(1) {
                        break;
                    }
                    let delay = backoff.next_backoff();
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "model transport failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = request.cancel.cancelled() => return Err(ModelError::Cancelled),
                    }
                }
            }
        }

        Err(ModelError::Unavailable(format!(
            "retries exhausted: {last_error}"
        )))
    }
}

#[async_trait]
impl<T: ModelTransport> ModelClient for ModelFacade<T> {
    async fn generate(&self, request: ModelRequest) -> Result<ModelOutput, ModelError> {
        if request.cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let budget = self.call_budget(request.deadline);
        if budget.is_zero() {
            return Err(ModelError::Unavailable("call deadline elapsed".to_string()));
        }

        tokio::select! {
            outcome = tokio::time::timeout(budget, self.attempt_loop(&request)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::Unavailable(format!(
                        "call exceeded {}ms budget",
                        budget.as_millis()
                    ))),
                }
            }
            _ = request.cancel.cancelled() => Err(ModelError::Cancelled),
        }
    }
}

/// Extract the first balanced JSON object from `text`, tolerating leading
/// and trailing prose.
pub fn extract_json(text: &str) -> Option<String> {
    for (start, ch) in text.char_indices() {
        if ch != '{' {
            continue;
        }
        if let Some(end) = find_json_object_end(text, start) {
            let candidate = &text[start..=end];
            if serde_json::from_str::<serde_json::Value>(candidate)
                .map(|v| v.is_object())
                .unwrap_or(false)
            {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn find_json_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        let abs = start + idx;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    return Some(abs);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

/// HTTP transport config (OpenAI-compatible chat endpoint)
#[derive(Debug, Clone)]
pub struct HttpModelTransportConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl Default for HttpModelTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Transport over an OpenAI-compatible chat-completions API.
pub struct HttpModelTransport {
    client: reqwest::Client,
    config: HttpModelTransportConfig,
}

impl HttpModelTransport {
    pub fn new(config: HttpModelTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Fatal(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[async_trait]
impl ModelTransport for HttpModelTransport {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError> {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.config.temperature,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, text);
            return if status.is_server_error() {
                Err(TransportError::Transient(message))
            } else {
                Err(TransportError::Fatal(message))
            };
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TransportError::Transient("missing choices".to_string()))
    }
}

struct MockRoute {
    marker: String,
    responses: VecDeque<String>,
}

/// Deterministic transport for tests and demos.
///
/// Responses are routed by prompt substring; a route's last response is
/// sticky once its queue drains. Transient failures and artificial delays
/// can be injected ahead of the scripted responses.
#[derive(Default)]
pub struct MockModelTransport {
    routes: Mutex<Vec<MockRoute>>,
    fallback: Mutex<Option<String>>,
    transient_failures: AtomicU32,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
}

impl MockModelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script responses for prompts containing `marker`, served in order.
    pub fn route(self, marker: impl Into<String>, responses: Vec<&str>) -> Self {
        self.routes.lock().expect("mock lock").push(MockRoute {
            marker: marker.into(),
            responses: responses.into_iter().map(String::from).collect(),
        });
        self
    }

    /// Response for prompts no route matches.
    pub fn fallback(self, response: impl Into<String>) -> Self {
        *self.fallback.lock().expect("mock lock") = Some(response.into());
        self
    }

    /// Fail the next `count` calls with a transient transport error.
    pub fn fail_transient(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Sleep before answering, for deadline tests.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().expect("mock lock") = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelTransport for MockModelTransport {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().expect("mock lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failures = self.transient_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.transient_failures.store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Transient("injected failure".to_string()));
        }

        let mut routes = self.routes.lock().expect("mock lock");
        for route in routes.iter_mut() {
            if !prompt.contains(&route.marker) {
                continue;
            }
            let response = if route.responses.len() > 1 {
                route.responses.pop_front()
            } else {
                route.responses.front().cloned()
            };
            if let Some(response) = response {
                return Ok(response);
            }
        }
        drop(routes);

        self.fallback
            .lock()
            .expect("mock lock")
            .clone()
            .ok_or_else(|| TransportError::Fatal(format!("no scripted response for: {prompt}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade(transport: MockModelTransport) -> ModelFacade<MockModelTransport> {
        ModelFacade::new(
            transport,
            ModelFacadeConfig {
                max_attempts: 3,
                call_timeout: Duration::from_secs(5),
                backoff: BackoffConfig {
                    floor_ms: 1,
                    ceiling_ms: 2,
                    jitter: 0.0,
                    multiplier: 2.0,
                },
            },
        )
    }

    #[test]
    fn test_extract_json_ignores_non_json_braces() {
        let raw = r#"Preface {not json} -> {"complexity":"simple"} trailing"#;
        assert_eq!(extract_json(raw).unwrap(), r#"{"complexity":"simple"}"#);
    }

    #[test]
    fn test_extract_json_handles_braces_inside_strings() {
        let raw = r#"noise {"summary":"value with } brace"} end"#;
        assert_eq!(
            extract_json(raw).unwrap(),
            r#"{"summary":"value with } brace"}"#
        );
    }

    #[test]
    fn test_extract_json_none_when_absent() {
        assert!(extract_json("no objects here").is_none());
        assert!(extract_json("{unbalanced").is_none());
    }

    #[test]
    fn test_transient_failures_retried_and_flagged() {
        tokio_test::block_on(async {
            let transport = MockModelTransport::new()
                .fallback(r#"{"ok":true}"#)
                .fail_transient(2);
            let facade = facade(transport);

            let output = facade
                .generate(ModelRequest::json("any prompt"))
                .await
                .unwrap();
            assert!(output.retried);
            assert_eq!(output.text, r#"{"ok":true}"#);
        });
    }

    #[test]
    fn test_retries_exhaust_to_unavailable() {
        tokio_test::block_on(async {
            let transport = MockModelTransport::new()
                .fallback(r#"{"ok":true}"#)
                .fail_transient(3);
            let facade = facade(transport);

            let result = facade.generate(ModelRequest::new("any prompt")).await;
            assert!(matches!(result, Err(ModelError::Unavailable(_))));
        });
    }

    #[test]
    fn test_want_json_rejects_prose_only_output() {
        tokio_test::block_on(async {
            let transport = MockModelTransport::new().fallback("sorry, plain words only");
            let facade = facade(transport);

            let result = facade.generate(ModelRequest::json("any prompt")).await;
            assert!(matches!(result, Err(ModelError::Malformed(_))));
        });
    }

    #[test]
    fn test_deadline_caps_slow_transport() {
        tokio_test::block_on(async {
            let transport = MockModelTransport::new()
                .fallback(r#"{"ok":true}"#)
                .with_delay(Duration::from_secs(10));
            let facade = facade(transport);

            let request = ModelRequest::new("any prompt")
                .with_deadline(Some(Instant::now() + Duration::from_millis(50)));
            let started = Instant::now();
            let result = facade.generate(request).await;
            assert!(matches!(result, Err(ModelError::Unavailable(_))));
            assert!(started.elapsed() < Duration::from_secs(2));
        });
    }

    #[test]
    fn test_cancellation_aborts_call() {
        tokio_test::block_on(async {
            let transport = MockModelTransport::new()
                .fallback(r#"{"ok":true}"#)
                .with_delay(Duration::from_secs(10));
            let facade = facade(transport);

            let request = ModelRequest::new("any prompt");
            let cancel = request.cancel.clone();
            let handle = tokio::spawn(async move { facade.generate(request).await });
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();

            let result = handle.await.unwrap();
            assert!(matches!(result, Err(ModelError::Cancelled)));
        });
    }

    #[test]
    fn test_routes_serve_in_order_and_stick() {
        tokio_test::block_on(async {
            let transport = MockModelTransport::new().route("Analyze", vec!["first", "second"]);
            assert_eq!(transport.complete("Analyze this").await.unwrap(), "first");
            assert_eq!(transport.complete("Analyze this").await.unwrap(), "second");
            // Last response sticks once the queue drains.
            assert_eq!(transport.complete("Analyze this").await.unwrap(), "second");
        });
    }
}
