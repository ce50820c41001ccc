/*!
# cred-pipeline

`MessagePipeline`: at-least-once consumption with bounded retry, dead-letter
quarantine on exhaustion, and header redaction on every DLQ publish.

## Architectural Tenets
- Retry uses the platform's one fixed backoff formula —
  `min(maxBackoff, base * 2^(attempt-1)) * (1 + jitter * U[-1, 1])` — rather
  than a library's own strategy, since the formula is a stable, testable
  contract rather than an implementation detail.
- Header redaction happens inside the pipeline, not at the call site, the
  same way `cred_common::logging` redacts PII centrally rather than trusting
  every caller to remember.
- The state machine is explicit (`PipelineState`) so a caller (or the `cli`)
  can observe what a consumer loop is doing without polling internals.
*/

use async_trait::async_trait;
use chrono::Utc;
use cred_models::dlq::DlqEnvelope;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Processing,
    BackingOff,
    PublishingDlq,
    Crashed,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("handler error: {0}")]
    Handler(String),

    #[error("dlq sink error: {0}")]
    DlqSink(String),

    #[error("cancelled")]
    Cancelled,
}

/// A unit of work pulled off a topic. `headers` carries transport metadata;
/// anything matching the redaction pattern below is stripped before it can
/// reach a DLQ envelope or a log line.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub consumer_group: String,
    pub key: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

/// A handler failure. `Deserialization` means the payload never reached
/// business logic — it is never retried, goes straight to the DLQ, and is
/// recorded with `errorType = "DeserializationException"`. `Handler` is
/// everything else and is retried up to `maxAttempts` the usual way.
#[derive(Debug, Clone)]
pub enum HandlerError {
    Deserialization(String),
    Handler(String),
}

impl HandlerError {
    fn into_message(self) -> String {
        match self {
            HandlerError::Deserialization(m) | HandlerError::Handler(m) => m,
        }
    }
}

/// Business logic a pipeline drives. A handler is expected to deserialize
/// its own payload and return [`HandlerError::Deserialization`] if that
/// step fails, rather than letting a parse error masquerade as a retryable
/// business failure.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Result<(), HandlerError>;
}

/// Where exhausted messages land. Implemented by whatever sits behind the
/// pipeline's `<topic>.DLQ` — a broker client, a file, a test double.
#[async_trait]
pub trait DlqSink: Send + Sync {
    async fn publish(&self, envelope: DlqEnvelope) -> Result<(), String>;
}

/// Cooperative cancellation: checked between attempts, never interrupts a
/// handler call already in flight.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn redaction_pattern() -> Regex {
    Regex::new(r"(?i)^(authorization|token|secret|cookie|password|apikey|set-cookie|x-api-key|session)$").unwrap()
}

pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let pattern = redaction_pattern();
    headers
        .iter()
        .map(|(k, v)| {
            if pattern.is_match(k) {
                (k.clone(), "[REDACTED]".to_string())
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

/// `min(maxBackoff, base * 2^(attempt-1)) * (1 + jitter * U[-1, 1])`,
/// `attempt` is 1-indexed (the first retry after the initial failed attempt).
pub fn compute_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter_pct: f64) -> Duration {
    let exponential = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(62));
    let capped = exponential.min(max_ms) as f64;
    let jitter: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
    let jittered = capped * (1.0 + jitter_pct * jitter);
    Duration::from_millis(jittered.max(0.0) as u64)
}

pub struct MessagePipeline<H, D> {
    handler: H,
    dlq: D,
    max_attempts: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
    jitter_pct: f64,
    dlq_topic_suffix: String,
    state: std::sync::Mutex<PipelineState>,
}

impl<H: MessageHandler, D: DlqSink> MessagePipeline<H, D> {
    pub fn new(handler: H, dlq: D, config: &cred_common::config::DlqConfig) -> Self {
        Self {
            handler,
            dlq,
            max_attempts: config.max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
            jitter_pct: config.jitter_pct,
            dlq_topic_suffix: config.topic_suffix.clone(),
            state: std::sync::Mutex::new(PipelineState::Idle),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, s: PipelineState) {
        *self.state.lock().unwrap() = s;
    }

    /// Drives one message through the handler with bounded retry, publishing
    /// to the DLQ on exhaustion. At-least-once: a crash mid-retry leaves the
    /// message redelivered by whatever owns offset commits, never acked here.
    pub async fn process(&self, message: InboundMessage, cancel: &CancelToken) -> Result<(), PipelineError> {
        let mut attempt = 1u32;
        let mut last_error = String::new();
        let mut error_type = "HandlerError";

        loop {
            if cancel.is_cancelled() {
                self.set_state(PipelineState::Idle);
                return Err(PipelineError::Cancelled);
            }

            self.set_state(PipelineState::Processing);
            match self.handler.handle(&message).await {
                Ok(()) => {
                    self.set_state(PipelineState::Idle);
                    return Ok(());
                }
                Err(HandlerError::Deserialization(e)) => {
                    // Never retried: a payload that won't deserialize won't
                    // deserialize differently on the next attempt.
                    error_type = "DeserializationException";
                    last_error = e;
                    break;
                }
                Err(e @ HandlerError::Handler(_)) => {
                    last_error = e.into_message();
                    if attempt >= self.max_attempts {
                        break;
                    }
                    self.set_state(PipelineState::BackingOff);
                    let delay = compute_backoff(attempt, self.backoff_base_ms, self.backoff_max_ms, self.jitter_pct);
                    warn!(topic = %message.topic, attempt, ?delay, "retrying after handler failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }

        self.set_state(PipelineState::PublishingDlq);
        let envelope = DlqEnvelope {
            schema_version: 1,
            original_topic: message.topic.clone(),
            original_partition: message.partition,
            original_offset: message.offset,
            consumer_group: message.consumer_group.clone(),
            original_key: message.key.clone(),
            sanitized_headers: redact_headers(&message.headers),
            original_payload_base64: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &message.payload,
            ),
            error: last_error.clone(),
            error_type: error_type.to_string(),
            truncated_stack_trace: None,
            failed_at_utc: Utc::now(),
            attempt_count: attempt,
            dlq_message_id: cred_common::sha256_hex(
                format!("{}:{}:{}:{}", message.topic, message.partition, message.offset, last_error).as_bytes(),
            ),
        };

        match self.dlq.publish(envelope).await {
            Ok(()) => {
                self.set_state(PipelineState::Idle);
                Err(PipelineError::Handler(last_error))
            }
            Err(e) => {
                self.set_state(PipelineState::Crashed);
                error!(topic = %message.topic, error = %e, "failed to publish to dlq after exhausting retries");
                Err(PipelineError::DlqSink(e))
            }
        }
    }

    pub fn dlq_topic(&self, original_topic: &str) -> String {
        format!("{original_topic}{}", self.dlq_topic_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyHandler {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _message: &InboundMessage) -> Result<(), HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(HandlerError::Handler("transient failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct AlwaysFailHandler;
    #[async_trait]
    impl MessageHandler for AlwaysFailHandler {
        async fn handle(&self, _message: &InboundMessage) -> Result<(), HandlerError> {
            Err(HandlerError::Handler("permanent failure".to_string()))
        }
    }

    struct UndeserializableHandler;
    #[async_trait]
    impl MessageHandler for UndeserializableHandler {
        async fn handle(&self, _message: &InboundMessage) -> Result<(), HandlerError> {
            Err(HandlerError::Deserialization("invalid json".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingDlq {
        published: std::sync::Mutex<Vec<DlqEnvelope>>,
    }

    #[async_trait]
    impl DlqSink for RecordingDlq {
        async fn publish(&self, envelope: DlqEnvelope) -> Result<(), String> {
            self.published.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn config() -> cred_common::config::DlqConfig {
        cred_common::config::DlqConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..Default::default()
        }
    }

    fn sample_message() -> InboundMessage {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer xyz".to_string());
        headers.insert("trace-id".to_string(), "abc123".to_string());
        InboundMessage {
            topic: "identity.verified".to_string(),
            partition: 0,
            offset: 42,
            consumer_group: "cred-issuance".to_string(),
            key: Some("subject-1".to_string()),
            headers,
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_without_hitting_dlq() {
        let pipeline = MessagePipeline::new(
            FlakyHandler { fail_times: 2, calls: AtomicU32::new(0) },
            RecordingDlq::default(),
            &config(),
        );
        let result = pipeline.process(sample_message(), &CancelToken::new()).await;
        assert!(result.is_ok());
        assert!(pipeline.dlq.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_publish_to_dlq_with_redacted_headers() {
        let config = cred_common::config::DlqConfig { max_attempts: 2, ..config() };
        let pipeline = MessagePipeline::new(AlwaysFailHandler, RecordingDlq::default(), &config);
        let result = pipeline.process(sample_message(), &CancelToken::new()).await;
        assert!(result.is_err());

        let published = pipeline.dlq.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let entry = &published[0];
        assert_eq!(entry.sanitized_headers["Authorization"], "[REDACTED]");
        assert_eq!(entry.sanitized_headers["trace-id"], "abc123");
        assert_eq!(entry.attempt_count, 2);
    }

    #[tokio::test]
    async fn deserialization_failure_skips_retry_and_tags_dlq_entry() {
        let config = cred_common::config::DlqConfig { max_attempts: 5, ..config() };
        let pipeline = MessagePipeline::new(UndeserializableHandler, RecordingDlq::default(), &config);
        let result = pipeline.process(sample_message(), &CancelToken::new()).await;
        assert!(result.is_err());

        let published = pipeline.dlq.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let entry = &published[0];
        assert_eq!(entry.error_type, "DeserializationException");
        assert_eq!(entry.attempt_count, 1, "deserialization failures are never retried");
    }

    #[tokio::test]
    async fn cancellation_aborts_before_first_attempt() {
        let pipeline = MessagePipeline::new(AlwaysFailHandler, RecordingDlq::default(), &config());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = pipeline.process(sample_message(), &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn backoff_is_capped_and_grows_exponentially_before_the_cap() {
        for _ in 0..20 {
            let d1 = compute_backoff(1, 100, 10_000, 0.0);
            assert_eq!(d1.as_millis(), 100);
            let d3 = compute_backoff(3, 100, 10_000, 0.0);
            assert_eq!(d3.as_millis(), 400);
            let d_capped = compute_backoff(20, 100, 1_000, 0.0);
            assert_eq!(d_capped.as_millis(), 1_000);
        }
    }

    #[test]
    fn header_redaction_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("SESSION".to_string(), "abc".to_string());
        headers.insert("X-Api-Key".to_string(), "abc".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let redacted = redact_headers(&headers);
        assert_eq!(redacted["SESSION"], "[REDACTED]");
        assert_eq!(redacted["X-Api-Key"], "[REDACTED]");
        assert_eq!(redacted["content-type"], "application/json");
    }
}
