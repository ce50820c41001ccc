use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dead-letter envelope published to `<topic>.DLQ` after retries are
/// exhausted or a message cannot be deserialized. `dlqMessageId` is a
/// deterministic hash so redelivered/duplicate DLQ publishes are detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub schema_version: u32,
    pub original_topic: String,
    pub original_partition: u32,
    pub original_offset: u64,
    pub consumer_group: String,
    pub original_key: Option<String>,
    /// Secrets redacted: keys matching
    /// `authorization|token|secret|cookie|password|apikey|set-cookie|x-api-key|session`
    /// (case-insensitive) are replaced by `[REDACTED]`.
    pub sanitized_headers: BTreeMap<String, String>,
    pub original_payload_base64: String,
    pub error: String,
    pub error_type: String,
    pub truncated_stack_trace: Option<String>,
    pub failed_at_utc: DateTime<Utc>,
    pub attempt_count: u32,
    pub dlq_message_id: String,
}
