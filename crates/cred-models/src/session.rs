use serde::{Deserialize, Serialize};

/// Exists only in `SessionCache`; removed on first successful consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub provider_id: String,
    /// Internal correlation id generated at `Start`, independent of the
    /// hub's own `sessionId`.
    pub external_reference: uuid::Uuid,
    pub account_ref: Option<String>,
    pub ttl_secs: i64,
}
