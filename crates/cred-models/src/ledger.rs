use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Anchor,
    Did,
}

/// Idempotent: creating with an existing commitment returns the original
/// record unchanged. `blockNumber` is assigned strictly monotonically under
/// the ledger's single writer lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub commitment: String,
    pub doc_type: DocType,
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
    pub did_document: Option<serde_json::Value>,
}
