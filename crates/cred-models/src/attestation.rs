use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssuranceLevel {
    Substantial,
    High,
    Unknown,
}

/// Created by `IdentitySessionCore`, never mutated in place (upserts replace
/// the mutable fields per the merge semantics in §4.6), deleted only by
/// explicit subject erasure. Contains no directly identifying attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub id: String,
    pub policy_id: String,
    /// Opaque provider-scoped pseudonym, <= 256 chars, URL-safe.
    pub subject_id: String,
    pub provider_id: String,
    pub verified: bool,
    pub verified_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub assurance_level: AssuranceLevel,
    pub policy_hash: String,
    pub account_ref: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Attestation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}
