use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published by `IdentitySessionCore::HandleCallback` after attestation
/// upsert. Carries no claims body, only the mapped, privacy-minimized fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityVerified {
    pub provider_id: String,
    pub subject_id: String,
    pub is_adult: bool,
    pub verified_at: DateTime<Utc>,
    pub assurance_level: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Published by `IssuanceCore::IssueCredential` only after the anchor is
/// durably written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialIssued {
    pub account_ref: String,
    pub credential_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Published by `VerificationCore::Verify` on a successful presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialVerified {
    pub account_ref: Option<String>,
    pub valid: bool,
    pub issuer: Option<String>,
    pub failure_reason: Option<String>,
    pub verified_at: DateTime<Utc>,
}

/// Tagged union of every event this platform publishes, used by
/// `cred-pipeline`'s in-memory bus so a single channel type can carry all
/// topics without downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum PlatformEvent {
    IdentityVerified(IdentityVerified),
    CredentialIssued(CredentialIssued),
    CredentialVerified(CredentialVerified),
}
