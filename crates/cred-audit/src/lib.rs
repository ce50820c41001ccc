/*!
# cred-audit

Append-only, signed audit log. Entries never contain PII, raw challenges,
raw JWTs, or session bodies — only outcome and reason codes.

## Architectural Tenets
- Signature covers the canonical JSON of the entry minus the signature field.
- `AuditLog` depends on a `Signer` trait, never on a concrete key manager —
  the spec's KeyManager-writes-audit-entries / AuditLog-signed-by-KeyManager
  relationship would otherwise be a dependency cycle; this crate only knows
  about signing and verification capability, not who provides it.
- Any key that reports `can_verify` for a signature's `signerKeyId` is
  accepted (mirroring the multi-signer acceptance `icn-identity::QuorumProof`
  demonstrates), since a deprecated key within its grace period must still
  validate older entries.
*/

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use cred_identity::{public_key_from_did, verify_signature, IdentityId, Signature};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("signature verification failed for entry {0}")]
    SignatureInvalid(String),

    #[error("unknown signer key: {0}")]
    UnknownSigner(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// A capability to produce the current signature over audit-entry payloads.
/// Implemented by `cred-keys::KeyManager` so this crate never depends on it.
pub trait AuditSigner: Send + Sync {
    /// The signer identity (a `did:key` string) entries should be attributed to.
    fn current_signer_did(&self) -> IdentityId;
    fn sign(&self, payload: &[u8]) -> Signature;
}

/// A capability to resolve whether a given signer DID is currently allowed
/// to verify (i.e. `CanVerify`), implemented by `cred-keys::KeyManager`.
pub trait VerifierKeyProvider: Send + Sync {
    fn can_verify(&self, signer_did: &IdentityId) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub topic: String,
    pub subject_id: Option<String>,
    pub policy_id: Option<String>,
    pub outcome: String,
    pub reason_codes: Vec<String>,
    pub timestamp_utc: DateTime<Utc>,
    pub signer_did: String,
    pub signature: String,
}

/// The fields covered by the signature — everything in [`AuditEntry`] except
/// `signature` itself.
#[derive(Debug, Clone, Serialize)]
struct SignablePayload<'a> {
    id: &'a str,
    topic: &'a str,
    subject_id: &'a Option<String>,
    policy_id: &'a Option<String>,
    outcome: &'a str,
    reason_codes: &'a [String],
    timestamp_utc: DateTime<Utc>,
    signer_did: &'a str,
}

impl AuditEntry {
    fn signable_payload(&self) -> AuditResult<Vec<u8>> {
        let payload = SignablePayload {
            id: &self.id,
            topic: &self.topic,
            subject_id: &self.subject_id,
            policy_id: &self.policy_id,
            outcome: &self.outcome,
            reason_codes: &self.reason_codes,
            timestamp_utc: self.timestamp_utc,
            signer_did: &self.signer_did,
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    pub fn verify(&self, keys: &dyn VerifierKeyProvider) -> AuditResult<bool> {
        let signer = IdentityId::new(self.signer_did.clone());
        if !keys.can_verify(&signer) {
            return Err(AuditError::UnknownSigner(self.signer_did.clone()));
        }
        let _ = public_key_from_did(&signer)
            .map_err(|_| AuditError::UnknownSigner(self.signer_did.clone()))?;
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(&self.signature)
            .map_err(|_| AuditError::SignatureInvalid(self.id.clone()))?;
        let payload = self.signable_payload()?;
        Ok(verify_signature(&payload, &Signature::new(sig_bytes), &signer)
            .unwrap_or(false))
    }
}

/// Summary produced by [`AuditLog::verify_all`], modeled on the
/// traverse-and-report shape of a DAG lineage audit sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditVerificationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: Vec<String>,
}

/// In-process append-only audit log. Persistence beyond the process lifetime
/// is a concern of whatever owns the `Vec` snapshot this type exposes
/// read-only access to — database schema is explicitly out of scope.
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Builds, signs, and appends a new entry. Returns the appended entry.
    pub fn append(
        &self,
        signer: &dyn AuditSigner,
        topic: impl Into<String>,
        subject_id: Option<String>,
        policy_id: Option<String>,
        outcome: impl Into<String>,
        reason_codes: Vec<String>,
    ) -> AuditResult<AuditEntry> {
        let signer_did = signer.current_signer_did();
        let mut entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            subject_id,
            policy_id,
            outcome: outcome.into(),
            reason_codes,
            timestamp_utc: Utc::now(),
            signer_did: signer_did.to_string(),
            signature: String::new(),
        };
        let payload = entry.signable_payload()?;
        let signature = signer.sign(&payload);
        entry.signature = URL_SAFE_NO_PAD.encode(signature.as_bytes());

        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Replays every entry and reports which signatures the given key
    /// provider can still verify. Operator tooling surfaced by the `cli`.
    pub fn verify_all(&self, keys: &dyn VerifierKeyProvider) -> AuditVerificationReport {
        let entries = self.entries();
        let mut report = AuditVerificationReport {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match entry.verify(keys) {
                Ok(true) => report.valid += 1,
                _ => report.invalid.push(entry.id.clone()),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cred_identity::IdentityKeyPair;

    struct FixedSigner(IdentityKeyPair);

    impl AuditSigner for FixedSigner {
        fn current_signer_did(&self) -> IdentityId {
            self.0.did().clone()
        }

        fn sign(&self, payload: &[u8]) -> Signature {
            self.0.sign(payload)
        }
    }

    struct AllowAll;
    impl VerifierKeyProvider for AllowAll {
        fn can_verify(&self, _signer_did: &IdentityId) -> bool {
            true
        }
    }

    struct AllowNone;
    impl VerifierKeyProvider for AllowNone {
        fn can_verify(&self, _signer_did: &IdentityId) -> bool {
            false
        }
    }

    #[test]
    fn appended_entry_verifies_against_its_signer() {
        let signer = FixedSigner(IdentityKeyPair::generate());
        let log = AuditLog::new();
        let entry = log
            .append(&signer, "policy.status_changed", None, Some("age_over_18".into()), "applied", vec![])
            .unwrap();

        assert!(entry.verify(&AllowAll).is_ok());
        assert!(entry.verify(&AllowAll).unwrap());
    }

    #[test]
    fn entries_never_carry_pii_fields() {
        let signer = FixedSigner(IdentityKeyPair::generate());
        let log = AuditLog::new();
        let entry = log
            .append(&signer, "identity.verified", Some("subject-abc".into()), None, "success", vec![])
            .unwrap();

        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("dateOfBirth"));
        assert!(!json.contains("nationalId"));
    }

    #[test]
    fn tampered_entry_fails_verification() {
        let signer = FixedSigner(IdentityKeyPair::generate());
        let log = AuditLog::new();
        let mut entry = log
            .append(&signer, "policy.status_changed", None, None, "applied", vec![])
            .unwrap();
        entry.outcome = "tampered".to_string();

        assert!(!entry.verify(&AllowAll).unwrap());
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let signer = FixedSigner(IdentityKeyPair::generate());
        let log = AuditLog::new();
        let entry = log.append(&signer, "t", None, None, "applied", vec![]).unwrap();

        assert!(matches!(entry.verify(&AllowNone), Err(AuditError::UnknownSigner(_))));
    }

    #[test]
    fn verify_all_reports_counts() {
        let signer = FixedSigner(IdentityKeyPair::generate());
        let log = AuditLog::new();
        log.append(&signer, "a", None, None, "ok", vec![]).unwrap();
        log.append(&signer, "b", None, None, "ok", vec![]).unwrap();

        let report = log.verify_all(&AllowAll);
        assert_eq!(report.total, 2);
        assert_eq!(report.valid, 2);
        assert!(report.invalid.is_empty());
    }
}
