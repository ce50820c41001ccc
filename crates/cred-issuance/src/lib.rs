/*!
# cred-issuance

`IssuanceCore`: mints a commitment-bound credential, anchors its hash,
and emits `CredentialIssued` — only after the anchor is durably written.

## Architectural Tenets
- `subjectCommitment` is the only subject-binding material this crate ever
  sees; the `walletSecret` preimage never reaches it.
- Anchor-then-publish ordering is load-bearing: the global invariant "every
  commitment ever minted is anchored before `CredentialIssued`" is enforced
  by code order, not a comment.
- `vcJwt` is a compact three-part JWS built the same way
  `cred_identity::DetachedJws` builds one, but non-detached: the payload is
  the credential body itself so `VerificationCore` can parse claims directly
  out of the token.
*/

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use cred_common::error::{PlatformError, ReasonCode};
use cred_common::Result;
use cred_keys::KeyManager;
use cred_ledger::LedgerStore;
use cred_models::{Attestation, Credential, CredentialBody, CredentialIssued, CredentialSubject};
use cred_policy::PolicyRegistry;
use std::sync::Arc;
use tracing::info;

/// Hard ceiling regardless of what a policy's `defaultExpiry` claims.
const MAX_CREDENTIAL_LIFETIME: Duration = Duration::hours(72);

/// `credentialType` value the `age-boolean-v1` fallback verifier checks for.
const AGE_OVER_18_CREDENTIAL_TYPE: &str = "AgeOver18Credential";

/// Resolves the attestation backing an issuance request. Defined here rather
/// than depending on `cred-identity-session` directly, so the two cores stay
/// decoupled — the `cli` composition root wires a shared store that
/// implements both this and `cred_identity_session::AttestationStore`.
pub trait AttestationLookup: Send + Sync {
    fn find(&self, account_ref: &str, policy_id: &str) -> Result<Attestation>;
}

/// Persists issued credential rows (the record this crate mints, keyed by
/// `vcJwt`/`credentialHash`/`subjectCommitment`). A plain translate-to-
/// storage seam, not an active-record entity — callers that don't need
/// durability across restarts can use [`InMemoryCredentialRepository`].
pub trait CredentialRepository: Send + Sync {
    fn insert(&self, credential: &Credential) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCredentialRepository {
    rows: std::sync::Mutex<Vec<Credential>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

impl CredentialRepository for InMemoryCredentialRepository {
    fn insert(&self, credential: &Credential) -> Result<()> {
        self.rows.lock().unwrap().push(credential.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_credential_issued(&self, event: CredentialIssued);
}

pub struct IssuanceCore {
    attestations: Arc<dyn AttestationLookup>,
    keys: Arc<KeyManager>,
    ledger: Arc<dyn LedgerStore>,
    policies: Arc<PolicyRegistry>,
    credentials: Arc<dyn CredentialRepository>,
    events: Arc<dyn EventPublisher>,
}

impl IssuanceCore {
    pub fn new(
        attestations: Arc<dyn AttestationLookup>,
        keys: Arc<KeyManager>,
        ledger: Arc<dyn LedgerStore>,
        policies: Arc<PolicyRegistry>,
        credentials: Arc<dyn CredentialRepository>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { attestations, keys, ledger, policies, credentials, events }
    }

    pub async fn issue_credential(
        &self,
        account_ref: &str,
        policy_id: &str,
        subject_commitment: &str,
    ) -> Result<(String, DateTime<Utc>, DateTime<Utc>)> {
        let attestation = self.attestations.find(account_ref, policy_id)?;
        if !attestation.verified {
            return Err(PlatformError::business(ReasonCode::MissingAttribute));
        }
        if attestation.is_expired(Utc::now()) {
            return Err(PlatformError::business(ReasonCode::CredentialExpired));
        }

        let policy = self
            .policies
            .get_active(policy_id)
            .map_err(|e| PlatformError::with_context(ReasonCode::MissingField, e.to_string()))?;

        let current_key = self.keys.get_current()?;
        let issuer = current_key.key_id.clone();

        let issued_at = Utc::now();
        let policy_lifetime = parse_iso8601_duration(&policy.default_expiry).unwrap_or(MAX_CREDENTIAL_LIFETIME);
        let lifetime = policy_lifetime.min(MAX_CREDENTIAL_LIFETIME);
        let expires_at = issued_at + lifetime;

        // Only a verified attestation reaches this point (checked above), so
        // the boolean evidence this policy mints is always the affirmative
        // claim; there is no code path that issues an "ageOver18: false" VC.
        let credential_subject = CredentialSubject { age_over_18: true };
        let body = CredentialBody {
            policy_id: policy_id.to_string(),
            subject_commitment: subject_commitment.to_string(),
            issuer: issuer.clone(),
            issued_at,
            expires_at,
            credential_type: AGE_OVER_18_CREDENTIAL_TYPE.to_string(),
            credential_subject,
        };
        let vc_jwt = self.sign_credential_body(&body)?;

        let credential_hash = cred_common::sha256_hex(vc_jwt.as_bytes());
        let (_tx_id, _block_number) = self
            .ledger
            .create_anchor(&credential_hash, Some(serde_json::json!({"policyId": policy_id})))
            .await
            .map_err(|e| PlatformError::with_context(ReasonCode::LedgerUnavailable, e.to_string()))?;

        let credential = Credential {
            policy_id: policy_id.to_string(),
            subject_commitment: subject_commitment.to_string(),
            issuer,
            issued_at,
            expires_at,
            credential_type: AGE_OVER_18_CREDENTIAL_TYPE.to_string(),
            credential_subject,
            signature: vc_jwt.clone(),
        };
        self.credentials.insert(&credential)?;

        self.events
            .publish_credential_issued(CredentialIssued {
                account_ref: account_ref.to_string(),
                credential_hash: credential_hash.clone(),
                issued_at,
                expires_at,
            })
            .await;

        info!(policy_id, credential_hash = %credential_hash, "credential issued");
        Ok((vc_jwt, issued_at, expires_at))
    }

    /// Builds a compact JWS matching `cred_identity::DetachedJws`'s wire
    /// format (`kid` points at the issuer DID) so `VerificationCore` can
    /// verify it the same way against `KeyManager::get_verification_keys()`.
    fn sign_credential_body(&self, body: &CredentialBody) -> Result<String> {
        let header = serde_json::json!({"alg": "EdDSA", "typ": "JWT", "kid": format!("{}#key1", body.issuer)});
        let header_b64 = URL_SAFE_NO_PAD.encode(cred_common::canonical_json(&header)?);
        let payload_b64 = URL_SAFE_NO_PAD.encode(cred_common::canonical_json(body)?);
        let signing_input = format!("{header_b64}.{payload_b64}");
        let (_key_id, signature) = self.keys.sign_with_current(signing_input.as_bytes())?;
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.as_bytes());
        Ok(format!("{header_b64}.{payload_b64}.{sig_b64}"))
    }
}

/// Minimal `PTnH`/`PnD` parser covering the subset the platform's
/// `defaultExpiry` values use (e.g. `PT72H`). Anything else falls back to
/// the hard cap rather than guessing.
fn parse_iso8601_duration(s: &str) -> Option<Duration> {
    let rest = s.strip_prefix('P')?;
    let (date_part, time_part) = rest.split_once('T').unwrap_or((rest, ""));
    let mut total = Duration::zero();
    if !date_part.is_empty() {
        total = total + parse_designated(date_part, &[('D', 24), ('W', 24 * 7)])?;
    }
    if !time_part.is_empty() {
        total = total + parse_designated(time_part, &[('H', 1)])?;
    }
    Some(total)
}

fn parse_designated(s: &str, units: &[(char, i64)]) -> Option<Duration> {
    let mut total = Duration::zero();
    let mut num = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            num.push(c);
        } else if let Some((_, hours_per_unit)) = units.iter().find(|(u, _)| *u == c) {
            let n: i64 = num.parse().ok()?;
            total = total + Duration::hours(n * hours_per_unit);
            num.clear();
        } else {
            return None;
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cred_audit::AuditLog;
    use cred_ledger::FileLedgerStore;
    use cred_models::AssuranceLevel;

    struct FixedAttestation(Attestation);
    impl AttestationLookup for FixedAttestation {
        fn find(&self, _account_ref: &str, _policy_id: &str) -> Result<Attestation> {
            Ok(self.0.clone())
        }
    }

    struct RecordingPublisher(std::sync::Mutex<Vec<CredentialIssued>>);
    #[async_trait::async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish_credential_issued(&self, event: CredentialIssued) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn verified_attestation() -> Attestation {
        Attestation {
            id: "att-1".into(),
            policy_id: "age_over_18".into(),
            subject_id: "subject-1".into(),
            provider_id: "bankid".into(),
            verified: true,
            verified_at: Utc::now(),
            expires_at: None,
            assurance_level: AssuranceLevel::Substantial,
            policy_hash: "abc".into(),
            account_ref: Some("acct-1".into()),
            metadata: None,
        }
    }

    async fn core_with(
        ledger_dir: &tempfile::TempDir,
        attestation: Attestation,
    ) -> (IssuanceCore, Arc<RecordingPublisher>, Arc<InMemoryCredentialRepository>) {
        let audit = Arc::new(AuditLog::new());
        let keys = Arc::new(KeyManager::new("Ed25519", 3600, audit.clone()));
        let ledger: Arc<dyn LedgerStore> =
            Arc::new(FileLedgerStore::open(ledger_dir.path().join("ledger.json")).await.unwrap());
        let policies = Arc::new(PolicyRegistry::new(keys.clone(), audit));
        policies
            .create(cred_models::PolicyDefinition {
                policy_id: "age_over_18".into(),
                version: "1.0.0".into(),
                circuit_id: "age-over-18-v1".into(),
                verification_key_id: "vk1".into(),
                verification_key_fingerprint: "abc".into(),
                compatible_versions: "^1.0.0".into(),
                default_expiry: "PT72H".into(),
                public_signals_schema: vec![],
                status: cred_models::PolicyStatus::Active,
                deprecated_at: None,
                signature: None,
            })
            .unwrap();
        let publisher = Arc::new(RecordingPublisher(std::sync::Mutex::new(vec![])));
        let credentials = Arc::new(InMemoryCredentialRepository::new());
        let core = IssuanceCore::new(
            Arc::new(FixedAttestation(attestation)),
            keys,
            ledger,
            policies,
            credentials.clone(),
            publisher.clone(),
        );
        (core, publisher, credentials)
    }

    #[tokio::test]
    async fn issues_credential_anchors_before_publishing_event() {
        let dir = tempfile::tempdir().unwrap();
        let (core, publisher, credentials) = core_with(&dir, verified_attestation()).await;
        let (vc_jwt, issued_at, expires_at) = core
            .issue_credential("acct-1", "age_over_18", "commitment-abc")
            .await
            .unwrap();

        assert_eq!(vc_jwt.split('.').count(), 3);
        assert!(expires_at - issued_at <= MAX_CREDENTIAL_LIFETIME);
        assert_eq!(publisher.0.lock().unwrap().len(), 1);
        assert_eq!(credentials.len(), 1, "issued credential must be persisted");
    }

    #[tokio::test]
    async fn duplicate_commitment_reuses_existing_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _publisher, _credentials) = core_with(&dir, verified_attestation()).await;
        core.issue_credential("acct-1", "age_over_18", "same-commitment").await.unwrap();
        let result = core.issue_credential("acct-1", "age_over_18", "same-commitment").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unverified_attestation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut attestation = verified_attestation();
        attestation.verified = false;
        let (core, _publisher, _credentials) = core_with(&dir, attestation).await;
        let err = core.issue_credential("acct-1", "age_over_18", "c").await.unwrap_err();
        assert_eq!(err.reason_code(), Some(ReasonCode::MissingAttribute));
    }

    #[test]
    fn parses_simple_hour_duration() {
        assert_eq!(parse_iso8601_duration("PT72H"), Some(Duration::hours(72)));
    }
}
