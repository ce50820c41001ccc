/*!
# cred-verification

`PluginRegistry` + `VerificationCore`: dispatches a presentation to the
verifier registered for its `presentationType`, then runs the shared
envelope/policy/signature checks before handing off to evidence-specific
binding and proof verification.

## Architectural Tenets
- Steps 1-4 and 9 of the verification algorithm are universal and live on
  `VerificationCore` itself; only the evidence-specific steps (5-8 for the
  zk flow, a single claim check for the boolean fallback) are plugin code —
  mirrors the teacher's dispatch-by-kind pattern with a shared pre/post.
- No silent allow: an unresolvable plugin, a malformed envelope, a
  non-verifying signature, a failed binding, or a backend timeout all reach
  step 9 and get audited; only the happy path also publishes
  `CredentialVerified`.
*/

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cred_audit::AuditLog;
use cred_common::error::{PlatformError, ReasonCode};
use cred_common::Result;
use cred_identity::DetachedJws;
use cred_keys::KeyManager;
use cred_models::{
    CredentialBody, CredentialVerified, Groth16Proof, PolicyDefinition, PolicyStatus, VerificationRequest,
    VerificationResult,
};
use cred_policy::PolicyRegistry;
use cred_zkp::ProofVerifierClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const CLOCK_SKEW_TOLERANCE: Duration = Duration::minutes(5);
const MIN_NONCE_HEX_LEN: usize = 64;
const MIN_PUBLIC_SIGNALS: usize = 7;
const SUPPORTED_PROTOCOL_MAJOR: &str = "1";

#[derive(Deserialize)]
struct CommonClaims {
    expires_at: DateTime<Utc>,
    #[serde(default)]
    issuer: Option<String>,
}

/// Evidence-specific half of the algorithm (steps 5-8, or the boolean
/// fallback's single check). Everything universal has already passed by the
/// time this is called.
#[async_trait]
pub trait PresentationVerifier: Send + Sync {
    async fn verify_evidence(
        &self,
        request: &VerificationRequest,
        claims_payload: &[u8],
        zkp: &dyn ProofVerifierClient,
    ) -> Result<()>;

    fn evidence_type(&self) -> &'static str;
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn PresentationVerifier>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, presentation_type: impl Into<String>, verifier: Arc<dyn PresentationVerifier>) {
        self.plugins.insert(presentation_type.into(), verifier);
    }

    pub fn get(&self, presentation_type: &str) -> Option<Arc<dyn PresentationVerifier>> {
        self.plugins.get(presentation_type).cloned()
    }
}

/// The zk-SNARK presentation flow: commitment binding, replay binding,
/// policy binding, then Groth16 proof verification.
pub struct Groth16PresentationVerifier;

#[async_trait]
impl PresentationVerifier for Groth16PresentationVerifier {
    async fn verify_evidence(
        &self,
        request: &VerificationRequest,
        claims_payload: &[u8],
        zkp: &dyn ProofVerifierClient,
    ) -> Result<()> {
        let body: CredentialBody = serde_json::from_slice(claims_payload)
            .map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))?;

        let signals = &request.presentation.public_signals;
        if signals.len() < MIN_PUBLIC_SIGNALS {
            return Err(PlatformError::business(ReasonCode::MissingField));
        }

        if body.subject_commitment != signals[2] {
            return Err(PlatformError::business(ReasonCode::BindingMismatch));
        }

        let expected_challenge_hash = zkp.hash(&request.challenge);
        let challenge_hash = cred_zkp::public_signal_to_hex(&signals[0])
            .map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))?;
        if challenge_hash != expected_challenge_hash {
            return Err(PlatformError::business(ReasonCode::ReplayDetected));
        }

        let expected_policy_hash = zkp.hash_policy(&request.policy_id);
        let policy_hash = cred_zkp::public_signal_to_hex(&signals[1])
            .map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))?;
        if policy_hash != expected_policy_hash {
            return Err(PlatformError::business(ReasonCode::PolicyMismatch));
        }

        let proof_bytes = decode_proof(&request.presentation.proof)?;
        let hex_signals: std::result::Result<Vec<String>, _> =
            signals.iter().map(|s| cred_zkp::public_signal_to_hex(s)).collect();
        let hex_signals =
            hex_signals.map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))?;

        match zkp.verify(&proof_bytes, &hex_signals).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PlatformError::business(ReasonCode::ProofInvalid)),
            Err(cred_zkp::ZkpError::Timeout(_)) | Err(cred_zkp::ZkpError::Backend(_)) => {
                Err(PlatformError::business(ReasonCode::ZkpServiceUnavailable))
            }
            Err(e) => Err(PlatformError::with_context(ReasonCode::ProofInvalid, e.to_string())),
        }
    }

    fn evidence_type(&self) -> &'static str {
        "zk-groth16-v1"
    }
}

fn decode_proof(proof: &Groth16Proof) -> Result<cred_zkp::Groth16ProofBytes> {
    cred_zkp::decode_wire_proof(proof).map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))
}

#[derive(Deserialize)]
struct BooleanCredentialSubject {
    #[serde(rename = "ageOver18")]
    age_over_18: bool,
}

#[derive(Deserialize)]
struct BooleanCredentialBody {
    #[serde(rename = "credentialType")]
    credential_type: String,
    #[serde(rename = "credentialSubject")]
    credential_subject: BooleanCredentialSubject,
}

/// `age-boolean-v1`: no zero-knowledge proof, just a boolean claim inside the
/// VC itself. Skips commitment/replay/policy binding and proof verification.
pub struct BooleanVcVerifier;

#[async_trait]
impl PresentationVerifier for BooleanVcVerifier {
    async fn verify_evidence(
        &self,
        _request: &VerificationRequest,
        claims_payload: &[u8],
        _zkp: &dyn ProofVerifierClient,
    ) -> Result<()> {
        let body: BooleanCredentialBody = serde_json::from_slice(claims_payload)
            .map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))?;
        if body.credential_type == "AgeOver18Credential" && body.credential_subject.age_over_18 {
            Ok(())
        } else {
            Err(PlatformError::business(ReasonCode::ProofInvalid))
        }
    }

    fn evidence_type(&self) -> &'static str {
        "age-boolean-v1"
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_credential_verified(&self, event: CredentialVerified);
}

pub struct VerificationCore {
    plugins: Arc<PluginRegistry>,
    policies: Arc<PolicyRegistry>,
    keys: Arc<KeyManager>,
    zkp: Arc<dyn ProofVerifierClient>,
    audit: Arc<AuditLog>,
    events: Arc<dyn EventPublisher>,
    expected_origin: String,
}

impl VerificationCore {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        policies: Arc<PolicyRegistry>,
        keys: Arc<KeyManager>,
        zkp: Arc<dyn ProofVerifierClient>,
        audit: Arc<AuditLog>,
        events: Arc<dyn EventPublisher>,
        expected_origin: impl Into<String>,
    ) -> Self {
        Self { plugins, policies, keys, zkp, audit, events, expected_origin: expected_origin.into() }
    }

    pub async fn verify(&self, request: &VerificationRequest) -> VerificationResult {
        match self.run(request).await {
            Ok(issuer) => {
                self.record_outcome(request, "accepted", &[], Some(issuer.clone()));
                self.events
                    .publish_credential_verified(CredentialVerified {
                        account_ref: None,
                        valid: true,
                        issuer: Some(issuer.clone()),
                        failure_reason: None,
                        verified_at: Utc::now(),
                    })
                    .await;
                VerificationResult {
                    valid: true,
                    reason_codes: vec![],
                    evidence_type: self.evidence_type_of(request),
                    issuer: Some(issuer),
                    timestamp_utc: Utc::now(),
                }
            }
            Err(err) => {
                let reason = err.reason_code().map(|r| r.as_str().to_string()).unwrap_or_else(|| "SYSTEM_ERROR".into());
                self.record_outcome(request, "rejected", &[reason.clone()], None);
                self.events
                    .publish_credential_verified(CredentialVerified {
                        account_ref: None,
                        valid: false,
                        issuer: None,
                        failure_reason: Some(reason.clone()),
                        verified_at: Utc::now(),
                    })
                    .await;
                VerificationResult {
                    valid: false,
                    reason_codes: vec![reason],
                    evidence_type: self.evidence_type_of(request),
                    issuer: None,
                    timestamp_utc: Utc::now(),
                }
            }
        }
    }

    fn evidence_type_of(&self, request: &VerificationRequest) -> String {
        self.plugins
            .get(&request.presentation_type)
            .map(|p| p.evidence_type().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn record_outcome(&self, request: &VerificationRequest, outcome: &str, reasons: &[String], issuer: Option<String>) {
        let _ = self.audit.append(
            self.keys.as_ref(),
            "presentation.verified",
            None,
            Some(request.policy_id.clone()),
            outcome,
            issuer.into_iter().chain(reasons.iter().cloned()).collect(),
        );
    }

    async fn run(&self, request: &VerificationRequest) -> Result<String> {
        // 1. PluginRegistry dispatch.
        let plugin = self
            .plugins
            .get(&request.presentation_type)
            .ok_or_else(|| PlatformError::business(ReasonCode::UnsupportedPresentation))?;

        // 2. Envelope validation.
        self.validate_envelope(request)?;

        // 3. Policy lookup.
        let policy = self
            .policies
            .get_policy(&request.policy_id, Some(&request.presentation.policy_version))
            .map_err(|_| PlatformError::business(ReasonCode::MissingField))?;
        match policy.status {
            PolicyStatus::Blocked => return Err(PlatformError::business(ReasonCode::PolicyMismatch)),
            PolicyStatus::Active | PolicyStatus::Deprecated => {}
        }

        // 4. VC signature & expiration.
        let claims_payload = self.verify_vc_jws(&request.presentation.vc_jwt)?;
        let issuer = self.check_not_expired(&claims_payload)?;

        // 5-8 (or the boolean fallback's single check), delegated to the plugin.
        plugin.verify_evidence(request, &claims_payload, self.zkp.as_ref()).await?;

        Ok(issuer.unwrap_or(policy.verification_key_id.clone()))
    }

    fn validate_envelope(&self, request: &VerificationRequest) -> Result<()> {
        let presentation = &request.presentation;
        if presentation.protocol_version.split('.').next() != Some(SUPPORTED_PROTOCOL_MAJOR) {
            return Err(PlatformError::business(ReasonCode::UnsupportedProtocolVersion));
        }
        if presentation.origin != self.expected_origin {
            return Err(PlatformError::business(ReasonCode::OriginMismatch));
        }
        let now = Utc::now().timestamp();
        if (now - presentation.issued_at).abs() > CLOCK_SKEW_TOLERANCE.num_seconds() {
            return Err(PlatformError::business(ReasonCode::ClockSkew));
        }
        if presentation.nonce.len() < MIN_NONCE_HEX_LEN || hex::decode(&presentation.nonce).is_err() {
            return Err(PlatformError::business(ReasonCode::MissingField));
        }
        if presentation.public_signals.len() < MIN_PUBLIC_SIGNALS {
            return Err(PlatformError::business(ReasonCode::MissingField));
        }
        self.policies
            .enforce_minimum(&request.policy_id, &presentation.policy_version)
            .map_err(|_| PlatformError::business(ReasonCode::DowngradeRejected))?;
        Ok(())
    }

    fn verify_vc_jws(&self, vc_jwt: &str) -> Result<Vec<u8>> {
        let jws = DetachedJws(vc_jwt.to_string());
        jws.verify(|kid| {
            let did = kid.split('#').next().unwrap_or(kid);
            let verifiable = self.keys.get_verification_keys();
            if verifiable.iter().any(|k| k.key_id == did) {
                cred_identity::public_key_from_did(&cred_identity::IdentityId::new(did.to_string()))
            } else {
                Err(cred_identity::IdentityError::InvalidDid(format!("no verifiable key for {did}")))
            }
        })
        .map_err(|_| PlatformError::business(ReasonCode::VcSignatureInvalid))
    }

    fn check_not_expired(&self, claims_payload: &[u8]) -> Result<Option<String>> {
        let claims: CommonClaims = serde_json::from_slice(claims_payload)
            .map_err(|e| PlatformError::with_context(ReasonCode::MalformedPresentation, e.to_string()))?;
        if Utc::now() >= claims.expires_at {
            return Err(PlatformError::business(ReasonCode::VcExpired));
        }
        Ok(claims.issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_snark::SNARK;
    use cred_models::{PresentationEnvelope, VerificationRequest};

    struct RecordingPublisher(std::sync::Mutex<Vec<CredentialVerified>>);
    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish_credential_verified(&self, event: CredentialVerified) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn registries() -> (Arc<KeyManager>, Arc<AuditLog>, Arc<PolicyRegistry>) {
        let audit = Arc::new(AuditLog::new());
        let keys = Arc::new(KeyManager::new("Ed25519", 3600, audit.clone()));
        let policies = Arc::new(PolicyRegistry::new(keys.clone(), audit.clone()));
        policies
            .create(PolicyDefinition {
                policy_id: "age_over_18".into(),
                version: "1.0.0".into(),
                circuit_id: "age-over-18-v1".into(),
                verification_key_id: "vk1".into(),
                verification_key_fingerprint: "abc".into(),
                compatible_versions: "^1.0.0".into(),
                default_expiry: "PT72H".into(),
                public_signals_schema: vec![],
                status: PolicyStatus::Active,
                deprecated_at: None,
                signature: None,
            })
            .unwrap();
        (keys, audit, policies)
    }

    fn boolean_vc_jwt(keys: &KeyManager, age_over_18: bool, expires_at: DateTime<Utc>) -> String {
        let current = keys.get_current().unwrap();
        let payload = serde_json::json!({
            "credentialType": "AgeOver18Credential",
            "credentialSubject": {"ageOver18": age_over_18},
            "expires_at": expires_at,
        });
        let header = serde_json::json!({"alg": "EdDSA", "typ": "JWT", "kid": format!("{}#key1", current.key_id)});
        let header_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            serde_json::to_vec(&header).unwrap(),
        );
        let payload_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            serde_json::to_vec(&payload).unwrap(),
        );
        let signing_input = format!("{header_b64}.{payload_b64}");
        let (_kid, sig) = keys.sign_with_current(signing_input.as_bytes()).unwrap();
        let sig_b64 = base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, sig.as_bytes());
        format!("{header_b64}.{payload_b64}.{sig_b64}")
    }

    fn request_with(vc_jwt: String, presentation_type: &str) -> VerificationRequest {
        VerificationRequest {
            contract_version: "1.0".into(),
            policy_id: "age_over_18".into(),
            presentation_type: presentation_type.into(),
            presentation: PresentationEnvelope {
                protocol_version: "1.0".into(),
                policy_id: "age_over_18".into(),
                policy_version: "1.0.0".into(),
                origin: "https://relying-party.example".into(),
                nonce: "a".repeat(64),
                issued_at: Utc::now().timestamp(),
                proof: Groth16Proof {
                    pi_a: ["0".into(), "0".into(), "1".into()],
                    pi_b: [["0".into(), "0".into()], ["0".into(), "0".into()], ["1".into(), "0".into()]],
                    pi_c: ["0".into(), "0".into(), "1".into()],
                },
                public_signals: vec!["0".into(); 7],
                credential_hash: "h".into(),
                policy_hash: "p".into(),
                signature: None,
                vc_jwt,
            },
            challenge: "challenge-abc".into(),
            context: None,
        }
    }

    fn core(keys: Arc<KeyManager>, audit: Arc<AuditLog>, policies: Arc<PolicyRegistry>) -> (VerificationCore, Arc<RecordingPublisher>) {
        let mut registry = PluginRegistry::new();
        registry.register("age-boolean-v1", Arc::new(BooleanVcVerifier));
        registry.register("zk-groth16-v1", Arc::new(Groth16PresentationVerifier));
        let zkp: Arc<dyn ProofVerifierClient> = Arc::new(cred_zkp::Groth16VerifierClient::new(
            sample_verifying_key(),
            std::time::Duration::from_secs(1),
        ));
        let publisher = Arc::new(RecordingPublisher(std::sync::Mutex::new(vec![])));
        let core = VerificationCore::new(
            Arc::new(registry),
            policies,
            keys,
            zkp,
            audit,
            publisher.clone(),
            "https://relying-party.example",
        );
        (core, publisher)
    }

    fn sample_verifying_key() -> ark_groth16::VerifyingKey<ark_bn254::Bn254> {
        use ark_std::rand::SeedableRng;
        struct TrivialCircuit;
        impl ark_relations::r1cs::ConstraintSynthesizer<ark_bn254::Fr> for TrivialCircuit {
            fn generate_constraints(
                self,
                cs: ark_relations::r1cs::ConstraintSystemRef<ark_bn254::Fr>,
            ) -> std::result::Result<(), ark_relations::r1cs::SynthesisError> {
                let a = cs.new_witness_variable(|| Ok(ark_bn254::Fr::from(1u64)))?;
                cs.enforce_constraint(ark_relations::lc!() + a, ark_relations::lc!() + a, ark_relations::lc!() + a)?;
                Ok(())
            }
        }
        let mut rng = ark_std::rand::rngs::StdRng::seed_from_u64(1);
        ark_groth16::Groth16::<ark_bn254::Bn254>::circuit_specific_setup(TrivialCircuit, &mut rng)
            .unwrap()
            .1
    }

    #[tokio::test]
    async fn boolean_vc_presentation_is_accepted() {
        let (keys, audit, policies) = registries();
        let vc_jwt = boolean_vc_jwt(&keys, true, Utc::now() + Duration::hours(1));
        let (core, publisher) = core(keys, audit, policies);
        let request = request_with(vc_jwt, "age-boolean-v1");

        let result = core.verify(&request).await;
        assert!(result.valid, "{:?}", result.reason_codes);
        assert_eq!(publisher.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_vc_is_rejected() {
        let (keys, audit, policies) = registries();
        let vc_jwt = boolean_vc_jwt(&keys, true, Utc::now() - Duration::hours(1));
        let (core, _publisher) = core(keys, audit, policies);
        let request = request_with(vc_jwt, "age-boolean-v1");

        let result = core.verify(&request).await;
        assert!(!result.valid);
        assert_eq!(result.reason_codes, vec!["VC_EXPIRED"]);
    }

    #[tokio::test]
    async fn false_age_claim_is_rejected() {
        let (keys, audit, policies) = registries();
        let vc_jwt = boolean_vc_jwt(&keys, false, Utc::now() + Duration::hours(1));
        let (core, _publisher) = core(keys, audit, policies);
        let request = request_with(vc_jwt, "age-boolean-v1");

        let result = core.verify(&request).await;
        assert!(!result.valid);
        assert_eq!(result.reason_codes, vec!["PROOF_INVALID"]);
    }

    #[tokio::test]
    async fn unknown_presentation_type_is_rejected() {
        let (keys, audit, policies) = registries();
        let vc_jwt = boolean_vc_jwt(&keys, true, Utc::now() + Duration::hours(1));
        let (core, _publisher) = core(keys, audit, policies);
        let request = request_with(vc_jwt, "nonsense-v9");

        let result = core.verify(&request).await;
        assert!(!result.valid);
        assert_eq!(result.reason_codes, vec!["UNSUPPORTED_PRESENTATION"]);
    }

    #[tokio::test]
    async fn origin_mismatch_is_rejected() {
        let (keys, audit, policies) = registries();
        let vc_jwt = boolean_vc_jwt(&keys, true, Utc::now() + Duration::hours(1));
        let (core, _publisher) = core(keys, audit, policies);
        let mut request = request_with(vc_jwt, "age-boolean-v1");
        request.presentation.origin = "https://evil.example".into();

        let result = core.verify(&request).await;
        assert!(!result.valid);
        assert_eq!(result.reason_codes, vec!["ORIGIN_MISMATCH"]);
    }
}
