/*!
Wires the three cores together the way a real deployment's composition root
would, and bridges the one sideways seam between them: `cred-issuance`'s
`AttestationLookup` (keyed by `accountRef`) and `cred-identity-session`'s
`AttestationStore` (keyed by `providerId`/`subjectId`) are deliberately
separate traits so neither core crate depends on the other; [`SharedAttestationStore`]
is the adapter that satisfies both.
*/

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cred_audit::AuditLog;
use cred_common::error::{PlatformError, ReasonCode};
use cred_identity_session::{AttestationStore, ClaimsMapper, IdentitySessionCore, MappedClaims, StandardClaimsMapper};
use cred_issuance::{AttestationLookup, InMemoryCredentialRepository, IssuanceCore};
use cred_keys::KeyManager;
use cred_ledger::{FileLedgerStore, LedgerStore};
use cred_models::{Attestation, CredentialIssued, CredentialVerified, IdentityVerified, PolicyDefinition, PolicyStatus};
use cred_policy::PolicyRegistry;
use cred_session::SessionCache;
use ark_snark::SNARK;
use cred_verification::{BooleanVcVerifier, Groth16PresentationVerifier, PluginRegistry, VerificationCore};
use cred_zkp::{Groth16VerifierClient, ProofVerifierClient};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The `age_over_18` policy this CLI seeds by default, on the no-proof
/// `age-boolean-v1` evidence path — the only path a CLI without a real
/// circuit and trusted setup can demonstrate end to end.
pub const DEFAULT_POLICY_ID: &str = "age_over_18";
pub const DEFAULT_POLICY_VERSION: &str = "1.0.0";
const DEFAULT_PROVIDER_ID: &str = "bankid";

/// Satisfies `cred_identity_session::AttestationStore` (keyed by
/// provider/subject) and `cred_issuance::AttestationLookup` (keyed by
/// `accountRef`) over the same backing rows, so an identity session's
/// upsert is immediately visible to an issuance lookup once a wallet has
/// linked an `accountRef`.
pub struct SharedAttestationStore {
    inner: cred_identity_session::InMemoryAttestationStore,
    by_account_ref: Mutex<HashMap<(String, String), Attestation>>,
}

impl Default for SharedAttestationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedAttestationStore {
    pub fn new() -> Self {
        Self { inner: cred_identity_session::InMemoryAttestationStore::new(), by_account_ref: Mutex::new(HashMap::new()) }
    }
}

impl AttestationStore for SharedAttestationStore {
    fn upsert(&self, claims: &MappedClaims, policy_id: &str, account_ref: Option<&str>) -> cred_common::Result<Attestation> {
        let attestation = self.inner.upsert(claims, policy_id, account_ref)?;
        if let Some(account_ref) = account_ref {
            self.by_account_ref
                .lock()
                .unwrap()
                .insert((account_ref.to_string(), policy_id.to_string()), attestation.clone());
        }
        Ok(attestation)
    }
}

impl AttestationLookup for SharedAttestationStore {
    fn find(&self, account_ref: &str, policy_id: &str) -> cred_common::Result<Attestation> {
        self.by_account_ref
            .lock()
            .unwrap()
            .get(&(account_ref.to_string(), policy_id.to_string()))
            .cloned()
            .ok_or_else(|| PlatformError::business(ReasonCode::MissingAttribute))
    }
}

/// Logs every platform event at `info` instead of publishing to a real
/// broker — the operator tool's stand-in for the out-of-scope message bus.
pub struct LoggingEventPublisher;

#[async_trait]
impl cred_identity_session::EventPublisher for LoggingEventPublisher {
    async fn publish_identity_verified(&self, event: IdentityVerified) {
        tracing::info!(?event, "identity.verified");
    }
}

#[async_trait]
impl cred_issuance::EventPublisher for LoggingEventPublisher {
    async fn publish_credential_issued(&self, event: CredentialIssued) {
        tracing::info!(?event, "credential.issued");
    }
}

#[async_trait]
impl cred_verification::EventPublisher for LoggingEventPublisher {
    async fn publish_credential_verified(&self, event: CredentialVerified) {
        tracing::info!(?event, "credential.verified");
    }
}

/// Demo eID hub: always succeeds with a fixed, operator-supplied birth date.
/// A real `ProviderClient` talks to an eID hub; that's out of scope per the
/// platform's own non-goals, so the CLI substitutes this for its round trip.
pub struct DemoProviderClient {
    pub subject_id: String,
    pub date_of_birth: String,
}

#[async_trait]
impl cred_identity_session::ProviderClient for DemoProviderClient {
    async fn start_session(
        &self,
        _provider_id: &str,
        _account_ref: Option<&str>,
    ) -> cred_common::Result<cred_identity_session::StartedHubSession> {
        Ok(cred_identity_session::StartedHubSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            auth_url: "https://hub.example/auth".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::minutes(10),
        })
    }

    async fn fetch_session(
        &self,
        _provider_id: &str,
        _session_id: &str,
    ) -> cred_common::Result<cred_identity_session::HubSessionResponse> {
        Ok(cred_identity_session::HubSessionResponse {
            status: cred_identity_session::SessionState::Succeeded,
            claims: Some(serde_json::json!({
                "dateOfBirth": self.date_of_birth,
                "subject": {"id": self.subject_id},
            })),
        })
    }
}

/// A throwaway Groth16 verifying key for a single-constraint circuit. Stands
/// in for the real per-policy verifying key a trusted setup would produce;
/// generating and distributing that key is the out-of-scope prover's job.
fn placeholder_verifying_key() -> ark_groth16::VerifyingKey<ark_bn254::Bn254> {
    use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};
    use ark_std::rand::SeedableRng;

    struct PlaceholderCircuit;
    impl ConstraintSynthesizer<ark_bn254::Fr> for PlaceholderCircuit {
        fn generate_constraints(self, cs: ConstraintSystemRef<ark_bn254::Fr>) -> Result<(), SynthesisError> {
            let a = cs.new_witness_variable(|| Ok(ark_bn254::Fr::from(1u64)))?;
            cs.enforce_constraint(ark_relations::lc!() + a, ark_relations::lc!() + a, ark_relations::lc!() + a)?;
            Ok(())
        }
    }

    let mut rng = ark_std::rand::rngs::StdRng::seed_from_u64(0);
    ark_groth16::Groth16::<ark_bn254::Bn254>::circuit_specific_setup(PlaceholderCircuit, &mut rng)
        .expect("placeholder circuit setup never fails")
        .1
}

/// Every collaborator the three cores need, composed once per CLI invocation.
/// `identity_session` is built on demand (it takes a per-call `ProviderClient`
/// standing in for the eID hub) rather than stored; everything else is
/// shared across subcommands within one invocation.
pub struct Platform {
    pub keys: Arc<KeyManager>,
    pub audit: Arc<AuditLog>,
    pub ledger: Arc<dyn LedgerStore>,
    pub policies: Arc<PolicyRegistry>,
    pub sessions: Arc<SessionCache>,
    pub attestations: Arc<SharedAttestationStore>,
    pub credentials: Arc<InMemoryCredentialRepository>,
    pub issuance: IssuanceCore,
    pub verification: VerificationCore,
    pub origin: String,
    events: Arc<LoggingEventPublisher>,
}

impl Platform {
    pub async fn open(ledger_path: &Path, origin: impl Into<String>) -> Result<Self> {
        let origin = origin.into();
        let audit = Arc::new(AuditLog::new());
        let keys = Arc::new(KeyManager::new("Ed25519", 3600, audit.clone()));
        let ledger: Arc<dyn LedgerStore> = Arc::new(
            FileLedgerStore::open(ledger_path)
                .await
                .with_context(|| format!("opening ledger at {}", ledger_path.display()))?,
        );
        let policies = Arc::new(PolicyRegistry::new(keys.clone(), audit.clone()));
        if policies.get_policy(DEFAULT_POLICY_ID, None).is_err() {
            policies
                .create(PolicyDefinition {
                    policy_id: DEFAULT_POLICY_ID.to_string(),
                    version: DEFAULT_POLICY_VERSION.to_string(),
                    circuit_id: "age-boolean-v1".to_string(),
                    verification_key_id: "demo-vk".to_string(),
                    verification_key_fingerprint: "demo".to_string(),
                    compatible_versions: "^1.0.0".to_string(),
                    default_expiry: "PT72H".to_string(),
                    public_signals_schema: vec![],
                    status: PolicyStatus::Active,
                    deprecated_at: None,
                    signature: None,
                })
                .map_err(|e| anyhow!("seeding default policy: {e}"))?;
        }
        let sessions = Arc::new(SessionCache::new(300));
        let attestations = Arc::new(SharedAttestationStore::new());
        let credentials = Arc::new(InMemoryCredentialRepository::new());
        let events = Arc::new(LoggingEventPublisher);

        let issuance = IssuanceCore::new(
            attestations.clone(),
            keys.clone(),
            ledger.clone(),
            policies.clone(),
            credentials.clone(),
            events.clone(),
        );

        let mut plugins = PluginRegistry::new();
        plugins.register("age-boolean-v1", Arc::new(BooleanVcVerifier));
        plugins.register("zk-groth16-v1", Arc::new(Groth16PresentationVerifier));
        let zkp: Arc<dyn ProofVerifierClient> =
            Arc::new(Groth16VerifierClient::new(placeholder_verifying_key(), Duration::from_secs(5)));
        let verification = VerificationCore::new(
            Arc::new(plugins),
            policies.clone(),
            keys.clone(),
            zkp,
            audit.clone(),
            events.clone(),
            origin.clone(),
        );

        Ok(Self { keys, audit, ledger, policies, sessions, attestations, credentials, issuance, verification, origin, events })
    }

    /// Builds an `IdentitySessionCore` against this invocation's shared
    /// sessions/attestations/events, driven through `provider_client`.
    pub fn identity_session(&self, provider_client: Arc<dyn cred_identity_session::ProviderClient>) -> IdentitySessionCore {
        let mut providers: HashMap<String, Arc<dyn ClaimsMapper>> = HashMap::new();
        providers.insert(
            DEFAULT_PROVIDER_ID.to_string(),
            Arc::new(StandardClaimsMapper { provider_id: DEFAULT_PROVIDER_ID.to_string() }),
        );
        IdentitySessionCore::new(providers, provider_client, self.sessions.clone(), self.attestations.clone(), self.events.clone())
    }
}
