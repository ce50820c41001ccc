/*!
# cred-identity-session

`IdentitySessionCore`: drives an eID hub session from `Start` through
`HandleCallback`, mapping authenticated claims into a privacy-minimized
[`cred_models::Attestation`] and discarding everything else.

## Architectural Tenets
- `ClaimsMapper` is the one seam allowed to see a provider's raw claims body;
  everything downstream only ever sees the mapped, PII-free shape.
- Date-of-birth is parsed, turned into `isAdult`, and dropped in the same
  function — there is no code path that can forward it.
- Session state is an explicit enum with terminal (absorbing) states, the
  same style `cred-pipeline::PipelineState` uses for its consumer loop.
*/

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use cred_common::error::{PlatformError, ReasonCode};
use cred_common::Result;
use cred_models::{Attestation, AssuranceLevel, IdentityVerified};
use cred_session::SessionCache;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    Pending,
    Succeeded,
    Aborted,
    Errored,
    Expired,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Initiated | SessionState::Pending)
    }
}

/// A provider-hosted eID session, as reported by the hub.
#[derive(Debug, Clone)]
pub struct HubSessionResponse {
    pub status: SessionState,
    pub claims: Option<serde_json::Value>,
}

/// External collaborator: talks to the eID hub. Out of scope per the spec;
/// this crate only defines the contract it's driven through.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn start_session(&self, provider_id: &str, account_ref: Option<&str>) -> Result<StartedHubSession>;
    async fn fetch_session(&self, provider_id: &str, session_id: &str) -> Result<HubSessionResponse>;
}

pub struct StartedHubSession {
    pub session_id: String,
    pub auth_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Mapped, privacy-minimized claims. No raw claims body survives past this point.
pub struct MappedClaims {
    pub provider_id: String,
    pub subject_id: String,
    pub is_adult: bool,
    pub verified_at: DateTime<Utc>,
    pub assurance_level: AssuranceLevel,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The one seam allowed to see a provider's raw claims body.
pub trait ClaimsMapper: Send + Sync {
    fn map(&self, response: &HubSessionResponse) -> Result<MappedClaims>;
}

/// Strict-ISO claims mapper shared by every provider whose hub reports
/// `dateOfBirth` (`YYYY-MM-DD`) and `subject.id` in the claims body.
pub struct StandardClaimsMapper {
    pub provider_id: String,
}

impl ClaimsMapper for StandardClaimsMapper {
    fn map(&self, response: &HubSessionResponse) -> Result<MappedClaims> {
        let claims = response
            .claims
            .as_ref()
            .ok_or_else(|| PlatformError::business(ReasonCode::MissingClaims))?;

        let dob_str = claims
            .get("dateOfBirth")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::business(ReasonCode::MissingAttribute))?;
        let dob = NaiveDate::parse_from_str(dob_str, "%Y-%m-%d")
            .map_err(|_| PlatformError::business(ReasonCode::InvalidDateFormat))?;

        let is_adult = is_adult(dob, Utc::now().date_naive());

        let subject_id = claims
            .get("subject")
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| PlatformError::business(ReasonCode::MissingSubjectId))?;
        validate_subject_id(subject_id)?;

        Ok(MappedClaims {
            provider_id: self.provider_id.clone(),
            subject_id: subject_id.to_string(),
            is_adult,
            verified_at: Utc::now(),
            assurance_level: AssuranceLevel::Substantial,
            expires_at: None,
        })
    }
}

/// `age = today - dob` with the birthday-not-yet-reached adjustment.
fn is_adult(dob: NaiveDate, today: NaiveDate) -> bool {
    let mut age = today.year() - dob.year();
    let birthday_reached_this_year =
        (today.month(), today.day()) >= (dob.month(), dob.day());
    if !birthday_reached_this_year {
        age -= 1;
    }
    age >= 18
}

fn validate_subject_id(subject_id: &str) -> Result<()> {
    if subject_id.is_empty() || subject_id.len() > 256 {
        return Err(PlatformError::business(ReasonCode::InvalidSubjectId));
    }
    if !subject_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(PlatformError::business(ReasonCode::InvalidSubjectId));
    }
    Ok(())
}

/// Upsert store keyed by `(providerId, subjectId)`, merge semantics: update
/// `isAdult`/`verifiedAt`/`assurance`/`expiresAt`, preserve `accountRef`
/// unless a new value is supplied.
pub trait AttestationStore: Send + Sync {
    fn upsert(&self, claims: &MappedClaims, policy_id: &str, account_ref: Option<&str>) -> Result<Attestation>;
}

pub struct InMemoryAttestationStore {
    rows: std::sync::Mutex<HashMap<(String, String), Attestation>>,
}

impl Default for InMemoryAttestationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAttestationStore {
    pub fn new() -> Self {
        Self { rows: std::sync::Mutex::new(HashMap::new()) }
    }
}

impl AttestationStore for InMemoryAttestationStore {
    fn upsert(&self, claims: &MappedClaims, policy_id: &str, account_ref: Option<&str>) -> Result<Attestation> {
        let key = (claims.provider_id.clone(), claims.subject_id.clone());
        let mut rows = self.rows.lock().unwrap();
        let policy_hash = cred_common::sha256_hex(
            format!("{}:{}", policy_id, claims.provider_id).as_bytes(),
        );
        let entry = rows.entry(key).or_insert_with(|| Attestation {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            subject_id: claims.subject_id.clone(),
            provider_id: claims.provider_id.clone(),
            verified: claims.is_adult,
            verified_at: claims.verified_at,
            expires_at: claims.expires_at,
            assurance_level: claims.assurance_level,
            policy_hash: policy_hash.clone(),
            account_ref: account_ref.map(String::from),
            metadata: None,
        });
        entry.verified = claims.is_adult;
        entry.verified_at = claims.verified_at;
        entry.assurance_level = claims.assurance_level;
        entry.expires_at = claims.expires_at;
        if let Some(new_ref) = account_ref {
            entry.account_ref = Some(new_ref.to_string());
        }
        Ok(entry.clone())
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_identity_verified(&self, event: IdentityVerified);
}

pub struct IdentitySessionCore {
    providers: HashMap<String, Arc<dyn ClaimsMapper>>,
    provider_client: Arc<dyn ProviderClient>,
    sessions: Arc<SessionCache>,
    attestations: Arc<dyn AttestationStore>,
    events: Arc<dyn EventPublisher>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedSession {
    provider_id: String,
    external_reference: String,
    account_ref: Option<String>,
}

impl IdentitySessionCore {
    pub fn new(
        providers: HashMap<String, Arc<dyn ClaimsMapper>>,
        provider_client: Arc<dyn ProviderClient>,
        sessions: Arc<SessionCache>,
        attestations: Arc<dyn AttestationStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { providers, provider_client, sessions, attestations, events }
    }

    pub async fn start(&self, provider_id: &str, account_ref: Option<&str>) -> Result<(String, String)> {
        if !self.providers.contains_key(provider_id) {
            return Err(PlatformError::business(ReasonCode::MissingField));
        }
        let started = self.provider_client.start_session(provider_id, account_ref).await?;
        let external_reference = uuid::Uuid::new_v4().to_string();
        let cached = CachedSession {
            provider_id: provider_id.to_string(),
            external_reference,
            account_ref: account_ref.map(String::from),
        };
        self.sessions.put(&started.session_id, serde_json::to_vec(&cached).expect("serializable"));
        info!(provider_id, session_id = %started.session_id, "eid session started");
        Ok((started.auth_url, started.session_id))
    }

    pub async fn handle_callback(&self, provider_id: &str, session_id: &str, policy_id: &str) -> Result<SessionState> {
        let cached_bytes = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| PlatformError::business(ReasonCode::CsrfRejected))?;
        let cached: CachedSession = serde_json::from_slice(&cached_bytes)
            .map_err(|e| PlatformError::with_context(ReasonCode::CsrfRejected, e.to_string()))?;
        if cached.provider_id != provider_id {
            return Err(PlatformError::business(ReasonCode::CsrfRejected));
        }

        let response = self.provider_client.fetch_session(provider_id, session_id).await?;
        if response.status != SessionState::Succeeded {
            return Ok(response.status);
        }

        let mapper = self
            .providers
            .get(provider_id)
            .ok_or_else(|| PlatformError::business(ReasonCode::MissingField))?;
        let claims = mapper.map(&response)?;

        let attestation = self.attestations.upsert(&claims, policy_id, cached.account_ref.as_deref())?;

        self.events
            .publish_identity_verified(IdentityVerified {
                provider_id: attestation.provider_id.clone(),
                subject_id: attestation.subject_id.clone(),
                is_adult: attestation.verified,
                verified_at: attestation.verified_at,
                assurance_level: format!("{:?}", attestation.assurance_level).to_lowercase(),
                expires_at: attestation.expires_at,
            })
            .await;

        info!(provider_id, subject_id = %attestation.subject_id, "identity verified");
        Ok(SessionState::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct FixedProviderClient;
    #[async_trait]
    impl ProviderClient for FixedProviderClient {
        async fn start_session(&self, _provider_id: &str, _account_ref: Option<&str>) -> Result<StartedHubSession> {
            Ok(StartedHubSession {
                session_id: "sess-1".to_string(),
                auth_url: "https://hub.example/auth".to_string(),
                expires_at: Utc::now() + Duration::minutes(10),
            })
        }

        async fn fetch_session(&self, _provider_id: &str, _session_id: &str) -> Result<HubSessionResponse> {
            Ok(HubSessionResponse {
                status: SessionState::Succeeded,
                claims: Some(serde_json::json!({
                    "dateOfBirth": "2000-01-01",
                    "subject": {"id": "subject-abc-123"},
                })),
            })
        }
    }

    struct RecordingPublisher(std::sync::Mutex<Vec<IdentityVerified>>);
    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish_identity_verified(&self, event: IdentityVerified) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn core(publisher: Arc<RecordingPublisher>) -> IdentitySessionCore {
        let mut providers: HashMap<String, Arc<dyn ClaimsMapper>> = HashMap::new();
        providers.insert(
            "bankid".to_string(),
            Arc::new(StandardClaimsMapper { provider_id: "bankid".to_string() }),
        );
        IdentitySessionCore::new(
            providers,
            Arc::new(FixedProviderClient),
            Arc::new(SessionCache::new(300)),
            Arc::new(InMemoryAttestationStore::new()),
            publisher,
        )
    }

    #[tokio::test]
    async fn start_then_callback_publishes_identity_verified_and_consumes_session() {
        let publisher = Arc::new(RecordingPublisher(std::sync::Mutex::new(vec![])));
        let identity = core(publisher.clone());
        let (_, session_id) = identity.start("bankid", None).await.unwrap();

        let state = identity.handle_callback("bankid", &session_id, "age_over_18").await.unwrap();
        assert_eq!(state, SessionState::Succeeded);
        assert_eq!(publisher.0.lock().unwrap().len(), 1);
        assert!(publisher.0.lock().unwrap()[0].is_adult);
    }

    #[tokio::test]
    async fn unknown_session_id_is_csrf_rejected() {
        let publisher = Arc::new(RecordingPublisher(std::sync::Mutex::new(vec![])));
        let identity = core(publisher);
        let err = identity.handle_callback("bankid", "does-not-exist", "age_over_18").await.unwrap_err();
        assert_eq!(err.reason_code(), Some(ReasonCode::CsrfRejected));
    }

    #[test]
    fn birthday_not_yet_reached_subtracts_a_year() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let turns_18_later_this_year = NaiveDate::from_ymd_opt(2008, 12, 31).unwrap();
        assert!(!is_adult(turns_18_later_this_year, today));
        let turned_18_already = NaiveDate::from_ymd_opt(2008, 1, 1).unwrap();
        assert!(is_adult(turned_18_already, today));
    }

    #[test]
    fn subject_id_rejects_non_url_safe_and_oversized() {
        assert!(validate_subject_id("has spaces").is_err());
        assert!(validate_subject_id(&"a".repeat(257)).is_err());
        assert!(validate_subject_id("abc-DEF_123").is_ok());
    }
}
