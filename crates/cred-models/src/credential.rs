use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The boolean evidence a credential body carries alongside its
/// commitment-bound claims, so `age-boolean-v1` presentations can be
/// checked without a zk proof. Nested to match `credentialSubject.ageOver18`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CredentialSubject {
    #[serde(rename = "ageOver18")]
    pub age_over_18: bool,
}

/// `expiresAt - issuedAt <= policy.defaultExpiry`; `issuer` is always
/// `KeyManager.GetCurrent().issuerDid` at mint time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub policy_id: String,
    /// Field element `H(walletSecret)`; IssuanceCore never sees the preimage.
    pub subject_commitment: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "credentialType")]
    pub credential_type: String,
    #[serde(rename = "credentialSubject")]
    pub credential_subject: CredentialSubject,
    /// Detached JWS over the body above.
    pub signature: String,
}

/// The signable body of a [`Credential`] — everything except the detached
/// signature, matching the detached-JWS discipline used throughout this
/// platform (see `cred-identity::jws`). Carries both the commitment-bound
/// claims the zk-SNARK verifier reads and the `credentialType`/
/// `credentialSubject` claims the boolean-VC fallback verifier reads, since
/// one JWS body serves either evidence path depending on which plugin the
/// presentation names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBody {
    pub policy_id: String,
    pub subject_commitment: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "credentialType")]
    pub credential_type: String,
    #[serde(rename = "credentialSubject")]
    pub credential_subject: CredentialSubject,
}

impl From<&Credential> for CredentialBody {
    fn from(c: &Credential) -> Self {
        CredentialBody {
            policy_id: c.policy_id.clone(),
            subject_commitment: c.subject_commitment.clone(),
            issuer: c.issuer.clone(),
            issued_at: c.issued_at,
            expires_at: c.expires_at,
            credential_type: c.credential_type.clone(),
            credential_subject: c.credential_subject,
        }
    }
}
