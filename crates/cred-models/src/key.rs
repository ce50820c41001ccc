use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Current,
    Deprecated,
    Retired,
}

/// An issuer's signing key. `CanSign` iff `Current`; `CanVerify` iff
/// `Current` or (`Deprecated` and within `deprecatedAt + gracePeriod`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerSigningKey {
    pub key_id: String,
    pub algorithm: String,
    pub public_key_jwk: serde_json::Value,
    /// Opaque at-rest encrypted private key material; never logged.
    pub encrypted_private_key: Vec<u8>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub grace_period_secs: i64,
}

impl IssuerSigningKey {
    pub fn can_sign(&self) -> bool {
        matches!(self.status, KeyStatus::Current)
    }

    pub fn can_verify(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            KeyStatus::Current => true,
            KeyStatus::Deprecated => self
                .deprecated_at
                .map(|d| now < d + chrono::Duration::seconds(self.grace_period_secs))
                .unwrap_or(false),
            KeyStatus::Retired => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(status: KeyStatus, deprecated_at: Option<DateTime<Utc>>) -> IssuerSigningKey {
        IssuerSigningKey {
            key_id: "k1".into(),
            algorithm: "Ed25519".into(),
            public_key_jwk: serde_json::json!({}),
            encrypted_private_key: vec![],
            status,
            created_at: Utc::now(),
            deprecated_at,
            retired_at: None,
            grace_period_secs: 3600,
        }
    }

    #[test]
    fn current_can_sign_and_verify() {
        let k = key(KeyStatus::Current, None);
        assert!(k.can_sign());
        assert!(k.can_verify(Utc::now()));
    }

    #[test]
    fn deprecated_verifies_only_within_grace() {
        let now = Utc::now();
        let k = key(KeyStatus::Deprecated, Some(now - chrono::Duration::seconds(10)));
        assert!(!k.can_sign());
        assert!(k.can_verify(now));
        assert!(!k.can_verify(now + chrono::Duration::seconds(3601)));
    }

    #[test]
    fn retired_never_verifies() {
        let k = key(KeyStatus::Retired, Some(Utc::now()));
        assert!(!k.can_verify(Utc::now()));
    }
}
