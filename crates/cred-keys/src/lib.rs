/*!
# cred-keys

`KeyManager`: lifecycle of signing keys — current/deprecated/retired — with
grace-period verification.

## Architectural Tenets
- Signing uses only `CanSign`; verifying uses any `CanVerify`.
- Rotation is serialized under a single lock; readers see consistent
  snapshots (the concurrency model's read-mostly, serialized-writer rule).
- Every status transition writes an audit entry — `KeyManager` implements
  `cred_audit::AuditSigner`/`VerifierKeyProvider` itself rather than the
  audit log depending on this crate, breaking the cycle the spec's two
  "X writes to Y" / "Y is signed by X" statements would otherwise create.
*/

use chrono::{DateTime, Utc};
use cred_audit::{AuditLog, AuditSigner, VerifierKeyProvider};
use cred_common::error::{PlatformError, ReasonCode};
use cred_common::Result;
use cred_identity::{IdentityId, IdentityKeyPair, Signature};
use cred_models::{IssuerSigningKey, KeyStatus};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

struct StoredKey {
    record: IssuerSigningKey,
    keypair: IdentityKeyPair,
}

pub struct KeyManager {
    algorithm: String,
    grace_period_secs: i64,
    keys: RwLock<HashMap<String, StoredKey>>,
    current_key_id: RwLock<Option<String>>,
    audit: Arc<AuditLog>,
}

impl KeyManager {
    /// Bootstraps with a freshly generated `Current` key.
    pub fn new(algorithm: impl Into<String>, grace_period_secs: i64, audit: Arc<AuditLog>) -> Self {
        let manager = Self {
            algorithm: algorithm.into(),
            grace_period_secs,
            keys: RwLock::new(HashMap::new()),
            current_key_id: RwLock::new(None),
            audit,
        };
        let keypair = IdentityKeyPair::generate();
        manager.install_current(keypair);
        manager
    }

    fn install_current(&self, keypair: IdentityKeyPair) {
        let key_id = keypair.did().to_string();
        let record = IssuerSigningKey {
            key_id: key_id.clone(),
            algorithm: self.algorithm.clone(),
            public_key_jwk: keypair.public_jwk(&key_id),
            encrypted_private_key: keypair.private_key_bytes().to_vec(),
            status: KeyStatus::Current,
            created_at: Utc::now(),
            deprecated_at: None,
            retired_at: None,
            grace_period_secs: self.grace_period_secs,
        };
        self.keys.write().unwrap().insert(key_id.clone(), StoredKey { record, keypair });
        *self.current_key_id.write().unwrap() = Some(key_id);
    }

    pub fn get_current(&self) -> Result<IssuerSigningKey> {
        let current_id = self
            .current_key_id
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| PlatformError::system("no current key installed"))?;
        self.get_by_id(&current_id)
    }

    pub fn get_by_id(&self, key_id: &str) -> Result<IssuerSigningKey> {
        self.keys
            .read()
            .unwrap()
            .get(key_id)
            .map(|k| k.record.clone())
            .ok_or_else(|| PlatformError::business(ReasonCode::SystemError))
    }

    /// `Current` plus every `Deprecated` key still inside its grace window.
    pub fn get_verification_keys(&self) -> Vec<IssuerSigningKey> {
        let now = Utc::now();
        self.keys
            .read()
            .unwrap()
            .values()
            .filter(|k| k.record.can_verify(now))
            .map(|k| k.record.clone())
            .collect()
    }

    /// Atomically deprecates the existing `Current` key and installs a new one.
    pub fn rotate(&self) -> Result<IssuerSigningKey> {
        let new_keypair = IdentityKeyPair::generate();
        let (previous_id, new_record) = {
            let mut keys = self.keys.write().unwrap();
            let mut current_id_guard = self.current_key_id.write().unwrap();
            let previous_id = current_id_guard.clone();

            if let Some(prev_id) = &previous_id {
                if let Some(prev) = keys.get_mut(prev_id) {
                    prev.record.status = KeyStatus::Deprecated;
                    prev.record.deprecated_at = Some(Utc::now());
                }
            }

            let key_id = new_keypair.did().to_string();
            let record = IssuerSigningKey {
                key_id: key_id.clone(),
                algorithm: self.algorithm.clone(),
                public_key_jwk: new_keypair.public_jwk(&key_id),
                encrypted_private_key: new_keypair.private_key_bytes().to_vec(),
                status: KeyStatus::Current,
                created_at: Utc::now(),
                deprecated_at: None,
                retired_at: None,
                grace_period_secs: self.grace_period_secs,
            };
            keys.insert(key_id.clone(), StoredKey { record: record.clone(), keypair: new_keypair });
            *current_id_guard = Some(key_id);
            (previous_id, record)
        };

        self.audit
            .append(
                self,
                "key.rotated",
                None,
                None,
                "rotated",
                previous_id.into_iter().collect(),
            )
            .map_err(|e| PlatformError::system(e.to_string()))?;

        Ok(new_record)
    }

    pub fn deprecate(&self, key_id: &str) -> Result<()> {
        {
            let mut keys = self.keys.write().unwrap();
            let key = keys
                .get_mut(key_id)
                .ok_or_else(|| PlatformError::business(ReasonCode::SystemError))?;
            key.record.status = KeyStatus::Deprecated;
            key.record.deprecated_at = Some(Utc::now());
        }
        self.audit
            .append(self, "key.deprecated", None, None, "deprecated", vec![key_id.to_string()])
            .map_err(|e| PlatformError::system(e.to_string()))?;
        Ok(())
    }

    pub fn retire(&self, key_id: &str, reason: &str, actor: &str) -> Result<()> {
        {
            let mut keys = self.keys.write().unwrap();
            let key = keys
                .get_mut(key_id)
                .ok_or_else(|| PlatformError::business(ReasonCode::SystemError))?;
            key.record.status = KeyStatus::Retired;
            key.record.retired_at = Some(Utc::now());
        }
        self.audit
            .append(
                self,
                "key.retired",
                None,
                None,
                "retired",
                vec![key_id.to_string(), reason.to_string(), actor.to_string()],
            )
            .map_err(|e| PlatformError::system(e.to_string()))?;
        Ok(())
    }

    pub fn get_jwks(&self) -> serde_json::Value {
        let now = Utc::now();
        let keys: Vec<_> = self
            .keys
            .read()
            .unwrap()
            .values()
            .filter(|k| k.record.can_verify(now))
            .map(|k| k.record.public_key_jwk.clone())
            .collect();
        serde_json::json!({ "keys": keys })
    }

    /// Scans `Deprecated` keys whose `deprecatedAt + gracePeriod <= now` and
    /// transitions them to `Retired`. Returns the retired key ids.
    pub fn auto_retire_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let keys = self.keys.read().unwrap();
            keys.values()
                .filter(|k| {
                    matches!(k.record.status, KeyStatus::Deprecated)
                        && k.record
                            .deprecated_at
                            .map(|d| now >= d + chrono::Duration::seconds(k.record.grace_period_secs))
                            .unwrap_or(false)
                })
                .map(|k| k.record.key_id.clone())
                .collect()
        };
        for key_id in &expired {
            let _ = self.retire(key_id, "grace period elapsed", "system");
        }
        expired
    }

    pub fn sign_with_current(&self, payload: &[u8]) -> Result<(String, Signature)> {
        let current_id = self
            .current_key_id
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| PlatformError::system("no current key installed"))?;
        let keys = self.keys.read().unwrap();
        let stored = keys
            .get(&current_id)
            .ok_or_else(|| PlatformError::system("current key vanished"))?;
        Ok((current_id, stored.keypair.sign(payload)))
    }
}

impl AuditSigner for KeyManager {
    fn current_signer_did(&self) -> IdentityId {
        let current_id = self
            .current_key_id
            .read()
            .unwrap()
            .clone()
            .expect("KeyManager always has a current key after construction");
        IdentityId::new(current_id)
    }

    fn sign(&self, payload: &[u8]) -> Signature {
        let current_id = self
            .current_key_id
            .read()
            .unwrap()
            .clone()
            .expect("KeyManager always has a current key after construction");
        let keys = self.keys.read().unwrap();
        keys.get(&current_id)
            .expect("current key id always resolves")
            .keypair
            .sign(payload)
    }
}

impl VerifierKeyProvider for KeyManager {
    fn can_verify(&self, signer_did: &IdentityId) -> bool {
        let now = Utc::now();
        self.keys
            .read()
            .unwrap()
            .get(signer_did.as_str())
            .map(|k| k.record.can_verify(now))
            .unwrap_or(false)
    }
}

/// Marker helper so callers can express "now" consistently with the rest of
/// the platform's clock usage without importing `chrono` directly.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new("Ed25519", 3600, Arc::new(AuditLog::new()))
    }

    #[test]
    fn only_current_key_can_sign() {
        let km = manager();
        let current = km.get_current().unwrap();
        assert!(current.can_sign());
    }

    #[test]
    fn rotate_deprecates_previous_and_installs_new_current() {
        let km = manager();
        let old = km.get_current().unwrap();
        let new = km.rotate().unwrap();

        assert_ne!(old.key_id, new.key_id);
        let old_after = km.get_by_id(&old.key_id).unwrap();
        assert!(!old_after.can_sign());
        assert!(old_after.can_verify(Utc::now()));

        let current = km.get_current().unwrap();
        assert_eq!(current.key_id, new.key_id);
    }

    #[test]
    fn verification_keys_include_current_and_in_grace_deprecated() {
        let km = manager();
        let old_id = km.get_current().unwrap().key_id;
        km.rotate().unwrap();

        let verification_keys = km.get_verification_keys();
        assert_eq!(verification_keys.len(), 2);
        assert!(verification_keys.iter().any(|k| k.key_id == old_id));
    }

    #[test]
    fn retire_revokes_verification_immediately() {
        let km = manager();
        let old_id = km.get_current().unwrap().key_id;
        km.rotate().unwrap();
        km.retire(&old_id, "compromised", "operator").unwrap();

        let old_after = km.get_by_id(&old_id).unwrap();
        assert!(!old_after.can_verify(Utc::now()));
    }

    #[test]
    fn every_transition_writes_an_audit_entry() {
        let audit = Arc::new(AuditLog::new());
        let km = KeyManager::new("Ed25519", 3600, audit.clone());
        km.rotate().unwrap();
        assert!(!audit.entries().is_empty());
        let entries = audit.entries();
        assert!(entries.iter().any(|e| e.topic == "key.rotated"));
    }

    #[test]
    fn jwks_only_lists_verifiable_keys() {
        let km = manager();
        let old_id = km.get_current().unwrap().key_id;
        km.rotate().unwrap();
        km.retire(&old_id, "manual", "operator").unwrap();

        let jwks = km.get_jwks();
        let keys = jwks["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
    }
}
