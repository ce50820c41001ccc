/*!
# cred-policy

`PolicyRegistry`: versioned policies, anti-downgrade minimums, and a
signature over policy metadata.

## Architectural Tenets
- Semver compatibility is hand-parsed for the platform's three supported
  range forms (`^X.Y.Z`, `X.x`/`X.Y.x`, literal) rather than handed to a
  general-purpose range parser, so an unparseable range is a hard reject
  instead of silently matching everything.
- Signing/verification is grounded on the canonical-payload-then-Ed25519
  pattern used throughout this platform (see `cred-audit`): the signature
  covers a deterministic byte payload, never the full JSON document.
- Status transitions are monotonic and always produce a signed audit entry.
*/

use chrono::Utc;
use cred_audit::AuditLog;
use cred_identity::{verify_signature, IdentityId, Signature};
use cred_keys::KeyManager;
use cred_models::{PolicyDefinition, PolicyStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy not found: {0} version {1:?}")]
    NotFound(String, Option<String>),

    #[error("policy already exists: {0} {1}")]
    AlreadyExists(String, String),

    #[error("illegal status transition: {0:?} -> {1:?}")]
    IllegalTransition(PolicyStatus, PolicyStatus),

    #[error("unparseable semver range: {0}")]
    UnparseableRange(String),

    #[error("invalid semver: {0}")]
    InvalidVersion(String),

    #[error("policy version {0} is below the enforced minimum {1}")]
    DowngradeRejected(String, String),

    #[error("signing failed: {0}")]
    Signing(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;

/// Parses `version` against one of the three supported range forms.
/// An unparseable range is always a reject, never a default-allow.
pub fn is_compatible(version: &str, range: &str) -> PolicyResult<bool> {
    let v = semver::Version::parse(version).map_err(|_| PolicyError::InvalidVersion(version.to_string()))?;

    if let Some(rest) = range.strip_prefix('^') {
        let parsed = semver::Version::parse(rest).map_err(|_| PolicyError::UnparseableRange(range.to_string()))?;
        return Ok(v.major == parsed.major);
    }

    if let Some(major_str) = range.strip_suffix(".x") {
        // Either "X.x" or "X.Y.x".
        let segments: Vec<&str> = major_str.split('.').collect();
        match segments.as_slice() {
            [major] => {
                let major: u64 = major.parse().map_err(|_| PolicyError::UnparseableRange(range.to_string()))?;
                return Ok(v.major == major);
            }
            [major, minor] => {
                let major: u64 = major.parse().map_err(|_| PolicyError::UnparseableRange(range.to_string()))?;
                let minor: u64 = minor.parse().map_err(|_| PolicyError::UnparseableRange(range.to_string()))?;
                return Ok(v.major == major && v.minor == minor);
            }
            _ => return Err(PolicyError::UnparseableRange(range.to_string())),
        }
    }

    // Literal version: exact equality.
    match semver::Version::parse(range) {
        Ok(parsed) => Ok(v == parsed),
        Err(_) => Err(PolicyError::UnparseableRange(range.to_string())),
    }
}

pub struct PolicyRegistry {
    policies: Mutex<HashMap<(String, String), PolicyDefinition>>,
    minimums: Mutex<HashMap<String, String>>,
    keys: Arc<KeyManager>,
    audit: Arc<AuditLog>,
}

impl PolicyRegistry {
    pub fn new(keys: Arc<KeyManager>, audit: Arc<AuditLog>) -> Self {
        Self {
            policies: Mutex::new(HashMap::new()),
            minimums: Mutex::new(HashMap::new()),
            keys,
            audit,
        }
    }

    pub fn set_minimum(&self, policy_id: impl Into<String>, version: impl Into<String>) {
        self.minimums.lock().unwrap().insert(policy_id.into(), version.into());
    }

    pub fn minimum(&self, policy_id: &str) -> Option<String> {
        self.minimums.lock().unwrap().get(policy_id).cloned()
    }

    pub fn create(&self, policy: PolicyDefinition) -> PolicyResult<()> {
        let key = (policy.policy_id.clone(), policy.version.clone());
        let mut policies = self.policies.lock().unwrap();
        if policies.contains_key(&key) {
            return Err(PolicyError::AlreadyExists(key.0, key.1));
        }
        policies.insert(key, policy);
        Ok(())
    }

    pub fn get_policy(&self, policy_id: &str, version: Option<&str>) -> PolicyResult<PolicyDefinition> {
        let policies = self.policies.lock().unwrap();
        match version {
            Some(v) => policies
                .get(&(policy_id.to_string(), v.to_string()))
                .cloned()
                .ok_or_else(|| PolicyError::NotFound(policy_id.to_string(), Some(v.to_string()))),
            None => policies
                .values()
                .filter(|p| p.policy_id == policy_id && matches!(p.status, PolicyStatus::Active))
                .next()
                .cloned()
                .ok_or_else(|| PolicyError::NotFound(policy_id.to_string(), None)),
        }
    }

    pub fn get_active(&self, policy_id: &str) -> PolicyResult<PolicyDefinition> {
        self.get_policy(policy_id, None)
    }

    pub fn get_versions(&self, policy_id: &str) -> Vec<PolicyDefinition> {
        self.policies
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.policy_id == policy_id)
            .cloned()
            .collect()
    }

    pub fn is_compatible(&self, policy_id: &str, version: &str, range: &str) -> PolicyResult<bool> {
        let _ = self.get_policy(policy_id, Some(version))?;
        is_compatible(version, range)
    }

    /// Anti-downgrade enforcement: `version >= minimums[policyId]`,
    /// regardless of `status`. Absence of a configured minimum always passes.
    pub fn enforce_minimum(&self, policy_id: &str, version: &str) -> PolicyResult<()> {
        let Some(minimum) = self.minimum(policy_id) else {
            return Ok(());
        };
        let v = semver::Version::parse(version).map_err(|_| PolicyError::InvalidVersion(version.to_string()))?;
        let min = semver::Version::parse(&minimum).map_err(|_| PolicyError::InvalidVersion(minimum.clone()))?;
        if v < min {
            return Err(PolicyError::DowngradeRejected(version.to_string(), minimum));
        }
        Ok(())
    }

    pub fn update_status(
        &self,
        policy_id: &str,
        version: &str,
        new_status: PolicyStatus,
        reason: &str,
        actor: &str,
    ) -> PolicyResult<()> {
        {
            let mut policies = self.policies.lock().unwrap();
            let policy = policies
                .get_mut(&(policy_id.to_string(), version.to_string()))
                .ok_or_else(|| PolicyError::NotFound(policy_id.to_string(), Some(version.to_string())))?;
            if !policy.status.can_transition_to(new_status) {
                return Err(PolicyError::IllegalTransition(policy.status, new_status));
            }
            policy.status = new_status;
            if matches!(new_status, PolicyStatus::Deprecated) {
                policy.deprecated_at = Some(Utc::now());
            }
        }
        self.audit
            .append(
                self.keys.as_ref(),
                "policy.status_changed",
                None,
                Some(policy_id.to_string()),
                reason,
                vec![actor.to_string(), format!("{new_status:?}")],
            )
            .map_err(|e| PolicyError::Signing(e.to_string()))?;
        Ok(())
    }

    /// Signs `policy.canonical_payload()` with the current signing key and
    /// attaches the result as `policy.signature` (base64).
    pub fn sign(&self, policy: &mut PolicyDefinition) -> PolicyResult<()> {
        let (_key_id, signature) = self
            .keys
            .sign_with_current(&policy.canonical_payload())
            .map_err(|e| PolicyError::Signing(e.to_string()))?;
        policy.signature = Some(base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            signature.as_bytes(),
        ));
        Ok(())
    }

    /// Verifies `policy.signature` against every currently verifiable key.
    pub fn verify_signature(&self, policy: &PolicyDefinition) -> PolicyResult<bool> {
        let Some(sig_b64) = &policy.signature else {
            return Ok(false);
        };
        let sig_bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, sig_b64)
            .map_err(|e| PolicyError::Signing(e.to_string()))?;
        let payload = policy.canonical_payload();
        let signature = Signature::new(sig_bytes);
        for key in self.keys.get_verification_keys() {
            let did = IdentityId::new(key.key_id.clone());
            if verify_signature(&payload, &signature, &did).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
