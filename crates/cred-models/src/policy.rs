use cred_common::sha256_hex;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`PolicyDefinition`]. Transitions are monotonic:
/// `Active -> Deprecated -> Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    Active,
    Deprecated,
    Blocked,
}

impl PolicyStatus {
    /// Whether moving from `self` to `next` is a legal monotonic transition.
    pub fn can_transition_to(self, next: PolicyStatus) -> bool {
        matches!(
            (self, next),
            (PolicyStatus::Active, PolicyStatus::Deprecated)
                | (PolicyStatus::Active, PolicyStatus::Blocked)
                | (PolicyStatus::Deprecated, PolicyStatus::Blocked)
        )
    }
}

/// Keyed by `(policyId, version)`. `version` is semver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub policy_id: String,
    pub version: String,
    pub circuit_id: String,
    pub verification_key_id: String,
    pub verification_key_fingerprint: String,
    /// Semver range other presentations may be compatible under, e.g. `^1.0.0`.
    pub compatible_versions: String,
    /// ISO-8601 duration, e.g. `PT72H`.
    pub default_expiry: String,
    pub public_signals_schema: Vec<String>,
    pub status: PolicyStatus,
    pub deprecated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub signature: Option<String>,
}

impl PolicyDefinition {
    /// `policyHash = SHA256(policyId || ":" || version || ":" || circuitId)`.
    pub fn policy_hash(&self) -> String {
        let preimage = format!("{}:{}:{}", self.policy_id, self.version, self.circuit_id);
        sha256_hex(preimage.as_bytes())
    }

    /// Canonical payload signed by [`crate::policy`]'s `Sign`/`VerifySignature`
    /// operations: policy id, version, circuit id, and status concatenated
    /// with the content the signature must be over, signature excluded.
    pub fn canonical_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.policy_id.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(self.version.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(self.circuit_id.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(self.verification_key_fingerprint.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(format!("{:?}", self.status).as_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        assert!(PolicyStatus::Active.can_transition_to(PolicyStatus::Deprecated));
        assert!(PolicyStatus::Deprecated.can_transition_to(PolicyStatus::Blocked));
        assert!(!PolicyStatus::Blocked.can_transition_to(PolicyStatus::Active));
        assert!(!PolicyStatus::Deprecated.can_transition_to(PolicyStatus::Active));
    }

    #[test]
    fn policy_hash_is_deterministic() {
        let p = PolicyDefinition {
            policy_id: "age_over_18".into(),
            version: "1.2.0".into(),
            circuit_id: "age-over-18-v1".into(),
            verification_key_id: "vk1".into(),
            verification_key_fingerprint: "abc".into(),
            compatible_versions: "^1.0.0".into(),
            default_expiry: "PT72H".into(),
            public_signals_schema: vec![],
            status: PolicyStatus::Active,
            deprecated_at: None,
            signature: None,
        };
        assert_eq!(p.policy_hash(), p.policy_hash());
        assert_eq!(p.policy_hash().len(), 64);
    }
}
