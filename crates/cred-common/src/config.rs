//! Config shapes from the spec's §6 `Config` section. Loading (env/file) is
//! explicitly out of scope; callers construct these directly or via
//! `serde_json::from_value`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    File,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub mode: LedgerMode,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_pct: f64,
    pub topic_suffix: String,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            backoff_base_ms: 200,
            backoff_max_ms: 30_000,
            jitter_pct: 0.2,
            topic_suffix: ".DLQ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyManagerConfig {
    /// Grace period in seconds a deprecated key remains verifiable.
    pub grace_period_secs: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub ledger: LedgerConfig,
    pub dlq: DlqConfig,
    pub key_manager: KeyManagerConfig,
    pub session: SessionConfig,
    /// `policyId -> minimum semver` anti-downgrade floor.
    pub policy_minimums: std::collections::BTreeMap<String, String>,
}
