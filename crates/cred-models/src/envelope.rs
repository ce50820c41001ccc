use serde::{Deserialize, Serialize};

/// `proof = { piA:[3], piB:[3][2], piC:[3] }` — a Groth16 proof triple over
/// BN254, wire-encoded as decimal-string field elements (consistent with the
/// conventions other zk-SNARK verifiers in this ecosystem use for JSON proof
/// transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Groth16Proof {
    #[serde(rename = "piA")]
    pub pi_a: [String; 3],
    #[serde(rename = "piB")]
    pub pi_b: [[String; 2]; 3],
    #[serde(rename = "piC")]
    pub pi_c: [String; 3],
}

/// Wire format for a presentation submitted to `VerificationCore::Verify`.
/// Field names are exactly as in the spec this type implements, lowerCamelCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationEnvelope {
    pub protocol_version: String,
    pub policy_id: String,
    pub policy_version: String,
    pub origin: String,
    /// >= 32 bytes, hex-encoded (so >= 64 hex chars).
    pub nonce: String,
    pub issued_at: i64,
    pub proof: Groth16Proof,
    /// >= 7 field elements, decimal strings.
    pub public_signals: Vec<String>,
    pub credential_hash: String,
    pub policy_hash: String,
    pub signature: Option<String>,
    /// The detached-JWS credential this presentation is proving knowledge of
    /// the commitment preimage for. Not spelled out as a named field in the
    /// envelope table, but required by step 4 of `VerificationCore::Verify`
    /// ("parse vcJwt, verify JWS") — there is no other carrier for it in the
    /// request shape.
    pub vc_jwt: String,
}

/// `request = {contractVersion, policyId, presentationType, presentation, challenge, context}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub contract_version: String,
    pub policy_id: String,
    pub presentation_type: String,
    pub presentation: PresentationEnvelope,
    pub challenge: String,
    pub context: Option<serde_json::Value>,
}

/// `VerificationResult { valid, reasonCodes[], evidenceType, issuer, timestampUtc }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub reason_codes: Vec<String>,
    pub evidence_type: String,
    pub issuer: Option<String>,
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
}
