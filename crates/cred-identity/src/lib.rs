/*!
# cred-identity

DID/JWK generation and detached-JWS signing for the credential platform.

## Architectural Tenets
- `did:key` identities backed by real Ed25519 keypairs, not a placeholder hash.
- Detached JWS: the payload travels alongside the credential body, the JWS
  carries only header and signature, consistent with the wire format used by
  `Credential.signature` and `AuditLog` entries.
- Verification rejects on any parse failure — there is no always-true stub.
*/

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Multicodec prefix for Ed25519 public keys, as used by `did:key`.
const ED25519_MULTICODEC_PREFIX: [u8; 2] = [0xed, 0x01];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub struct IdentityId(pub String);

impl IdentityId {
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid did: {0}")]
    InvalidDid(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid jws: {0}")]
    InvalidJws(String),

    #[error("keypair generation failed: {0}")]
    KeypairGenerationFailed(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// An Ed25519 keypair plus its derived `did:key` identity.
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    did: IdentityId,
}

impl IdentityKeyPair {
    /// Generates a fresh Ed25519 keypair and derives its `did:key` identity.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut rng);
        let did = did_key_from_public(signing_key.verifying_key());
        Self { signing_key, did }
    }

    /// Reconstructs a keypair from raw 32-byte seed material, e.g. after
    /// decrypting `IssuerSigningKey.encryptedPrivateKey`.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let did = did_key_from_public(signing_key.verifying_key());
        Self { signing_key, did }
    }

    pub fn did(&self) -> &IdentityId {
        &self.did
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The public key as a JWK, per RFC 8037 (OKP/Ed25519), with `kid` set.
    pub fn public_jwk(&self, key_id: &str) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(self.public_key_bytes()),
            "kid": key_id,
        })
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Derives the `did:key` string for an Ed25519 public key: multibase `z` +
/// base58btc(multicodec-prefix || raw public key).
pub fn did_key_from_public(vk: VerifyingKey) -> IdentityId {
    let mut buf = Vec::with_capacity(2 + 32);
    buf.extend_from_slice(&ED25519_MULTICODEC_PREFIX);
    buf.extend_from_slice(vk.as_bytes());
    IdentityId::new(format!("did:key:z{}", bs58::encode(buf).into_string()))
}

/// Extracts the raw Ed25519 public key bytes embedded in a `did:key` string.
pub fn public_key_from_did(did: &IdentityId) -> IdentityResult<VerifyingKey> {
    let s = did.as_str();
    if !s.starts_with("did:key:z") {
        return Err(IdentityError::InvalidDid(format!(
            "only did:key is supported: {s}"
        )));
    }
    let decoded = bs58::decode(&s[9..])
        .into_vec()
        .map_err(|e| IdentityError::InvalidDid(format!("bad multibase payload: {e}")))?;
    if decoded.len() != 34 || decoded[..2] != ED25519_MULTICODEC_PREFIX {
        return Err(IdentityError::InvalidDid(
            "expected a 32-byte Ed25519 did:key".to_string(),
        ));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded[2..]);
    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| IdentityError::InvalidDid(format!("invalid Ed25519 public key: {e}")))
}

/// Verifies a raw signature against a message using the public key embedded
/// in `did`. Any parse failure is a hard rejection, never a pass-through.
pub fn verify_signature(message: &[u8], signature: &Signature, did: &IdentityId) -> IdentityResult<bool> {
    let vk = public_key_from_did(did)?;
    if signature.0.len() != 64 {
        return Err(IdentityError::InvalidSignature(format!(
            "expected a 64-byte Ed25519 signature, got {}",
            signature.0.len()
        )));
    }
    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(&signature.0);
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    Ok(vk.verify(message, &sig).is_ok())
}

/// A detached JWS: `header.payload.signature`, compact-serialized. Detached
/// in the sense that callers keep the payload bytes separately and pass them
/// in at verify time — this module only ever signs/verifies the compact
/// three-part string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedJws(pub String);

impl DetachedJws {
    /// Signs `payload` (already-canonicalized bytes) with `keypair`,
    /// producing a compact `EdDSA` JWS whose `kid` identifies the issuer DID.
    pub fn sign(payload: &[u8], keypair: &IdentityKeyPair) -> IdentityResult<Self> {
        let header = serde_json::json!({
            "alg": "EdDSA",
            "typ": "JWT",
            "kid": format!("{}#key1", keypair.did()),
        });
        let header_b64 = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&header)
                .map_err(|e| IdentityError::SerializationError(e.to_string()))?,
        );
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = keypair.sign(signing_input.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.as_bytes());
        Ok(DetachedJws(format!("{header_b64}.{payload_b64}.{sig_b64}")))
    }

    /// Parses and verifies the JWS against a resolver supplying the public
    /// key for the `kid` embedded in the header. Returns the decoded payload
    /// bytes on success.
    pub fn verify<F>(&self, resolve_key: F) -> IdentityResult<Vec<u8>>
    where
        F: Fn(&str) -> IdentityResult<VerifyingKey>,
    {
        let parts: Vec<&str> = self.0.split('.').collect();
        if parts.len() != 3 {
            return Err(IdentityError::InvalidJws("expected 3 dot-separated parts".into()));
        }
        let (header_b64, payload_b64, sig_b64) = (parts[0], parts[1], parts[2]);

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| IdentityError::InvalidJws(format!("bad header encoding: {e}")))?;
        let header: serde_json::Value = serde_json::from_slice(&header_bytes)
            .map_err(|e| IdentityError::InvalidJws(format!("bad header json: {e}")))?;
        let kid = header
            .get("kid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IdentityError::InvalidJws("missing kid".to_string()))?;

        let vk = resolve_key(kid)?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|e| IdentityError::InvalidJws(format!("bad signature encoding: {e}")))?;
        if sig_bytes.len() != 64 {
            return Err(IdentityError::InvalidSignature("expected 64-byte signature".into()));
        }
        let mut raw = [0u8; 64];
        raw.copy_from_slice(&sig_bytes);
        let signature = ed25519_dalek::Signature::from_bytes(&raw);

        let signing_input = format!("{header_b64}.{payload_b64}");
        vk.verify(signing_input.as_bytes(), &signature)
            .map_err(|_| IdentityError::InvalidSignature("EdDSA verification failed".to_string()))?;

        URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| IdentityError::InvalidJws(format!("bad payload encoding: {e}")))
    }
}

/// SHA-256 hashes a message; used wherever the platform needs a plain
/// content hash rather than a signature (e.g. `credentialHash`).
pub fn sha256(message: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_key_round_trips_through_the_public_key() {
        let kp = IdentityKeyPair::generate();
        let did = kp.did();
        assert!(did.as_str().starts_with("did:key:z"));
        let recovered = public_key_from_did(did).unwrap();
        assert_eq!(recovered.to_bytes(), kp.public_key_bytes());
    }

    #[test]
    fn signature_verifies_against_the_signer_did() {
        let kp = IdentityKeyPair::generate();
        let msg = b"attestation content";
        let sig = kp.sign(msg);
        assert!(verify_signature(msg, &sig, kp.did()).unwrap());
        assert!(!verify_signature(b"tampered", &sig, kp.did()).unwrap());
    }

    #[test]
    fn signature_from_wrong_signer_fails() {
        let kp1 = IdentityKeyPair::generate();
        let kp2 = IdentityKeyPair::generate();
        let sig = kp1.sign(b"hello");
        assert!(!verify_signature(b"hello", &sig, kp2.did()).unwrap());
    }

    #[test]
    fn malformed_did_is_rejected_not_passed_through() {
        let bogus = IdentityId::new("did:key:znotbase58!!!");
        let sig = Signature::new(vec![0u8; 64]);
        assert!(verify_signature(b"x", &sig, &bogus).is_err());
    }

    #[test]
    fn detached_jws_sign_and_verify_round_trip() {
        let kp = IdentityKeyPair::generate();
        let payload = br#"{"policyId":"age_over_18"}"#;
        let jws = DetachedJws::sign(payload, &kp).unwrap();
        let recovered = jws
            .verify(|_kid| public_key_from_did(kp.did()))
            .unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn detached_jws_rejects_tampered_signature() {
        let kp = IdentityKeyPair::generate();
        let jws = DetachedJws::sign(b"payload", &kp).unwrap();
        let mut tampered = jws.0.clone();
        tampered.push('A');
        let result = DetachedJws(tampered).verify(|_| public_key_from_did(kp.did()));
        assert!(result.is_err());
    }
}
