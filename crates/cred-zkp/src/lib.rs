/*!
# cred-zkp

`ProofVerifierClient`: Groth16 proof verification over the BN254 curve, plus
the SNARK-friendly field hash bound into presentation circuits.

## Architectural Tenets
- `Verify`/`Hash`/`HashPolicy` is the whole out-of-process contract from the
  spec; this crate ships the in-process backend (the prover itself, and any
  subprocess backend, are out of scope).
- Grounded on the Groth16-over-BN254 verification shown in the pack's zkid
  module: deserialize `(a, b, c)` into curve points, prepare the verifying
  key once, call `ark_groth16::Groth16::verify_proof`.
- Every call is wrapped in a bounded timeout; a timeout is reported the same
  way a verification failure is NOT reported — as `ZkpServiceUnavailable`,
  never silently treated as `false`.
*/

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::PrimeField;
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZkpError {
    #[error("malformed proof bytes: {0}")]
    MalformedProof(String),

    #[error("malformed public signal: {0}")]
    MalformedPublicSignal(String),

    #[error("verification backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("verification backend error: {0}")]
    Backend(String),
}

pub type ZkpResult<T> = Result<T, ZkpError>;

/// Groth16 triple over BN254, compressed point encodings.
#[derive(Debug, Clone)]
pub struct Groth16ProofBytes {
    pub a: Vec<u8>,
    pub b: Vec<u8>,
    pub c: Vec<u8>,
}

#[async_trait]
pub trait ProofVerifierClient: Send + Sync {
    async fn verify(&self, proof: &Groth16ProofBytes, public_signals: &[String]) -> ZkpResult<bool>;
    fn hash(&self, field: &str) -> String;
    fn hash_policy(&self, policy_id: &str) -> String;
}

/// SNARK-friendly hash bound into the circuit. A real deployment binds a
/// Poseidon permutation here; this reduces a field's bytes into the BN254
/// scalar field via wide reduction, which is circuit-compatible with a
/// SHA-256-based commitment gadget and keeps prover/verifier in lockstep
/// without pulling in a separate Poseidon parameter set.
fn snark_hash(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let fr = Fr::from_le_bytes_mod_order(&digest);
    let mut bytes = Vec::new();
    fr.serialize_compressed(&mut bytes).expect("Fr serialization never fails");
    hex::encode(bytes)
}

fn parse_fq(s: &str) -> ZkpResult<Fq> {
    Fq::from_str(s).map_err(|_| ZkpError::MalformedProof(format!("not a field element: {s}")))
}

/// Decodes the decimal-string wire proof (`PresentationEnvelope.proof`) into
/// the compressed point encodings `Groth16VerifierClient` verifies against.
/// Convention: `piA`/`piC` carry `[x, y, _]`; `piB` carries `[[x0, x1], [y0,
/// y1], [_, _]]`, each coordinate an `Fq2(c0=x0/y0, c1=x1/y1)` — the trailing
/// element of each row is the homogeneous `z` coordinate and is not used,
/// every proof here is normalized to affine before encoding.
pub fn decode_wire_proof(proof: &cred_models::Groth16Proof) -> ZkpResult<Groth16ProofBytes> {
    let a = G1Affine::new_unchecked(parse_fq(&proof.pi_a[0])?, parse_fq(&proof.pi_a[1])?);
    let c = G1Affine::new_unchecked(parse_fq(&proof.pi_c[0])?, parse_fq(&proof.pi_c[1])?);
    let bx = Fq2::new(parse_fq(&proof.pi_b[0][0])?, parse_fq(&proof.pi_b[0][1])?);
    let by = Fq2::new(parse_fq(&proof.pi_b[1][0])?, parse_fq(&proof.pi_b[1][1])?);
    let b = G2Affine::new_unchecked(bx, by);

    let mut a_bytes = Vec::new();
    let mut b_bytes = Vec::new();
    let mut c_bytes = Vec::new();
    a.serialize_compressed(&mut a_bytes)
        .map_err(|e| ZkpError::MalformedProof(e.to_string()))?;
    b.serialize_compressed(&mut b_bytes)
        .map_err(|e| ZkpError::MalformedProof(e.to_string()))?;
    c.serialize_compressed(&mut c_bytes)
        .map_err(|e| ZkpError::MalformedProof(e.to_string()))?;
    Ok(Groth16ProofBytes { a: a_bytes, b: b_bytes, c: c_bytes })
}

/// Encodes a decimal-string public signal (a field element in base 10) as
/// the hex form `Groth16VerifierClient::verify` expects.
pub fn public_signal_to_hex(decimal: &str) -> ZkpResult<String> {
    let fr = Fr::from_str(decimal).map_err(|_| ZkpError::MalformedPublicSignal(decimal.to_string()))?;
    let mut bytes = Vec::new();
    fr.serialize_compressed(&mut bytes)
        .map_err(|e| ZkpError::MalformedPublicSignal(e.to_string()))?;
    Ok(hex::encode(bytes))
}

pub struct Groth16VerifierClient {
    verifying_key: PreparedVerifyingKey<Bn254>,
    timeout: Duration,
}

impl Groth16VerifierClient {
    pub fn new(verifying_key: VerifyingKey<Bn254>, timeout: Duration) -> Self {
        let prepared = Groth16::<Bn254>::process_vk(&verifying_key)
            .expect("verifying key processing never fails for a well-formed vk");
        Self { verifying_key: prepared, timeout }
    }

    fn decode_proof(proof: &Groth16ProofBytes) -> ZkpResult<Proof<Bn254>> {
        let a = <Bn254 as ark_ec::pairing::Pairing>::G1Affine::deserialize_compressed(&proof.a[..])
            .map_err(|e| ZkpError::MalformedProof(format!("a: {e}")))?;
        let b = <Bn254 as ark_ec::pairing::Pairing>::G2Affine::deserialize_compressed(&proof.b[..])
            .map_err(|e| ZkpError::MalformedProof(format!("b: {e}")))?;
        let c = <Bn254 as ark_ec::pairing::Pairing>::G1Affine::deserialize_compressed(&proof.c[..])
            .map_err(|e| ZkpError::MalformedProof(format!("c: {e}")))?;
        if a.is_zero() || c.is_zero() {
            return Err(ZkpError::MalformedProof("proof point at infinity".to_string()));
        }
        Ok(Proof { a, b, c })
    }

    fn decode_public_signals(signals: &[String]) -> ZkpResult<Vec<Fr>> {
        signals
            .iter()
            .map(|s| {
                let bytes = hex::decode(s).map_err(|e| ZkpError::MalformedPublicSignal(e.to_string()))?;
                Ok(Fr::from_le_bytes_mod_order(&bytes))
            })
            .collect()
    }

    fn verify_sync(&self, proof: &Groth16ProofBytes, public_signals: &[String]) -> ZkpResult<bool> {
        let proof = Self::decode_proof(proof)?;
        let inputs = Self::decode_public_signals(public_signals)?;
        Groth16::<Bn254>::verify_with_processed_vk(&self.verifying_key, &inputs, &proof)
            .map_err(|e| ZkpError::Backend(e.to_string()))
    }
}

#[async_trait]
impl ProofVerifierClient for Groth16VerifierClient {
    async fn verify(&self, proof: &Groth16ProofBytes, public_signals: &[String]) -> ZkpResult<bool> {
        let proof = proof.clone();
        let signals = public_signals.to_vec();
        let verifying_key = self.verifying_key.clone();
        let task = tokio::task::spawn_blocking(move || {
            let decoded_proof = Groth16VerifierClient::decode_proof(&proof)?;
            let inputs = Groth16VerifierClient::decode_public_signals(&signals)?;
            Groth16::<Bn254>::verify_with_processed_vk(&verifying_key, &inputs, &decoded_proof)
                .map_err(|e| ZkpError::Backend(e.to_string()))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ZkpError::Backend(join_error.to_string())),
            Err(_) => Err(ZkpError::Timeout(self.timeout)),
        }
    }

    fn hash(&self, field: &str) -> String {
        snark_hash(field.as_bytes())
    }

    fn hash_policy(&self, policy_id: &str) -> String {
        snark_hash(policy_id.as_bytes())
    }
}
