/*!
# cred-models

Shared data models for the credential platform. Defines the wire/storage
shapes used by more than one crate, to prevent circular dependencies between
the leaf components and the three cores.
*/

pub mod attestation;
pub mod credential;
pub mod dlq;
pub mod envelope;
pub mod events;
pub mod key;
pub mod ledger;
pub mod policy;
pub mod session;

pub use attestation::{Attestation, AssuranceLevel};
pub use credential::{Credential, CredentialBody, CredentialSubject};
pub use dlq::DlqEnvelope;
pub use envelope::{Groth16Proof, PresentationEnvelope, VerificationRequest, VerificationResult};
pub use events::{CredentialIssued, CredentialVerified, IdentityVerified, PlatformEvent};
pub use key::{IssuerSigningKey, KeyStatus};
pub use ledger::{DocType, LedgerRecord};
pub use policy::{PolicyDefinition, PolicyStatus};
pub use session::Session;
