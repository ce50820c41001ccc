/*!
# cred-cli

Operator tool for the credential platform: wires `IdentitySessionCore`,
`IssuanceCore`, and `VerificationCore` together the way a real deployment
would, and exposes the leaf components (`KeyManager`, `LedgerStore`,
`AuditLog`) as individual subcommands.
*/

pub mod composition;
