use anyhow::Result;
use clap::{ArgMatches, Command};
use cred_audit::AuditLog;
use cred_keys::KeyManager;
use std::sync::Arc;

pub fn cli() -> Command {
    Command::new("keys")
        .about("Inspect and rotate issuer signing keys")
        .subcommand(Command::new("rotate").about("Deprecate the current key and install a new one"))
        .subcommand(Command::new("jwks").about("Print the JWKS of every currently verifiable key"))
}

pub async fn execute(subcmd: &str, _args: &ArgMatches) -> Result<()> {
    // A fresh KeyManager per invocation: this crate keeps signing material
    // in memory only (cred-keys has no persistence layer), so `rotate`/`jwks`
    // here demonstrate the lifecycle rather than operate on a live fleet.
    let audit = Arc::new(AuditLog::new());
    let km = KeyManager::new("Ed25519", 3600, audit);

    match subcmd {
        "rotate" => {
            let before = km.get_current()?;
            let after = km.rotate()?;
            println!("deprecated: {}", before.key_id);
            println!("current:    {}", after.key_id);
        }
        "jwks" => {
            println!("{}", serde_json::to_string_pretty(&km.get_jwks())?);
        }
        other => anyhow::bail!("unknown keys subcommand: {other}"),
    }
    Ok(())
}
