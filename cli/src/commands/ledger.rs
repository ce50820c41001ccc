use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use cred_ledger::{FileLedgerStore, LedgerStore};
use std::path::PathBuf;

pub fn cli() -> Command {
    Command::new("ledger")
        .about("Inspect the anchor/DID ledger")
        .subcommand(
            Command::new("stats")
                .about("Print anchor/DID counts and the next block number")
                .arg(Arg::new("path").long("path").help("Ledger file path").default_value("./ledger.json")),
        )
        .subcommand(
            Command::new("anchor")
                .about("Anchor a commitment directly (debug tool, bypasses IssuanceCore)")
                .arg(Arg::new("path").long("path").help("Ledger file path").default_value("./ledger.json"))
                .arg(Arg::new("commitment").long("commitment").required(true)),
        )
}

pub async fn execute(subcmd: &str, args: &ArgMatches) -> Result<()> {
    let path = PathBuf::from(args.get_one::<String>("path").unwrap());
    let ledger = FileLedgerStore::open(&path).await.with_context(|| format!("opening ledger at {}", path.display()))?;

    match subcmd {
        "stats" => {
            let stats = ledger.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "anchor" => {
            let commitment = args.get_one::<String>("commitment").unwrap();
            let (tx_id, block_number) = ledger.create_anchor(commitment, None).await?;
            println!("txId: {tx_id}");
            println!("blockNumber: {block_number}");
        }
        other => anyhow::bail!("unknown ledger subcommand: {other}"),
    }
    Ok(())
}
