use anyhow::Result;
use clap::Command;

mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    cred_common::logging::init();

    let cli = Command::new("credctl")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Operator tool for the credential platform")
        .subcommand(commands::keys::cli())
        .subcommand(commands::ledger::cli())
        .subcommand(commands::round_trip::cli())
        .subcommand(commands::dlq::cli());

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("keys", sub_matches)) => {
            let subcmd = sub_matches.subcommand().map_or("", |(s, _)| s);
            commands::keys::execute(subcmd, sub_matches).await?;
        }
        Some(("ledger", sub_matches)) => {
            let subcmd = sub_matches.subcommand().map_or("", |(s, _)| s);
            commands::ledger::execute(subcmd, sub_matches).await?;
        }
        Some(("round-trip", sub_matches)) => {
            commands::round_trip::execute(sub_matches).await?;
        }
        Some(("dlq", sub_matches)) => {
            let subcmd = sub_matches.subcommand().map_or("", |(s, _)| s);
            commands::dlq::execute(subcmd, sub_matches).await?;
        }
        _ => {
            println!("No command specified. Use --help for available commands.");
        }
    }

    Ok(())
}
