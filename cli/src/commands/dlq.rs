use anyhow::{Context, Result};
use base64::Engine;
use clap::{Arg, ArgMatches, Command};
use cred_models::DlqEnvelope;

pub fn cli() -> Command {
    Command::new("dlq").about("Inspect dead-lettered messages").subcommand(
        Command::new("inspect")
            .about("Print a DLQ envelope's metadata and decoded payload")
            .arg(Arg::new("file").long("file").required(true).help("Path to a DlqEnvelope JSON file")),
    )
}

pub async fn execute(subcmd: &str, args: &ArgMatches) -> Result<()> {
    match subcmd {
        "inspect" => {
            let path = args.get_one::<String>("file").unwrap();
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let envelope: DlqEnvelope = serde_json::from_str(&raw).context("parsing DLQ envelope")?;

            println!("topic:      {}", envelope.original_topic);
            println!("partition:  {}", envelope.original_partition);
            println!("offset:     {}", envelope.original_offset);
            println!("attempts:   {}", envelope.attempt_count);
            println!("failedAt:   {}", envelope.failed_at_utc);
            println!("error:      {} ({})", envelope.error, envelope.error_type);
            println!("headers:    {:?}", envelope.sanitized_headers);

            let payload = base64::engine::general_purpose::STANDARD
                .decode(&envelope.original_payload_base64)
                .context("decoding payload")?;
            match std::str::from_utf8(&payload) {
                Ok(text) => println!("payload:    {text}"),
                Err(_) => println!("payload:    <{} bytes, not UTF-8>", payload.len()),
            }
        }
        other => anyhow::bail!("unknown dlq subcommand: {other}"),
    }
    Ok(())
}
