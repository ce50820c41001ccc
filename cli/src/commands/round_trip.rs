use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};
use cred_cli::composition::{DemoProviderClient, Platform, DEFAULT_POLICY_ID, DEFAULT_POLICY_VERSION};
use cred_identity_session::SessionState;
use cred_models::{Groth16Proof, PresentationEnvelope, VerificationRequest};
use std::path::PathBuf;
use std::sync::Arc;

pub fn cli() -> Command {
    Command::new("round-trip")
        .about("Drive a full identity verification -> credential issuance -> presentation verification cycle")
        .arg(Arg::new("ledger").long("ledger").default_value("./ledger.json"))
        .arg(Arg::new("origin").long("origin").default_value("https://relying-party.example"))
        .arg(Arg::new("account-ref").long("account-ref").default_value("wallet-abc"))
        .arg(Arg::new("subject").long("subject").default_value("demo-subject-1"))
        .arg(Arg::new("dob").long("dob").help("Date of birth, YYYY-MM-DD").default_value("2000-01-01"))
        .arg(Arg::new("commitment").long("commitment").help("subjectCommitment to mint against").default_value("demo-commitment"))
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let ledger_path = PathBuf::from(args.get_one::<String>("ledger").unwrap());
    let origin = args.get_one::<String>("origin").unwrap().clone();
    let account_ref = args.get_one::<String>("account-ref").unwrap().clone();
    let subject = args.get_one::<String>("subject").unwrap().clone();
    let dob = args.get_one::<String>("dob").unwrap().clone();
    let commitment = args.get_one::<String>("commitment").unwrap().clone();

    let platform = Platform::open(&ledger_path, origin.clone()).await?;
    let provider_client = Arc::new(DemoProviderClient { subject_id: subject, date_of_birth: dob });
    let identity = platform.identity_session(provider_client);

    println!("== identity ==");
    let (auth_url, session_id) = identity.start("bankid", Some(&account_ref)).await?;
    println!("auth_url:   {auth_url}");
    println!("session_id: {session_id}");

    let state = identity.handle_callback("bankid", &session_id, DEFAULT_POLICY_ID).await?;
    println!("state:      {state:?}");
    if state != SessionState::Succeeded {
        bail!("eID session did not succeed: {state:?}");
    }

    println!("\n== issuance ==");
    let (vc_jwt, issued_at, expires_at) =
        platform.issuance.issue_credential(&account_ref, DEFAULT_POLICY_ID, &commitment).await?;
    println!("vc_jwt:     {vc_jwt}");
    println!("issued_at:  {issued_at}");
    println!("expires_at: {expires_at}");

    println!("\n== verification ==");
    let request = VerificationRequest {
        contract_version: "1.0".to_string(),
        policy_id: DEFAULT_POLICY_ID.to_string(),
        presentation_type: "age-boolean-v1".to_string(),
        presentation: PresentationEnvelope {
            protocol_version: "1.0".to_string(),
            policy_id: DEFAULT_POLICY_ID.to_string(),
            policy_version: DEFAULT_POLICY_VERSION.to_string(),
            origin,
            nonce: "a".repeat(64),
            issued_at: chrono::Utc::now().timestamp(),
            proof: Groth16Proof {
                pi_a: ["0".into(), "0".into(), "1".into()],
                pi_b: [["0".into(), "0".into()], ["0".into(), "0".into()], ["1".into(), "0".into()]],
                pi_c: ["0".into(), "0".into(), "1".into()],
            },
            public_signals: vec!["0".to_string(); 7],
            credential_hash: cred_common::sha256_hex(vc_jwt.as_bytes()),
            policy_hash: String::new(),
            signature: None,
            vc_jwt,
        },
        challenge: uuid::Uuid::new_v4().to_string(),
        context: None,
    };

    let result = platform.verification.verify(&request).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
