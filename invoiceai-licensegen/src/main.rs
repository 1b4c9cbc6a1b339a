//! InvoiceAI license issuance tool
//!
//! Runs on the license authority's machine, never on a deployment:
//! 1. `keygen` provisions the Ed25519 signing key pair
//! 2. `issue` signs a license for a tenant
//! 3. `render-env` prints the environment a deployment needs to verify
//! 4. `verify` inspects a token offline
//!
//! Usage:
//!   invoiceai-licensegen issue --private-key license_private.pem \
//!       --tenant-id acme --feature extract --expires 2025-12-31

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use invoiceai_license::{
    DeviceFingerprint, IssueRequest, LicenseError, LicenseSigner, LicenseVerifier, TenantInfo,
    generate_license_artifact,
};
use invoiceai_licensegen::{
    DEFAULT_PRIVATE_NAME, DEFAULT_PUBLIC_NAME, EnvFormat, generate_keypair, parse_metadata,
    parse_timestamp_arg, read_passphrase, render_artifact_file, render_env, render_issue_output,
    write_output,
};
use std::path::PathBuf;
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "invoiceai-licensegen")]
#[command(about = "Issue and inspect signed InvoiceAI license artifacts")]
struct Cli {
    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign a license for a tenant
    Issue(IssueArgs),
    /// Generate an Ed25519 signing key pair
    Keygen(KeygenArgs),
    /// Print the environment a deployment needs to verify licenses
    RenderEnv(RenderEnvArgs),
    /// Verify a token against a public key and print its payload
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
struct IssueArgs {
    /// PEM-encoded Ed25519 private key
    #[arg(long)]
    private_key: PathBuf,

    /// File holding the passphrase of an encrypted private key
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Tenant identifier embedded in the license
    #[arg(long)]
    tenant_id: String,

    /// Human-friendly tenant label
    #[arg(long)]
    tenant_name: Option<String>,

    /// Tenant metadata entry (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    meta: Vec<String>,

    /// Feature flag to enable (repeatable)
    #[arg(long = "feature")]
    features: Vec<String>,

    /// Expiry (ISO-8601); a bare date means end of that day UTC
    #[arg(long)]
    expires: String,

    /// Issuance time override (defaults to now)
    #[arg(long)]
    issued_at: Option<String>,

    /// Device binding identifier
    #[arg(long, conflicts_with = "bind_this_device")]
    device: Option<String>,

    /// Bind the license to this machine's fingerprint
    #[arg(long)]
    bind_this_device: bool,

    /// Identifier of the signing key
    #[arg(long)]
    key_id: Option<String>,

    /// Also write the artifact JSON to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Print only the token
    #[arg(long)]
    token_only: bool,
}

#[derive(Args, Debug)]
struct KeygenArgs {
    /// Directory for the key files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_PRIVATE_NAME)]
    private_name: String,

    #[arg(long, default_value = DEFAULT_PUBLIC_NAME)]
    public_name: String,

    /// Encrypt the private key with the passphrase in this file
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Overwrite existing key files
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct RenderEnvArgs {
    /// Path of the public key on the deployment host
    #[arg(long)]
    public_key_path: Option<String>,

    /// Public key PEM, or a local file whose contents are inlined
    #[arg(long)]
    public_key_inline: Option<String>,

    #[arg(long, default_value = "ed25519")]
    license_algorithm: String,

    #[arg(long, value_enum, default_value_t = EnvFormat::Dotenv)]
    format: EnvFormat,

    /// Write to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// SPKI PEM public key
    #[arg(long)]
    public_key: PathBuf,

    /// Token to verify
    #[arg(long, conflicts_with = "token_file", required_unless_present = "token_file")]
    token: Option<String>,

    /// File containing the token
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Evaluate expiry at this instant instead of now
    #[arg(long)]
    at: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Command::Issue(args) => issue(args),
        Command::Keygen(args) => keygen(args),
        Command::RenderEnv(args) => render_env_cmd(args),
        Command::Verify(args) => verify(args),
    }
}

fn issue(args: IssueArgs) -> Result<()> {
    let issued_at = match &args.issued_at {
        Some(value) => parse_timestamp_arg(value, "--issued-at", false)?,
        None => Utc::now(),
    };
    let expires_at = parse_timestamp_arg(&args.expires, "--expires", true)?;
    if expires_at <= issued_at {
        bail!("expiration must be after the issuance timestamp");
    }

    if !args.private_key.exists() {
        bail!("private key not found: {}", args.private_key.display());
    }
    let passphrase = args.password_file.as_deref().map(read_passphrase).transpose()?;
    let signer = LicenseSigner::from_pem_file(&args.private_key, passphrase.as_deref())
        .with_context(|| format!("loading private key {}", args.private_key.display()))?;

    let mut tenant = TenantInfo::new(args.tenant_id);
    tenant.name = args.tenant_name;
    tenant.metadata = parse_metadata(&args.meta)?;

    let mut request = IssueRequest::new(tenant, expires_at).issued_at(issued_at);
    request.features = args.features;
    request.key_id = args.key_id;
    request.device = if args.bind_this_device {
        let fingerprint = DeviceFingerprint::current();
        debug!(device = %fingerprint, "binding license to this device");
        Some(fingerprint.id().to_string())
    } else {
        args.device
    };

    let issued = generate_license_artifact(&signer, request)?;
    info!(
        token_id = %issued.payload.token_id,
        tenant = %issued.payload.tenant.id,
        expires_at = %issued.payload.expires_at,
        "license issued"
    );

    if let Some(path) = &args.output {
        write_output(path, &render_artifact_file(&issued.artifact, args.pretty)?)?;
        eprintln!("Wrote license artifact to {}", path.display());
    }
    println!("{}", render_issue_output(&issued, args.token_only, args.pretty)?);
    Ok(())
}

fn keygen(args: KeygenArgs) -> Result<()> {
    let passphrase = args.password_file.as_deref().map(read_passphrase).transpose()?;
    let paths = generate_keypair(
        &args.output_dir,
        &args.private_name,
        &args.public_name,
        passphrase.as_deref(),
        args.force,
    )?;
    println!("Generated private key: {}", paths.private_key.display());
    println!("Generated public key:  {}", paths.public_key.display());
    if passphrase.is_some() {
        println!("Private key encrypted with supplied password.");
    }
    Ok(())
}

fn render_env_cmd(args: RenderEnvArgs) -> Result<()> {
    let text = render_env(
        args.public_key_path.as_deref(),
        args.public_key_inline.as_deref(),
        &args.license_algorithm,
        args.format,
    )?;
    match &args.output {
        Some(path) => {
            write_output(path, &format!("{text}\n"))?;
            println!("Wrote environment snippet to {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<()> {
    let verifier = LicenseVerifier::from_public_key_path(&args.public_key)?;
    let token = match (&args.token, &args.token_file) {
        (Some(token), _) => token.clone(),
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
        }
        (None, None) => bail!("one of --token or --token-file is required"),
    };
    let now = match &args.at {
        Some(value) => parse_timestamp_arg(value, "--at", false)?,
        None => Utc::now(),
    };

    match verifier.verify_at(&token, now) {
        Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload.to_value()?)?);
            Ok(())
        }
        Err(LicenseError::Expired(at)) => {
            bail!("license signature is valid but it expired on {at}")
        }
        Err(LicenseError::InvalidSignature) => {
            bail!("license signature does not match the public key")
        }
        Err(e) => Err(e.into()),
    }
}
