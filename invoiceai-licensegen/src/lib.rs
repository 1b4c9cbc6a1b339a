//! Helpers behind the `invoiceai-licensegen` binary: argument parsing,
//! key provisioning, and output rendering.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveTime, Utc};
use invoiceai_license::{
    ALGORITHM_ED25519, ENV_ALGORITHM, ENV_PUBLIC_KEY, ENV_PUBLIC_KEY_PATH, IssuedLicense,
    LicenseArtifact, LicenseSigner, parse_timestamp,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_PRIVATE_NAME: &str = "license_private.pem";
pub const DEFAULT_PUBLIC_NAME: &str = "license_public.pem";

/// Parses a CLI timestamp. With `end_of_day`, a value without a time part
/// means 23:59:59 UTC of that day.
///
/// # Errors
///
/// Fails if the value is not ISO-8601 or `YYYY-MM-DD`.
pub fn parse_timestamp_arg(value: &str, field: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    let parsed = parse_timestamp(trimmed)
        .map_err(|_| anyhow::anyhow!("{field} must be an ISO-8601 timestamp or YYYY-MM-DD"))?;
    if end_of_day && !trimmed.contains(':') {
        let end = NaiveTime::from_hms_opt(23, 59, 59).context("end-of-day time")?;
        return Ok(parsed.date_naive().and_time(end).and_utc());
    }
    Ok(parsed)
}

/// Parses repeated `KEY=VALUE` metadata entries. Later keys win.
///
/// # Errors
///
/// Fails on an entry without `=` or with a blank key.
pub fn parse_metadata<S: AsRef<str>>(entries: &[S]) -> Result<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        let Some((key, value)) = entry.split_once('=') else {
            bail!("metadata entries must be KEY=VALUE, got {entry:?}");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("metadata keys must be non-empty");
        }
        metadata.insert(key.to_string(), value.trim().to_string());
    }
    Ok(metadata)
}

/// Reads a passphrase file, dropping trailing line endings.
///
/// # Errors
///
/// Fails if the file is missing or unreadable.
pub fn read_passphrase(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        bail!("password file not found: {}", path.display());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(raw.trim_end_matches(['\r', '\n']).as_bytes().to_vec())
}

fn to_json(value: &Value, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

/// Stdout form of an issued license: the bare token, or
/// `{"artifact": ..., "token": ...}`.
///
/// # Errors
///
/// Fails if the artifact cannot be serialized.
pub fn render_issue_output(
    issued: &IssuedLicense,
    token_only: bool,
    pretty: bool,
) -> Result<String> {
    if token_only {
        return Ok(issued.token.clone());
    }
    let output = json!({
        "artifact": issued.artifact.to_value()?,
        "token": issued.token,
    });
    to_json(&output, pretty)
}

/// File form of an artifact, with sorted keys.
///
/// # Errors
///
/// Fails if the artifact cannot be serialized.
pub fn render_artifact_file(artifact: &LicenseArtifact, pretty: bool) -> Result<String> {
    let mut text = to_json(&artifact.to_value()?, pretty)?;
    text.push('\n');
    Ok(text)
}

/// Writes `contents` to `path`, creating parent directories.
///
/// # Errors
///
/// Fails if the directory or file cannot be written.
pub fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

/// Paths of a freshly provisioned key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

/// Generates an Ed25519 key pair and writes it as PEM files.
///
/// The private key is PKCS#8, encrypted when `passphrase` is given, and
/// readable by the owner only on Unix.
///
/// # Errors
///
/// Fails if either file exists and `force` is false, or on any write error.
pub fn generate_keypair(
    output_dir: &Path,
    private_name: &str,
    public_name: &str,
    passphrase: Option<&[u8]>,
    force: bool,
) -> Result<KeyPairPaths> {
    let paths = KeyPairPaths {
        private_key: output_dir.join(private_name),
        public_key: output_dir.join(public_name),
    };
    for path in [&paths.private_key, &paths.public_key] {
        if path.exists() && !force {
            bail!("refusing to overwrite existing file: {}", path.display());
        }
    }
    fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

    let signer = LicenseSigner::generate();
    write_restricted(&paths.private_key, &signer.private_key_pem(passphrase)?, 0o600)?;
    write_restricted(&paths.public_key, &signer.public_key_pem()?, 0o640)?;
    Ok(paths)
}

/// Writes `contents` to a file that carries `mode` before any byte lands in it.
/// An existing file is truncated and re-permissioned first.
fn write_restricted(path: &Path, contents: &str, mode: u32) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing {}", path.display()))
}

/// Shell dialect for [`render_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EnvFormat {
    /// `KEY=value` lines, as read by dotenv files and systemd.
    #[default]
    Dotenv,
    /// `export KEY=value`.
    Bash,
    /// `$env:KEY = value`.
    Powershell,
}

/// Renders the environment a verifying deployment needs.
///
/// `inline` may be PEM text or a path to a PEM file whose contents are
/// inlined.
///
/// # Errors
///
/// Fails unless exactly one of `key_path` and `inline` is given, or the
/// algorithm is not Ed25519.
pub fn render_env(
    key_path: Option<&str>,
    inline: Option<&str>,
    algorithm: &str,
    format: EnvFormat,
) -> Result<String> {
    let algorithm = algorithm.trim();
    if !algorithm.eq_ignore_ascii_case(ALGORITHM_ED25519) {
        bail!("unsupported license algorithm {algorithm:?}");
    }
    let mut lines = vec![(ENV_ALGORITHM, algorithm.to_uppercase())];
    match (key_path, inline) {
        (Some(_), Some(_)) => {
            bail!("provide either --public-key-path or --public-key-inline, not both")
        }
        (Some(path), None) => lines.push((ENV_PUBLIC_KEY_PATH, path.trim().to_string())),
        (None, Some(value)) => lines.push((ENV_PUBLIC_KEY, resolve_inline_pem(value)?)),
        (None, None) => bail!("one of --public-key-path or --public-key-inline is required"),
    }

    let rendered: Vec<String> = lines
        .into_iter()
        .map(|(name, value)| match format {
            EnvFormat::Dotenv => format!("{name}={value}"),
            EnvFormat::Bash => format!("export {name}={value}"),
            EnvFormat::Powershell => format!("$env:{name} = {value}"),
        })
        .collect();
    Ok(rendered.join("\n"))
}

fn resolve_inline_pem(value: &str) -> Result<String> {
    let candidate = Path::new(value.trim());
    let pem = if candidate.is_file() {
        fs::read_to_string(candidate).with_context(|| format!("reading {}", candidate.display()))?
    } else {
        value.to_string()
    };
    // Single-line form so the value survives env files.
    Ok(pem.trim().replace('\n', "\\n"))
}
