//! Local device fingerprint for the optional `device` license binding.
//!
//! The fingerprint hashes stable machine identifiers (OS, architecture,
//! hostname, machine id). An issuer can embed it as the payload's `device`
//! so a deployment can check whether a license was cut for this machine.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::env;

/// Prefix distinguishing fingerprints from free-form device labels.
pub const FINGERPRINT_PREFIX: &str = "dev_";

/// A stable identifier of the current machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceFingerprint {
    id: String,
}

impl DeviceFingerprint {
    /// Computes the fingerprint of the machine this process runs on.
    #[must_use]
    pub fn current() -> Self {
        Self::from_components(&collect_machine_ids())
    }

    /// Computes a fingerprint from explicit identifier components.
    #[must_use]
    pub fn from_components<S: AsRef<str>>(components: &[S]) -> Self {
        let mut hasher = Sha256::new();
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                hasher.update(b"|");
            }
            hasher.update(component.as_ref().as_bytes());
        }
        let hash = hasher.finalize();
        Self {
            id: format!("{FINGERPRINT_PREFIX}{}", URL_SAFE_NO_PAD.encode(&hash[..16])),
        }
    }

    /// The identifier embedded in a payload's `device` field.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

fn collect_machine_ids() -> Vec<String> {
    let mut ids = vec![env::consts::OS.to_string(), env::consts::ARCH.to_string(), hostname()];
    if let Some(machine_id) = machine_id() {
        ids.push(machine_id);
    }
    ids
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable() {
        assert_eq!(DeviceFingerprint::current(), DeviceFingerprint::current());
    }

    #[test]
    fn components_change_the_id() {
        let a = DeviceFingerprint::from_components(&["linux", "x86_64", "host-a"]);
        let b = DeviceFingerprint::from_components(&["linux", "x86_64", "host-b"]);
        assert_ne!(a, b);
        assert!(a.id().starts_with(FINGERPRINT_PREFIX));
    }

    #[test]
    fn component_boundaries_matter() {
        let a = DeviceFingerprint::from_components(&["ab", "c"]);
        let b = DeviceFingerprint::from_components(&["a", "bc"]);
        assert_ne!(a, b);
    }
}
