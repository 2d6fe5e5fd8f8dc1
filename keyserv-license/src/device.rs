//! Device fingerprints used as activation identifiers.
//!
//! A client computes its fingerprint once and sends it with each activation
//! request. The server treats it as an opaque string.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::env;

/// A stable identifier for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Fingerprints the current machine from OS, architecture, hostname and
    /// machine id (where the platform exposes one).
    #[must_use]
    pub fn current() -> Self {
        let mut components = vec![
            env::consts::OS.to_string(),
            env::consts::ARCH.to_string(),
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
        ];
        if let Some(machine_id) = machine_id() {
            components.push(machine_id);
        }
        Self::from_components(&components)
    }

    /// Fingerprints an explicit list of hardware components.
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
        Self(BASE64.encode(&hash[..16]))
    }

    /// Returns the fingerprint string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DeviceFingerprint> for String {
    fn from(fp: DeviceFingerprint) -> Self {
        fp.0
    }
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

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
