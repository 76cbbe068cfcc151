//! Replica-set keyfile material
//!
//! The engine requires every member of an authenticated replica set to share
//! a keyfile. Content is either taken verbatim from configuration or derived
//! deterministically from a passphrase and salt so that independently
//! scheduled nodes produce the same file without coordination.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha512};
use thiserror::Error;

/// The engine accepts keyfiles of 6 to 1024 base64 characters.
const KEYFILE_MAX_CHARS: usize = 756;

/// Salt applied when the deployment configures none. Deployments sharing the
/// default produce identical keyfiles; overriding the salt is a deployment
/// concern, not enforced here.
const DEFAULT_SALT: &str = "mongoward-cluster-salt";

/// Error types for keyfile operations
#[derive(Error, Debug)]
pub enum KeyfileError {
    #[error("passphrase must not be empty")]
    EmptyPassphrase,

    #[error("failed to write keyfile: {0}")]
    Write(#[from] std::io::Error),
}

/// Derive deterministic keyfile content from a passphrase and optional salt.
///
/// The passphrase and salt are digested with SHA-512, the digest is re-fed
/// until enough bytes accumulate, and the result is base64 encoded and
/// truncated to the engine's accepted length.
pub fn derive_content(passphrase: &str, salt: Option<&str>) -> Result<String, KeyfileError> {
    if passphrase.is_empty() {
        return Err(KeyfileError::EmptyPassphrase);
    }

    let salt = salt.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SALT);

    let mut material = Vec::with_capacity(1024);
    let mut block: Vec<u8> = format!("{}:{}", passphrase, salt).into_bytes();
    while material.len() * 4 / 3 < KEYFILE_MAX_CHARS {
        let mut hasher = Sha512::new();
        hasher.update(&block);
        block = hasher.finalize().to_vec();
        material.extend_from_slice(&block);
    }

    let mut encoded = BASE64.encode(&material);
    encoded.truncate(KEYFILE_MAX_CHARS);
    Ok(encoded)
}

/// Write keyfile content to disk with owner-only permissions, as the engine
/// refuses group- or world-readable keyfiles.
pub fn write_keyfile(path: &Path, content: &str) -> Result<(), KeyfileError> {
    std::fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
