//! Authorized-key line parsing and fingerprints.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const KEY_ALGORITHMS: &[&str] = &[
    "ssh-ed25519",
    "ssh-rsa",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// A public key in OpenSSH authorized-key form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    pub algorithm: String,
    pub blob: Vec<u8>,
    pub comment: Option<String>,
}

impl AuthorizedKey {
    /// Parses `<algorithm> <base64> [comment]`. The algorithm named inside
    /// the blob must match the one on the line.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let algorithm = parts
            .next()
            .ok_or_else(|| Error::Validation("empty public key".into()))?;
        if !KEY_ALGORITHMS.contains(&algorithm) {
            return Err(Error::Validation(format!(
                "unsupported key type '{algorithm}'"
            )));
        }

        let encoded = parts
            .next()
            .ok_or_else(|| Error::Validation("public key data missing".into()))?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|_| Error::Validation("public key is not valid base64".into()))?;
        if embedded_algorithm(&blob) != Some(algorithm) {
            return Err(Error::Validation(
                "public key data does not match its type".into(),
            ));
        }

        let comment = parts.collect::<Vec<_>>().join(" ");
        Ok(Self {
            algorithm: algorithm.to_string(),
            blob,
            comment: (!comment.is_empty()).then_some(comment),
        })
    }

    /// `<algorithm> <base64>` without the comment. Stored keys are matched
    /// on this exact string.
    #[must_use]
    pub fn content(&self) -> String {
        format!("{} {}", self.algorithm, STANDARD.encode(&self.blob))
    }

    /// OpenSSH-style `SHA256:<base64>` fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
    }
}

/// Reads the leading SSH string of a key blob.
fn embedded_algorithm(blob: &[u8]) -> Option<&str> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let name = blob.get(4..4 + len)?;
    std::str::from_utf8(name).ok()
}

/// Normalizes an authorized-key line to its stored content form.
pub fn normalize_key(line: &str) -> Result<String> {
    AuthorizedKey::parse(line).map(|k| k.content())
}

#[cfg(test)]
pub(crate) fn sample_key(seed: u8) -> String {
    let mut blob = Vec::new();
    blob.extend_from_slice(&11u32.to_be_bytes());
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    format!("ssh-ed25519 {}", STANDARD.encode(blob))
}
