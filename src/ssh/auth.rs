use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::keys::normalize_key;
use crate::config::SshSettings;
use crate::error::Result;
use crate::store::DirectoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertType {
    User,
    Host,
}

/// An OpenSSH certificate as decoded by the transport.
#[derive(Debug, Clone)]
pub struct OfferedCertificate {
    pub key_id: String,
    /// Authorized-key form of the signing CA key.
    pub signature_key: String,
    pub principals: Vec<String>,
    pub valid_after: DateTime<Utc>,
    pub valid_before: DateTime<Utc>,
    pub cert_type: CertType,
}

impl OfferedCertificate {
    fn check(&self, principal: &str, now: DateTime<Utc>) -> std::result::Result<(), &'static str> {
        if self.cert_type != CertType::User {
            return Err("not a user certificate");
        }
        if !self.principals.iter().any(|p| p == principal) {
            return Err("principal not in certificate");
        }
        if now < self.valid_after {
            return Err("certificate not yet valid");
        }
        if now >= self.valid_before {
            return Err("certificate expired");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum OfferedKey {
    /// Authorized-key line, comment optional.
    Plain(String),
    Certificate(OfferedCertificate),
}

/// Identity bound to an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyIdentity {
    pub key_id: i64,
    pub owner_id: i64,
}

/// Public-key authentication. `Ok(None)` is a rejection; details are
/// logged, never returned.
pub fn authenticate(
    directory: &dyn DirectoryStore,
    settings: &SshSettings,
    username: &str,
    key: &OfferedKey,
    remote: &str,
) -> Result<Option<KeyIdentity>> {
    if username != settings.service_user {
        warn!(
            "Invalid SSH username {} - must use {} for all git operations via ssh",
            username, settings.service_user
        );
        warn!("Failed authentication attempt from {}", remote);
        return Ok(None);
    }

    let identity = match key {
        OfferedKey::Plain(line) => authenticate_plain(directory, line, remote)?,
        OfferedKey::Certificate(cert) => authenticate_certificate(directory, settings, cert, remote)?,
    };
    if identity.is_none() {
        warn!("Failed authentication attempt from {}", remote);
    }
    Ok(identity)
}

fn authenticate_plain(
    directory: &dyn DirectoryStore,
    line: &str,
    remote: &str,
) -> Result<Option<KeyIdentity>> {
    let Ok(content) = normalize_key(line) else {
        warn!("Malformed public key from {}", remote);
        return Ok(None);
    };

    match directory.get_public_key_by_content(&content)? {
        Some(key) => {
            debug!("Successfully authenticated {} with key {}", remote, key.id);
            Ok(Some(KeyIdentity {
                key_id: key.id,
                owner_id: key.owner_id,
            }))
        }
        None => {
            warn!("Unknown public key from {}", remote);
            Ok(None)
        }
    }
}

fn authenticate_certificate(
    directory: &dyn DirectoryStore,
    settings: &SshSettings,
    cert: &OfferedCertificate,
    remote: &str,
) -> Result<Option<KeyIdentity>> {
    if settings.trusted_user_ca_keys.is_empty() {
        warn!("Certificate rejected: no trusted certificate authorities for this server");
        return Ok(None);
    }

    let trusted: Vec<String> = settings
        .trusted_user_ca_keys
        .iter()
        .filter_map(|line| normalize_key(line).ok())
        .collect();
    let signer_trusted = normalize_key(&cert.signature_key)
        .map(|ca| trusted.contains(&ca))
        .unwrap_or(false);

    let now = Utc::now();
    for principal in &cert.principals {
        let Some(key) = directory.get_public_key_by_content(principal)? else {
            debug!("Principal rejected: {} unknown principal {}", remote, principal);
            continue;
        };

        if !signer_trusted {
            debug!(
                "Principal rejected: {} untrusted authority for principal {}",
                remote, principal
            );
            continue;
        }

        // An invalid certificate stops the search outright.
        if let Err(reason) = cert.check(principal, now) {
            error!(
                "Invalid certificate {} presented for principal {} from {}: {}",
                cert.key_id, principal, remote, reason
            );
            return Ok(None);
        }

        debug!("Successfully authenticated {} with principal {}", remote, principal);
        return Ok(Some(KeyIdentity {
            key_id: key.id,
            owner_id: key.owner_id,
        }));
    }

    warn!(
        "Certificate {} from {} has no valid principals",
        cert.key_id, remote
    );
    Ok(None)
}
