use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ServerConfig;
use crate::error::{Error, Result};
use crate::types::Visibility;

/// Process-wide settings, loaded once from an optional TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub source_control: SourceControlSettings,
    pub keycloak: KeycloakSettings,
    pub proof_of_work: ProofOfWorkSettings,
    pub password: PasswordSettings,
    pub avatar: AvatarSettings,
    pub trace: TraceSettings,
    pub ssh: SshSettings,
    pub usage: UsageSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Loads the file when given, falling back to defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceControlSettings {
    pub role_mode_enabled: bool,
    pub multi_tenant_enabled: bool,
    pub default_org_visibility: Visibility,
}

impl Default for SourceControlSettings {
    fn default() -> Self {
        Self {
            role_mode_enabled: true,
            multi_tenant_enabled: false,
            default_org_visibility: Visibility::Limited,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeycloakSettings {
    pub enabled: bool,
    pub url: String,
    pub realm: String,
    pub master_client_id: String,
    pub master_client_secret: String,
    pub realm_client_id: String,
    pub realm_client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProofOfWorkSettings {
    pub enabled: bool,
    pub zero_count: usize,
}

impl Default for ProofOfWorkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            zero_count: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordSettings {
    pub min_length: usize,
    /// Subset of `lower`, `upper`, `digit`, `spec`.
    pub complexity: Vec<String>,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            min_length: 8,
            complexity: vec!["lower".into(), "upper".into(), "digit".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvatarSettings {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    /// Placeholders: `{start}`, `{end}`, `{duration}`, `{identity}`, `{body}`,
    /// `{remote}`, `{req}`, `{status}`.
    pub log_template: String,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            log_template: "{remote} - {identity} \"{req}\" {status} {duration}ms body={body}"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub service_user: String,
    /// Authorized-key lines of CAs whose user certificates are accepted.
    pub trusted_user_ca_keys: Vec<String>,
    /// Root directory holding bare repositories as `<owner>/<repo>.git`.
    pub repo_root: Option<PathBuf>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            service_user: "git".to_string(),
            trusted_user_ca_keys: Vec::new(),
            repo_root: None,
        }
    }
}

impl SshSettings {
    #[must_use]
    pub fn repo_root(&self, data_dir: &Path) -> PathBuf {
        self.repo_root
            .clone()
            .unwrap_or_else(|| data_dir.join("repos"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    pub drain_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub stale_lock_secs: u64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            drain_interval_secs: 10,
            reconcile_interval_secs: 300,
            stale_lock_secs: 600,
        }
    }
}
