//! Typed configuration for repository access and decryption.
//!
//! Loaded from a YAML file or built directly; every field not supplied
//! falls back to the conventional EnvGene repository layout.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where and how to read the environment configuration repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Base URL of the GitLab instance, e.g. `https://git.example.com`.
    pub base_url: String,

    /// Project path within the instance, e.g. `env/configuration`.
    pub project: String,

    /// Access token with read permission on the project.
    #[serde(default)]
    pub token: String,

    /// Branch or tag to read; everything is fetched at this fixed ref.
    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,

    /// Root of the per-environment deployment tree.
    #[serde(default = "default_deployment_root")]
    pub deployment_root: String,

    /// Parameters document path, relative to an environment directory.
    #[serde(default = "default_parameters_file")]
    pub parameters_file: String,

    /// Credentials document path, relative to an environment directory.
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,

    /// Project identifier -> repository project path.
    #[serde(default)]
    pub projects: HashMap<Uuid, String>,
}

fn default_ref() -> String {
    "master".to_string()
}

fn default_deployment_root() -> String {
    "effective-set/deployment".to_string()
}

fn default_parameters_file() -> String {
    "values/deployment-parameters.yaml".to_string()
}

fn default_credentials_file() -> String {
    "values/deployment-credentials.yaml".to_string()
}

/// Settings for the SOPS decryption gate. When `age_key` is absent the
/// resolver runs without decryption and serves documents as fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionConfig {
    #[serde(default)]
    pub age_key: Option<String>,

    #[serde(default = "default_decrypt_timeout")]
    pub timeout_seconds: u64,
}

// Derived Default would zero the timeout; it must agree with the serde
// default so a config without a `decryption` section behaves the same as
// one with an empty section.
impl Default for DecryptionConfig {
    fn default() -> Self {
        Self {
            age_key: None,
            timeout_seconds: default_decrypt_timeout(),
        }
    }
}

fn default_decrypt_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub decryption: DecryptionConfig,
}

impl ResolverConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repository.base_url.trim().is_empty() {
            return Err(Error::Config("repository.base_url is required".to_string()));
        }
        if self.repository.project.trim().is_empty() {
            return Err(Error::Config("repository.project is required".to_string()));
        }
        if self.repository.deployment_root.trim().is_empty() {
            return Err(Error::Config(
                "repository.deployment_root is required".to_string(),
            ));
        }
        Ok(())
    }
}
