//! Config — the core emulator's configuration model.
//!
//! Mirrors the flat environment-variable surface of the cloud provider's own
//! emulator tooling rather than the gateway's nested `config`-crate layering;
//! this is the one place a plain env-var reader is the idiomatic fit, since
//! compatibility with existing client SDKs hinges on recognizing env vars
//! spelled exactly like the real thing (`STORAGE_EMULATOR_HOST`, etc).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Filesystem root for blob content and the metadata database.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Base URL used when minting signed URLs.
    #[serde(default = "default_emulator_host")]
    pub storage_emulator_host: String,

    /// HMAC secret for signed URLs and bearer tokens.
    #[serde(default = "default_signed_url_secret")]
    pub signed_url_secret: String,

    /// Lifecycle executor tick interval, in minutes.
    #[serde(default = "default_lifecycle_interval_minutes")]
    pub lifecycle_interval_minutes: u64,

    /// Compute state reconciler tick interval, in seconds.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    #[serde(default)]
    pub auth_mode: AuthMode,

    #[serde(default = "default_true")]
    pub rate_limiting_enabled: bool,

    /// Docker (or compatible) socket the container driver connects to.
    /// Empty string means "connect with defaults" (`DOCKER_HOST` env var or
    /// the platform default socket).
    #[serde(default)]
    pub docker_host: String,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Disabled,
    Optional,
    Required,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(AuthMode::Disabled),
            "optional" => Ok(AuthMode::Optional),
            "required" => Ok(AuthMode::Required),
            other => Err(format!("unknown auth mode: {other}")),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./.emulator-storage")
}

fn default_emulator_host() -> String {
    "http://localhost:9000".to_string()
}

fn default_signed_url_secret() -> String {
    "local-development-secret".to_string()
}

fn default_lifecycle_interval_minutes() -> u64 {
    10
}

fn default_reconcile_interval_secs() -> u64 {
    15
}

fn default_webhook_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            storage_emulator_host: default_emulator_host(),
            signed_url_secret: default_signed_url_secret(),
            lifecycle_interval_minutes: default_lifecycle_interval_minutes(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            auth_mode: AuthMode::default(),
            rate_limiting_enabled: true,
            docker_host: String::new(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

impl EmulatorConfig {
    /// Load configuration, applying environment-variable overrides on top
    /// of the defaults. There is deliberately no config-file layer here —
    /// that belongs to the gateway binary's own `config` crate layering,
    /// which composes an `EmulatorConfig` from the same env vars plus its
    /// own TOML files.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("STORAGE_ROOT") {
            cfg.storage_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STORAGE_EMULATOR_HOST") {
            cfg.storage_emulator_host = v;
        }
        if let Ok(v) = std::env::var("SIGNED_URL_SECRET") {
            cfg.signed_url_secret = v;
        }
        if let Ok(v) = std::env::var("LIFECYCLE_INTERVAL_MINUTES") {
            if let Ok(n) = v.parse() {
                cfg.lifecycle_interval_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("RECONCILE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.reconcile_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("AUTH_MODE") {
            if let Ok(mode) = v.parse() {
                cfg.auth_mode = mode;
            }
        }
        if let Ok(v) = std::env::var("RATE_LIMITING_ENABLED") {
            cfg.rate_limiting_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("DOCKER_HOST") {
            cfg.docker_host = v;
        }
        if let Ok(v) = std::env::var("WEBHOOK_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.webhook_timeout_secs = n;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.lifecycle_interval_minutes == 0 {
            return Err("lifecycle_interval_minutes must be greater than zero".into());
        }
        if self.reconcile_interval_secs == 0 {
            return Err("reconcile_interval_secs must be greater than zero".into());
        }
        if self.signed_url_secret.is_empty() {
            return Err("signed_url_secret must not be empty".into());
        }
        Ok(())
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.storage_root.join("metadata.db")
    }

    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle_interval_minutes * 60)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EmulatorConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut cfg = EmulatorConfig::default();
        cfg.lifecycle_interval_minutes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auth_mode_parses_case_insensitively() {
        assert_eq!("REQUIRED".parse::<AuthMode>().unwrap(), AuthMode::Required);
        assert!("bogus".parse::<AuthMode>().is_err());
    }
}
