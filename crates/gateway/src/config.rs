//! Config — gateway-level configuration: HTTP server and logging settings
//! plus the embedded core emulator config, loaded through the same layered
//! `config`-crate + `dotenvy` pattern used for the rest of the settings in
//! this workspace.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use emulator_core::config::EmulatorConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub body_limit_bytes: usize,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl GatewayConfig {
    /// Load configuration from `gateway.toml` and environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        // Start with compile-time defaults as the foundation
        // This ensures that if a key is missing in files/env, we use the default
        let defaults = config::Config::try_from(&GatewayConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        // Layer config files (overrides defaults)
        // Try these locations in order:
        // 1. /etc/emulator/gateway.toml (container deployment)
        // 2. config/gateway.toml (local development)
        // 3. crates/gateway/config/gateway.toml (workspace root)
        let config_paths = ["/etc/emulator/gateway", "config/gateway", "crates/gateway/config/gateway"];

        for path in config_paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Layer environment variables (overrides everything)
        // Use double underscore for nested keys: GATEWAY_SERVER__BIND_ADDRESS.
        // The embedded emulator config additionally reads its own flat env
        // vars (STORAGE_ROOT, AUTH_MODE, ...) via EmulatorConfig::from_env,
        // applied as a second pass at startup.
        builder = builder.add_source(
            config::Environment::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate bind address
        self.server.bind_address.parse::<std::net::SocketAddr>()
            .context("Invalid bind_address")?;

        self.emulator.validate().map_err(anyhow::Error::msg).context("Invalid emulator configuration")?;

        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:9000".to_string(),
                read_timeout_secs: 30,
                write_timeout_secs: 30,
                body_limit_bytes: 64 * 1024 * 1024,
                enable_cors: true,
                cors_origins: vec!["*".to_string()],
                rate_limit_requests: 100,
                rate_limit_window_secs: 60,
            },
            logging: LoggingConfig {
                level: "info,emulator=debug".to_string(),
                format: LogFormat::Pretty,
                output: LogOutput::Stdout,
            },
            emulator: EmulatorConfig::default(),
        }
    }
}
