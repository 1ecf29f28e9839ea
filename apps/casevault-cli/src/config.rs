//! Layered application configuration.

use std::path::Path;

use anyhow::{Context, Result};
use casekit_auth::AuthConfig;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;
use storage_gateway::GatewayConfig;
use storage_gateway::scanner::PollerConfig;

/// Prefix of environment overrides; `__` separates nesting levels, e.g.
/// `CASEVAULT__GATEWAY__LIST_CACHE_TTL=1m`.
pub const ENV_PREFIX: &str = "CASEVAULT__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub poller: PollerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when neither `RUST_LOG` nor `-v` is given.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file (if any), then `CASEVAULT__*` variables.
    ///
    /// # Errors
    /// If the file is missing or any layer does not fit the schema.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// # Errors
    /// If the merged layers do not fit the schema.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .context("failed to load configuration")
    }
}
