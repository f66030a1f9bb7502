//! Configuration module
//!
//! Optional TOML configuration supplying defaults for the server and
//! client; command-line flags always win. The protocol core itself reads
//! no environment and persists nothing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::DEFAULT_PORT;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Simulated-loss settings (server side)
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Invocation settings (client side)
    #[serde(default)]
    pub invocation: InvocationConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Lifetime of cached at-most-once replies, in seconds
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_dedup_ttl_secs() -> u64 {
    60
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

/// Simulated-loss configuration, probabilities in `[0, 1]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Probability of dropping an incoming request
    #[serde(default)]
    pub loss_req: f64,
    /// Probability of dropping an outgoing reply
    #[serde(default)]
    pub loss_rep: f64,
}

/// Client invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Invocation semantics: "atmost" (or "at-most-once") selects
    /// at-most-once, anything else at-least-once
    #[serde(default = "default_semantics")]
    pub semantics: String,
    /// Receive timeout per attempt, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Send attempts before giving up
    #[serde(default = "default_retry")]
    pub retry: u32,
}

fn default_semantics() -> String {
    "atmost".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_retry() -> u32 {
    5
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            semantics: default_semantics(),
            timeout_ms: default_timeout_ms(),
            retry: default_retry(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("bankwire/config.toml")),
            Some(PathBuf::from("./bankwire.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> String {
    let config = Config {
        simulation: SimulationConfig {
            loss_req: 0.2,
            loss_rep: 0.2,
        },
        invocation: InvocationConfig {
            semantics: "atmost".to_string(),
            timeout_ms: 500,
            retry: 5,
        },
        ..Default::default()
    };

    toml::to_string_pretty(&config).unwrap()
}
