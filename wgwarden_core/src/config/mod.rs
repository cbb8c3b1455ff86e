//! Configuration management module for wgwarden.
//!
//! Manager settings live in a TOML file, separate from the WireGuard tunnel
//! text. Every field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::tunnel::verify::VerifySettings;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Tunnel identity and artifact placement.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelSettings {
    /// Interface name; also names the artifact and the OS service (default: "wg0")
    #[serde(default = "default_interface_name")]
    pub interface_name: String,

    /// Directory for the transient config file (default: OS temp dir)
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

fn default_interface_name() -> String {
    "wg0".to_string()
}

impl Default for TunnelSettings {
    fn default() -> Self {
        TunnelSettings {
            interface_name: default_interface_name(),
            artifact_dir: None,
        }
    }
}

impl TunnelSettings {
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Engine discovery and invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Extra installation directories, probed before the platform defaults
    #[serde(default)]
    pub install_dirs: Vec<PathBuf>,

    /// Upper bound for every engine/OS command in seconds (default: 60)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            install_dirs: Vec::new(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl EngineSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Connectivity verification endpoints and reference addresses.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifyConfig {
    #[serde(default = "default_primary_ip_service")]
    pub primary_ip_service: String,

    #[serde(default = "default_secondary_ip_service")]
    pub secondary_ip_service: String,

    #[serde(default = "default_reachability_url")]
    pub reachability_url: String,

    #[serde(default = "default_dns_probe_host")]
    pub dns_probe_host: String,

    /// Network call timeout in seconds (default: 10)
    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,

    /// Wait after activation before verifying, in seconds (default: 5)
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Expected tunnel exit address (default: peer Endpoint host if it is an IP)
    #[serde(default)]
    pub expected_exit_ip: Option<String>,

    /// Pre-tunnel address (default: measured before activation)
    #[serde(default)]
    pub original_ip: Option<String>,
}

fn default_primary_ip_service() -> String {
    "https://api.ipify.org".to_string()
}

fn default_secondary_ip_service() -> String {
    "https://ifconfig.me".to_string()
}

fn default_reachability_url() -> String {
    "https://www.google.com".to_string()
}

fn default_dns_probe_host() -> String {
    "google.com".to_string()
}

fn default_verify_timeout() -> u64 {
    10
}

fn default_settle_delay() -> u64 {
    5
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            primary_ip_service: default_primary_ip_service(),
            secondary_ip_service: default_secondary_ip_service(),
            reachability_url: default_reachability_url(),
            dns_probe_host: default_dns_probe_host(),
            timeout_secs: default_verify_timeout(),
            settle_delay_secs: default_settle_delay(),
            expected_exit_ip: None,
            original_ip: None,
        }
    }
}

impl VerifyConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Runtime settings; `fallback_exit_ip` is used when no exit IP is configured.
    pub fn to_settings(&self, fallback_exit_ip: Option<&str>) -> VerifySettings {
        VerifySettings {
            primary_ip_service: self.primary_ip_service.clone(),
            secondary_ip_service: self.secondary_ip_service.clone(),
            reachability_url: self.reachability_url.clone(),
            dns_probe_host: self.dns_probe_host.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            expected_exit_ip: self
                .expected_exit_ip
                .clone()
                .or_else(|| fallback_exit_ip.map(str::to_string)),
        }
    }
}

/// Health check cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorSettings {
    /// Seconds between health checks (default: 30)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        SupervisorSettings {
            health_interval_secs: default_health_interval(),
        }
    }
}

impl SupervisorSettings {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}

/// Main configuration structure for wgwarden.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WardenConfig {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub tunnel: TunnelSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub verify: VerifyConfig,

    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WardenConfig {
    fn default() -> Self {
        WardenConfig {
            log_level: default_log_level(),
            tunnel: TunnelSettings::default(),
            engine: EngineSettings::default(),
            verify: VerifyConfig::default(),
            supervisor: SupervisorSettings::default(),
        }
    }
}

impl WardenConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: WardenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;

        // Environment variables take precedence over the file
        Self::apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.tunnel.interface_name;
        if name.is_empty() {
            return Err(ConfigError::MissingValue("tunnel.interface_name".to_string()));
        }
        if name.len() > 15
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(ConfigError::InvalidValue {
                key: "tunnel.interface_name".to_string(),
                message: "must be at most 15 characters of [A-Za-z0-9_.-]".to_string(),
            });
        }

        for (key, value) in [
            ("engine.command_timeout_secs", self.engine.command_timeout_secs),
            ("verify.timeout_secs", self.verify.timeout_secs),
            ("supervisor.health_interval_secs", self.supervisor.health_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        for (key, value) in [
            ("verify.primary_ip_service", &self.verify.primary_ip_service),
            ("verify.secondary_ip_service", &self.verify.secondary_ip_service),
            ("verify.reachability_url", &self.verify.reachability_url),
            ("verify.dns_probe_host", &self.verify.dns_probe_host),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingValue(key.to_string()));
            }
        }

        for (key, value) in [
            ("verify.expected_exit_ip", &self.verify.expected_exit_ip),
            ("verify.original_ip", &self.verify.original_ip),
        ] {
            if let Some(ip) = value {
                if ip.trim().parse::<IpAddr>().is_err() {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("'{}' is not an IP address", ip),
                    });
                }
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: WGWARDEN_)
    /// Example keys:
    /// - WGWARDEN_LOG_LEVEL
    /// - WGWARDEN_TUNNEL_INTERFACE_NAME, WGWARDEN_TUNNEL_ARTIFACT_DIR
    /// - WGWARDEN_ENGINE_INSTALL_DIRS (comma separated), WGWARDEN_ENGINE_COMMAND_TIMEOUT_SECS
    /// - WGWARDEN_VERIFY_EXPECTED_EXIT_IP, WGWARDEN_VERIFY_ORIGINAL_IP,
    ///   WGWARDEN_VERIFY_TIMEOUT_SECS, WGWARDEN_VERIFY_SETTLE_DELAY_SECS
    /// - WGWARDEN_SUPERVISOR_HEALTH_INTERVAL_SECS
    fn apply_env_overrides(cfg: &mut WardenConfig) {
        use std::env;

        fn parse_u64(s: &str) -> Option<u64> {
            s.trim().parse().ok()
        }
        fn split_csv(s: &str) -> Vec<PathBuf> {
            s.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .collect()
        }

        if let Ok(v) = env::var("WGWARDEN_LOG_LEVEL") {
            cfg.log_level = v;
        }

        // Tunnel
        if let Ok(v) = env::var("WGWARDEN_TUNNEL_INTERFACE_NAME") {
            if !v.is_empty() {
                cfg.tunnel.interface_name = v;
            }
        }
        if let Ok(v) = env::var("WGWARDEN_TUNNEL_ARTIFACT_DIR") {
            if !v.is_empty() {
                cfg.tunnel.artifact_dir = Some(PathBuf::from(v));
            }
        }

        // Engine
        if let Ok(v) = env::var("WGWARDEN_ENGINE_INSTALL_DIRS") {
            let list = split_csv(&v);
            if !list.is_empty() {
                cfg.engine.install_dirs = list;
            }
        }
        if let Ok(v) = env::var("WGWARDEN_ENGINE_COMMAND_TIMEOUT_SECS") {
            if let Some(n) = parse_u64(&v) {
                cfg.engine.command_timeout_secs = n;
            }
        }

        // Verify
        if let Ok(v) = env::var("WGWARDEN_VERIFY_EXPECTED_EXIT_IP") {
            if !v.is_empty() {
                cfg.verify.expected_exit_ip = Some(v);
            }
        }
        if let Ok(v) = env::var("WGWARDEN_VERIFY_ORIGINAL_IP") {
            if !v.is_empty() {
                cfg.verify.original_ip = Some(v);
            }
        }
        if let Ok(v) = env::var("WGWARDEN_VERIFY_TIMEOUT_SECS") {
            if let Some(n) = parse_u64(&v) {
                cfg.verify.timeout_secs = n;
            }
        }
        if let Ok(v) = env::var("WGWARDEN_VERIFY_SETTLE_DELAY_SECS") {
            if let Some(n) = parse_u64(&v) {
                cfg.verify.settle_delay_secs = n;
            }
        }

        // Supervisor
        if let Ok(v) = env::var("WGWARDEN_SUPERVISOR_HEALTH_INTERVAL_SECS") {
            if let Some(n) = parse_u64(&v) {
                cfg.supervisor.health_interval_secs = n;
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("wgwarden").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}
