//! Server configuration
//!
//! Values come from the defaults, then a TOML file, then environment
//! variables, then command-line flags; later sources win.

use clap::Parser;
use codebox_sandbox::{ResourceLimits, SandboxConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file read from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "codebox.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub bind_addr: SocketAddr,

    /// Directory shared by executed code and the artifact extractor
    pub scratch_dir: PathBuf,

    /// Timeout for requests that do not name one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Upper bound for requested timeouts
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,

    /// Write daily-rolling log files here in addition to stderr
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            scratch_dir: PathBuf::from("/scratch"),
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(600),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or from `codebox.toml` when present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment and command-line overrides
    pub fn apply(&mut self, args: &CliArgs) {
        if let Some(addr) = args.bind {
            self.bind_addr = addr;
        }
        if let Some(dir) = &args.scratch_dir {
            self.scratch_dir = dir.clone();
        }
        if let Some(secs) = args.default_timeout {
            self.default_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = args.max_timeout {
            self.max_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = &args.log_dir {
            self.log_dir = Some(dir.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "max_timeout must be at least one second".to_string(),
            ));
        }
        if self.default_timeout > self.max_timeout {
            tracing::warn!(
                default_timeout_secs = self.default_timeout.as_secs(),
                max_timeout_secs = self.max_timeout.as_secs(),
                "default_timeout exceeds max_timeout and will be clamped"
            );
        }
        Ok(())
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            scratch_dir: self.scratch_dir.clone(),
            limits: ResourceLimits::new(self.default_timeout, self.max_timeout),
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "codebox")]
#[command(about = "Stateful code execution service")]
pub struct CliArgs {
    /// TOML config file (defaults to ./codebox.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "CODEBOX_BIND_ADDR")]
    pub bind: Option<SocketAddr>,

    /// Scratch directory
    #[arg(long, env = "CODEBOX_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Default execution timeout in seconds
    #[arg(long, env = "CODEBOX_DEFAULT_TIMEOUT")]
    pub default_timeout: Option<u64>,

    /// Maximum execution timeout in seconds
    #[arg(long, env = "CODEBOX_MAX_TIMEOUT")]
    pub max_timeout: Option<u64>,

    /// Directory for rolling log files
    #[arg(long, env = "CODEBOX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Resolve the effective configuration
    pub fn resolve(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = ServerConfig::load(self.config.as_deref())?;
        config.apply(self);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.scratch_dir, PathBuf::from("/scratch"));
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.max_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("codebox.toml");
        std::fs::write(
            &path,
            "scratch_dir = \"/data/scratch\"\ndefault_timeout = \"45s\"\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.scratch_dir, PathBuf::from("/data/scratch"));
        assert_eq!(config.default_timeout, Duration::from_secs(45));
        assert_eq!(config.max_timeout, Duration::from_secs(600));
        assert_eq!(config.bind_addr, ServerConfig::default().bind_addr);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ServerConfig::default();
        config.max_timeout = Duration::from_secs(120);
        config.log_dir = Some(PathBuf::from("/var/log/codebox"));
        let parsed: ServerConfig = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "max_timeout = 12").unwrap();

        let err = ServerConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = ServerConfig::load(Some(Path::new("/nonexistent/codebox.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_flags_override_file() {
        let args = CliArgs::try_parse_from([
            "codebox",
            "--bind",
            "127.0.0.1:9000",
            "--scratch-dir",
            "/tmp/codebox",
            "--max-timeout",
            "60",
        ])
        .unwrap();

        let mut config = ServerConfig::default();
        config.apply(&args);
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.scratch_dir, PathBuf::from("/tmp/codebox"));
        assert_eq!(config.max_timeout, Duration::from_secs(60));
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_max() {
        let config = ServerConfig {
            max_timeout: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sandbox_config_clamps_default() {
        let config = ServerConfig {
            default_timeout: Duration::from_secs(900),
            ..ServerConfig::default()
        };
        let sandbox = config.sandbox_config();
        assert_eq!(sandbox.limits.default_timeout, Duration::from_secs(600));
    }
}
