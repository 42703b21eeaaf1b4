//! Configuration types for Playback

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use hyper::Uri;

use crate::{PlaybackError, Result};

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:13111";

/// Operating mode of the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No mode selected: proxy requests are rejected
    #[default]
    Idle,
    /// Forward to the remote and capture every interaction
    Recording,
    /// Serve captured interactions without contacting the remote
    Replaying,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "idle",
            Mode::Recording => "recording",
            Mode::Replaying => "replaying",
        };
        f.write_str(name)
    }
}

/// How the replayer picks the interaction for an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMatch {
    /// Serve interactions in recorded order regardless of request content
    #[default]
    Sequential,
    /// Serve in recorded order, but only if the request fingerprint matches
    Verified,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the remote service being proxied
    pub remote_url: String,
    /// Optional webhook receiver that gets a copy of recorded requests
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Directory that relative cassette paths resolve against
    pub cassette_dir: PathBuf,
    /// Address the control server listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Replay matching policy
    #[serde(default)]
    pub replay_match: ReplayMatch,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 13111))
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request size in bytes
    pub max_request_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
    /// Deadline for one upstream round trip
    pub upstream_timeout_ms: u64,
    /// How long a control operation waits for in-flight proxy requests
    pub control_lock_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            max_headers: 128,
            upstream_timeout_ms: 30_000,
            control_lock_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Create a configuration with default limits and bind address
    #[must_use]
    pub fn new(remote_url: impl Into<String>, cassette_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: remote_url.into(),
            webhook_url: None,
            cassette_dir: cassette_dir.into(),
            bind_addr: default_bind_addr(),
            replay_match: ReplayMatch::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlaybackError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| PlaybackError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        parse_base_url("remote_url", &self.remote_url)?;

        if let Some(webhook) = &self.webhook_url {
            parse_base_url("webhook_url", webhook)?;
        }

        if !self.cassette_dir.is_dir() {
            return Err(PlaybackError::ConfigError(format!(
                "Cassette directory does not exist: {}",
                self.cassette_dir.display()
            )));
        }

        let limits = [
            ("max_connections", self.limits.max_connections as u64),
            ("max_request_size", self.limits.max_request_size as u64),
            ("max_response_size", self.limits.max_response_size as u64),
            ("max_headers", self.limits.max_headers as u64),
            ("upstream_timeout_ms", self.limits.upstream_timeout_ms),
            ("control_lock_timeout_ms", self.limits.control_lock_timeout_ms),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(PlaybackError::ConfigError(format!("{name} must be > 0")));
            }
        }

        Ok(())
    }

    /// Parsed remote base URL
    ///
    /// # Errors
    ///
    /// Returns error if `remote_url` is not an absolute http(s) URL
    pub fn remote_uri(&self) -> Result<Uri> {
        parse_base_url("remote_url", &self.remote_url)
    }

    /// Parsed webhook URL, if one is configured
    ///
    /// # Errors
    ///
    /// Returns error if `webhook_url` is not an absolute http(s) URL
    pub fn webhook_uri(&self) -> Result<Option<Uri>> {
        self.webhook_url
            .as_deref()
            .map(|url| parse_base_url("webhook_url", url))
            .transpose()
    }
}

/// Parse an absolute http(s) base URL
fn parse_base_url(field: &str, url: &str) -> Result<Uri> {
    let uri: Uri = url
        .parse()
        .map_err(|e| PlaybackError::ConfigError(format!("{field}: invalid URL '{url}': {e}")))?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        _ => {
            return Err(PlaybackError::ConfigError(format!(
                "{field}: URL must start with http:// or https://, got '{url}'"
            )))
        }
    }

    if uri.authority().is_none() {
        return Err(PlaybackError::ConfigError(format!(
            "{field}: URL has no host: '{url}'"
        )));
    }

    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            remote_url = "https://api.stripe.com"
            webhook_url = "http://localhost:8888"
            cassette_dir = "/tmp"
            bind_addr = "127.0.0.1:8080"
            replay_match = "verified"

            [limits]
            upstream_timeout_ms = 1000
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.remote_url, "https://api.stripe.com");
        assert_eq!(config.webhook_url.as_deref(), Some("http://localhost:8888"));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.replay_match, ReplayMatch::Verified);
        assert_eq!(config.limits.upstream_timeout_ms, 1000);
        assert_eq!(config.limits.max_headers, 128);
    }

    #[test]
    fn test_config_defaults() {
        let config_toml = r#"
            remote_url = "http://localhost:9000"
            cassette_dir = "/tmp"
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.replay_match, ReplayMatch::Sequential);
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn test_config_from_file() {
        let dir = TempDir::new().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = format!(
            "remote_url = \"http://localhost:9000\"\ncassette_dir = {:?}\n",
            dir.path()
        );
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cassette_dir, dir.path());
    }

    #[test]
    fn test_invalid_remote_scheme() {
        let config = Config::new("ftp://example.com", "/tmp");
        assert!(matches!(
            config.validate(),
            Err(PlaybackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_cassette_dir() {
        let config = Config::new("http://example.com", "/definitely/not/here");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new("http://example.com", dir.path());
        config.limits.control_lock_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("control_lock_timeout_ms"));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Recording.to_string(), "recording");
        assert_eq!(Mode::default(), Mode::Idle);
        assert_eq!(Mode::Replaying.to_string(), "replaying");
    }
}
