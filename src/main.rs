//! Playback CLI

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use playback::{Config, PlaybackServer};

/// HTTP record-replay proxy
#[derive(Parser, Debug)]
#[command(name = "playback", version, about)]
struct Args {
    /// TOML configuration file; the flags below override its values
    #[arg(short, long, env = "PLAYBACK_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the remote service
    #[arg(long, env = "PLAYBACK_REMOTE_URL")]
    remote_url: Option<String>,

    /// Webhook receiver that gets a copy of recorded requests
    #[arg(long, env = "PLAYBACK_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Directory that cassette paths are resolved against [default: .]
    #[arg(long)]
    cassette_dir: Option<PathBuf>,

    /// Listen address [default: 127.0.0.1:13111]
    #[arg(long)]
    addr: Option<SocketAddr>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let Some(remote_url) = self.remote_url.clone() else {
                    bail!("either --config or --remote-url is required");
                };
                Config::new(remote_url, ".")
            }
        };

        if let Some(remote_url) = self.remote_url {
            config.remote_url = remote_url;
        }
        if self.webhook_url.is_some() {
            config.webhook_url = self.webhook_url;
        }
        if let Some(cassette_dir) = self.cassette_dir {
            config.cassette_dir = cassette_dir;
        }
        if let Some(addr) = self.addr {
            config.bind_addr = addr;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("playback=info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let server = PlaybackServer::bind(config)
        .await
        .context("starting playback server")?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("playback").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_without_config() {
        let config = args(&["--remote-url", "https://api.stripe.com"])
            .into_config()
            .unwrap();
        assert_eq!(config.remote_url, "https://api.stripe.com");
        assert_eq!(config.cassette_dir, PathBuf::from("."));
        assert_eq!(config.bind_addr.to_string(), playback::config::DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_flags_override_config_file() {
        let config_dir = TempDir::new().unwrap();
        let override_dir = TempDir::new().unwrap();

        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "remote_url = \"https://api.stripe.com\"\ncassette_dir = {:?}\nbind_addr = \"127.0.0.1:8080\"",
            config_dir.path().display().to_string()
        )
        .unwrap();

        let config_path = file.path().display().to_string();
        let override_path = override_dir.path().display().to_string();
        let config = args(&[
            "--config",
            &config_path,
            "--cassette-dir",
            &override_path,
            "--addr",
            "127.0.0.1:9090",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.remote_url, "https://api.stripe.com");
        assert_eq!(config.cassette_dir, override_dir.path());
        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_remote_url_required_without_config() {
        assert!(args(&[]).into_config().is_err());
    }
}
