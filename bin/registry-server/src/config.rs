//! Server configuration: YAML file, then environment, then command line

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Endpoint registry server
#[derive(Parser, Debug, Default)]
#[command(name = "registry-server")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    REGISTRY_LISTEN_ADDR         Listen address (default: 0.0.0.0:9000)
    REGISTRY_DATA_DIR            Data directory (default: ./data)
    REGISTRY_EXTERNAL_ENDPOINTS  Endpoints are managed externally (default: false)
    REGISTRY_LOG_LEVEL           Log level (default: info)
    REGISTRY_LOG_FORMAT          plain or json (default: plain)
"#)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "REGISTRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Directory holding endpoint records and TLS material
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Reject create, update and delete; endpoints are managed elsewhere
    #[arg(long, default_value_t = false)]
    pub external_endpoints: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("Unknown log format: {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub management_enabled: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            data_dir: PathBuf::from("./data"),
            management_enabled: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
        }
    }
}

impl ServerConfig {
    /// Resolve the effective configuration for a command line
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Override fields from environment variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("REGISTRY_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid REGISTRY_LISTEN_ADDR: {}", addr))?;
        }
        if let Some(dir) = lookup("REGISTRY_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(external) = lookup("REGISTRY_EXTERNAL_ENDPOINTS") {
            self.management_enabled = !parse_bool(&external)
                .with_context(|| format!("Invalid REGISTRY_EXTERNAL_ENDPOINTS: {}", external))?;
        }
        if let Some(level) = lookup("REGISTRY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = lookup("REGISTRY_LOG_FORMAT") {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(addr) = cli.listen {
            self.listen_addr = addr;
        }
        if let Some(dir) = &cli.data_dir {
            self.data_dir = dir.clone();
        }
        if cli.external_endpoints {
            self.management_enabled = false;
        }
    }

    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("endpoints.json")
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{}'", other)),
    }
}
