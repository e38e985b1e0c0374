use crate::cli::Args;
use crate::server::bind_address;
use dlg_core::{DEFAULT_PORT, DiskLogError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind; empty means all interfaces
    #[serde(default)]
    pub endpoint: String,
    /// Listen port; 0 selects the default port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory receiving the per-log files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./logs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| DiskLogError::Config(format!("TOML parse error: {}", e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| DiskLogError::Config(format!("JSON parse error: {}", e))),
            _ => Err(DiskLogError::Config(format!(
                "Unknown config file extension: {}",
                ext
            ))),
        }
    }

    pub fn from_args(args: &Args) -> Self {
        Self {
            endpoint: args.endpoint.clone(),
            port: args.port,
            data_dir: args.data_dir.clone(),
        }
    }

    pub fn bind_address(&self) -> String {
        bind_address(&self.endpoint, self.port)
    }
}
