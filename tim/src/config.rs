//! Command line and file configuration.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tim_core::plugin::PluginRegistry;

/// Development secret. Serving with it requires `trust_user_header`.
pub const DEFAULT_JWT_SECRET: &str = "secret";

#[derive(Parser, Debug, Clone)]
#[command(name = "tim")]
#[command(about = "Document and answer service for interactive course material")]
pub struct Args {
    /// Listen address
    #[arg(long, env = "TIM_ADDR", default_value = "127.0.0.1:3000")]
    pub addr: String,

    /// Directory holding the database tables and paragraph files
    #[arg(long, env = "TIM_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Secret for HS256 bearer tokens
    #[arg(long, env = "TIM_JWT_SECRET", default_value = DEFAULT_JWT_SECRET)]
    pub jwt_secret: String,

    /// Take the caller's user name from the `X-User-Id` header
    #[arg(long, env = "TIM_TRUST_USER_HEADER")]
    pub trust_user_header: bool,

    /// Optional TOML configuration file
    #[arg(long, env = "TIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds between snapshots of the data directory
    #[arg(long, env = "TIM_SNAPSHOT_INTERVAL", default_value_t = 3600)]
    pub snapshot_interval: u64,

    /// Print the snapshots of the data directory and exit
    #[arg(long)]
    pub list_snapshots: bool,

    /// Restore the data directory to a snapshot before serving
    #[arg(long, value_name = "REV")]
    pub restore: Option<String>,
}

fn default_plugin_timeout() -> u64 {
    5
}

fn default_answer_timeout() -> u64 {
    20
}

/// Settings read from the TOML file.
///
/// ```toml
/// admins = ["admin"]
///
/// [plugins.mcq]
/// host = "http://mcq:5000/"
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub plugins: PluginRegistry,
    #[serde(default = "default_plugin_timeout")]
    pub plugin_timeout_secs: u64,
    #[serde(default = "default_answer_timeout")]
    pub answer_timeout_secs: u64,
    /// Users created at startup and added to the administrators group.
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub disable_automatic_readings: bool,
    /// Accept `X-User-Id` as the caller's identity. Only for development
    /// and tests behind a trusted proxy.
    #[serde(default)]
    pub trust_user_header: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins: PluginRegistry::default(),
            plugin_timeout_secs: default_plugin_timeout(),
            answer_timeout_secs: default_answer_timeout(),
            admins: Vec::new(),
            disable_automatic_readings: false,
            trust_user_header: false,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_toml(&text)
            }
            None => Ok(Self::default()),
        }
    }

    /// Refuse the development secret unless identities come from the
    /// trusted header anyway.
    pub fn check_auth(&self, jwt_secret: &str) -> anyhow::Result<()> {
        if jwt_secret == DEFAULT_JWT_SECRET && !self.trust_user_header {
            anyhow::bail!("refusing to serve with the default JWT secret; set TIM_JWT_SECRET");
        }
        Ok(())
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.answer_timeout_secs)
    }
}
