use crate::config::SyncConfig;
use crate::error::SyncError;
use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the boxsync client
#[derive(Parser, Debug)]
#[clap(name = "boxsync")]
#[clap(about = "Keep a local directory in sync with a boxsync server", long_about = None)]
pub struct SyncArgs {
    /// Path to a JSON config file; flags override its values
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory to keep in sync
    #[clap(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Server base URL (e.g., http://localhost:8080)
    #[clap(long, value_name = "URL", env = "BOXSYNC_SERVER")]
    pub server: Option<String>,

    /// Session key identifying this client to the server
    #[clap(long, value_name = "KEY", env = "BOXSYNC_SESSION_KEY", hide_env_values = true)]
    pub session_key: Option<String>,

    /// Push notifier address (host:port); without it the client only polls
    #[clap(long, value_name = "ADDR", env = "BOXSYNC_NOTIFIER")]
    pub notifier: Option<String>,

    /// Poll the server at least this often (milliseconds)
    #[clap(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Sync dot-prefixed files and directories too
    #[clap(long)]
    pub include_hidden: bool,
}

impl SyncArgs {
    /// Layer the flags over the config file (or the defaults).
    pub fn into_config(self) -> Result<SyncConfig, SyncError> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)?,
            None => SyncConfig::default(),
        };
        if let Some(root) = self.root {
            config.root = root;
        }
        if let Some(server) = self.server {
            config.server = server;
        }
        if let Some(key) = self.session_key {
            config.session_key = key;
        }
        if self.notifier.is_some() {
            config.notifier = self.notifier;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if self.include_hidden {
            config.include_hidden = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// CLI arguments for boxsync-status
#[derive(Parser, Debug)]
#[clap(name = "boxsync-status")]
#[clap(about = "Show what a running boxsync client is doing", long_about = None)]
pub struct StatusArgs {
    /// Synced directory whose client to inspect
    #[clap(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Print the raw status JSON
    #[clap(long)]
    pub json: bool,
}
