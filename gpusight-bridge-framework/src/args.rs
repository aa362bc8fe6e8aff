//! CLI argument parsing for bridges.

use std::path::{Path, PathBuf};

use clap::Parser;

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "GpuSight MQTT bridge")]
pub struct BridgeArgs {
    /// Path to configuration file (JSON5). Optional; defaults and
    /// `MQTT_*` environment variables are used when absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override the MQTT broker host.
    #[arg(long)]
    pub broker: Option<String>,

    /// Override the MQTT broker port.
    #[arg(long)]
    pub port: Option<u16>,
}

impl BridgeArgs {
    /// Parse CLI arguments from the process command line.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Resolve the configuration file to read.
    ///
    /// Returns the path and whether it was given explicitly. A missing
    /// implicit default is not an error; a missing explicit path is.
    pub fn config_path<'a>(&'a self, default_config: &'a str) -> (&'a Path, bool) {
        match &self.config {
            Some(path) => (path.as_path(), true),
            None => (Path::new(default_config), false),
        }
    }
}
