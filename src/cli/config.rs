use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::applier::InteractionSettings;
use crate::browser::chrome::BrowserSettings;
use crate::explorer::explorer::{ExploreSettings, SelectionStrategy};
use crate::oracle::{OracleSettings, OracleTransport};

pub const DEFAULT_CONFIG_FILE: &str = "flow-explorer.yaml";
pub const DEFAULT_OUTPUT_DIR: &str = "screenshot_flows";

// ============================================================================
// CLI Argument Parsing (clap derive)
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "flow-explorer",
    version,
    about = "Oracle-guided login flow explorer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: flow-explorer.yaml in current dir)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Oracle transport
    #[arg(long, value_enum, global = true)]
    pub oracle: Option<OracleTransport>,

    /// host:port of the line oracle
    #[arg(long, global = true)]
    pub oracle_address: Option<String>,

    /// WebSocket URL of the structured oracle
    #[arg(long, global = true)]
    pub oracle_endpoint: Option<String>,

    /// How selectable combinations are explored
    #[arg(long, value_enum, global = true)]
    pub strategy: Option<SelectionStrategy>,

    /// Clicks per flow before it stops
    #[arg(long, global = true)]
    pub max_clicks: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Explore every URL listed in a file, one per line
    Crawl {
        /// URL list; blank lines and `#` comments are skipped
        #[arg(long)]
        urls: PathBuf,

        /// Artifact root (default: screenshot_flows)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Explore a single URL
    Explore {
        #[arg(long)]
        url: String,

        /// Artifact root (default: screenshot_flows)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

// ============================================================================
// Config File Model (optional YAML)
// ============================================================================

/// Optional YAML config file: `flow-explorer.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub oracle: OracleSettings,
    #[serde(default)]
    pub explore: ExploreSettings,
    #[serde(default)]
    pub interaction: InteractionSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

// ============================================================================
// Config File Loading
// ============================================================================

/// Load config from a YAML file. Returns defaults if the file is missing or malformed.
pub fn load_config(path: Option<&str>) -> AppConfig {
    let config_path = path.unwrap_or(DEFAULT_CONFIG_FILE);
    match std::fs::read_to_string(config_path) {
        Ok(content) => match serde_yaml::from_str(&content) {
            Ok(config) => {
                debug!(path = config_path, "loaded config file");
                config
            }
            Err(e) => {
                warn!(path = config_path, error = %e, "malformed config file; using defaults");
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

// ============================================================================
// Config Builders (merge CLI args with config file)
// ============================================================================

impl AppConfig {
    /// Overlay the global CLI flags; a flag given on the command line wins.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(transport) = cli.oracle {
            self.oracle.transport = transport;
        }
        if let Some(address) = &cli.oracle_address {
            self.oracle.address = address.clone();
        }
        if let Some(endpoint) = &cli.oracle_endpoint {
            self.oracle.endpoint = endpoint.clone();
        }
        if let Some(strategy) = cli.strategy {
            self.explore.strategy = strategy;
        }
        if let Some(max_clicks) = cli.max_clicks {
            self.explore.max_clicks = max_clicks;
        }
        self
    }

    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.output.dir = dir;
        }
        self
    }
}
