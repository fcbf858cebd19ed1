pub mod line;
pub mod protocol;
pub mod structured;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use line::LineOracle;
use protocol::OracleDecision;
use structured::StructuredOracle;

/// What the oracle gets to look at for one decision.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub artifact: PathBuf,
    /// Serialized DOM saved next to the screenshot, for oracles that read markup.
    pub markup: Option<PathBuf>,
}

/// A connected decision service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Whether requests must carry the page markup.
    fn requires_markup(&self) -> bool {
        false
    }

    async fn ask(&self, request: &OracleRequest) -> Result<OracleDecision>;

    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OracleTransport {
    /// Newline-delimited text over TCP
    Line,
    /// JSON messages over WebSocket
    Structured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub transport: OracleTransport,
    pub address: String,
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            transport: OracleTransport::Line,
            address: "localhost:5000".into(),
            endpoint: "ws://localhost:8765".into(),
            connect_timeout_ms: 10_000,
            reply_timeout_ms: 120_000,
        }
    }
}

/// Open the configured oracle connection.
pub async fn connect(settings: &OracleSettings) -> Result<Arc<dyn Oracle>> {
    let connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
    let reply_timeout = Duration::from_millis(settings.reply_timeout_ms);

    let oracle: Arc<dyn Oracle> = match settings.transport {
        OracleTransport::Line => {
            Arc::new(LineOracle::connect(&settings.address, connect_timeout, reply_timeout).await?)
        }
        OracleTransport::Structured => Arc::new(
            StructuredOracle::connect(&settings.endpoint, connect_timeout, reply_timeout).await?,
        ),
    };
    Ok(oracle)
}
