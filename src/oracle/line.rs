use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{ExplorerError, Result};
use crate::oracle::protocol::{OracleDecision, parse_reply};
use crate::oracle::{Oracle, OracleRequest};

struct LineConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Set when a reply was abandoned; the next line on the wire would belong to
    /// the wrong request.
    out_of_sync: bool,
}

/// Newline-delimited oracle over a persistent TCP stream.
///
/// Replies carry no correlation id, so asks are serialized through the
/// connection mutex and matched to requests by arrival order.
pub struct LineOracle {
    address: String,
    conn: Mutex<Option<LineConnection>>,
    reply_timeout: Duration,
}

impl LineOracle {
    pub async fn connect(address: &str, connect_timeout: Duration, reply_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ExplorerError::OracleConnect {
                endpoint: address.to_string(),
                reason: format!("timed out after {:?}", connect_timeout),
            })?
            .map_err(|e| ExplorerError::OracleConnect {
                endpoint: address.to_string(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        info!(address, "connected to line oracle");

        Ok(Self {
            address: address.to_string(),
            conn: Mutex::new(Some(LineConnection {
                reader: BufReader::new(read_half),
                writer: write_half,
                out_of_sync: false,
            })),
            reply_timeout,
        })
    }
}

#[async_trait]
impl Oracle for LineOracle {
    async fn ask(&self, request: &OracleRequest) -> Result<OracleDecision> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| ExplorerError::OracleDisconnected(format!("{} already closed", self.address)))?;

        if conn.out_of_sync {
            return Err(ExplorerError::Protocol(
                "connection out of sync after an unanswered request".into(),
            ));
        }

        let line = format!("{}\n", request.artifact.display());
        conn.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ExplorerError::OracleDisconnected(e.to_string()))?;
        conn.writer
            .flush()
            .await
            .map_err(|e| ExplorerError::OracleDisconnected(e.to_string()))?;

        let mut reply = String::new();
        match timeout(self.reply_timeout, conn.reader.read_line(&mut reply)).await {
            Err(_) => {
                conn.out_of_sync = true;
                Err(ExplorerError::OracleTimeout(self.reply_timeout))
            }
            Ok(Err(e)) => Err(ExplorerError::OracleDisconnected(e.to_string())),
            Ok(Ok(0)) => Err(ExplorerError::OracleDisconnected("closed by peer".into())),
            Ok(Ok(_)) => {
                debug!(reply = reply.trim(), "oracle replied");
                Ok(parse_reply(&reply))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut conn) = self.conn.lock().await.take() {
            let _ = conn.writer.shutdown().await;
            info!(address = %self.address, "closed line oracle connection");
        }
        Ok(())
    }
}
