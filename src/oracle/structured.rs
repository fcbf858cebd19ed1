use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{ExplorerError, Result};
use crate::oracle::protocol::{OracleDecision, SCHEMA_VERSION, StructuredReply, StructuredRequest};
use crate::oracle::{Oracle, OracleRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

enum Routed {
    Reply(StructuredReply),
    Unparseable(String),
    Closed,
}

type Pending = Arc<Mutex<BTreeMap<u64, oneshot::Sender<Routed>>>>;

/// JSON-over-WebSocket oracle.
///
/// Every request carries an id and a background reader routes replies back by id,
/// so several flows can share one connection. Replies without an id go to the
/// oldest outstanding request.
pub struct StructuredOracle {
    endpoint: String,
    sink: Mutex<Option<WsSink>>,
    pending: Pending,
    next_id: AtomicU64,
    reply_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StructuredOracle {
    pub async fn connect(endpoint: &str, connect_timeout: Duration, reply_timeout: Duration) -> Result<Self> {
        let (ws, _response) = timeout(connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| ExplorerError::OracleConnect {
                endpoint: endpoint.to_string(),
                reason: format!("timed out after {:?}", connect_timeout),
            })?
            .map_err(|e| ExplorerError::OracleConnect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let (sink, stream) = ws.split();
        let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));
        let reader = tokio::spawn(read_replies(stream, pending.clone()));
        info!(endpoint, "connected to structured oracle");

        Ok(Self {
            endpoint: endpoint.to_string(),
            sink: Mutex::new(Some(sink)),
            pending,
            next_id: AtomicU64::new(1),
            reply_timeout,
            reader: Mutex::new(Some(reader)),
        })
    }
}

async fn read_replies(mut stream: SplitStream<WsStream>, pending: Pending) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "oracle websocket read failed");
                break;
            }
        };
        route(&pending, text).await;
    }

    for (_, tx) in std::mem::take(&mut *pending.lock().await) {
        let _ = tx.send(Routed::Closed);
    }
}

async fn route(pending: &Pending, text: String) {
    let parsed = serde_json::from_str::<StructuredReply>(&text);
    let mut waiting = pending.lock().await;

    let id = match &parsed {
        Ok(reply) => reply.id.or_else(|| waiting.keys().next().copied()),
        Err(_) => waiting.keys().next().copied(),
    };
    let Some(tx) = id.and_then(|id| waiting.remove(&id)) else {
        warn!(?id, "discarding oracle reply with no outstanding request");
        return;
    };

    let routed = match parsed {
        Ok(reply) => Routed::Reply(reply),
        Err(_) => Routed::Unparseable(text),
    };
    let _ = tx.send(routed);
}

#[async_trait]
impl Oracle for StructuredOracle {
    fn requires_markup(&self) -> bool {
        true
    }

    async fn ask(&self, request: &OracleRequest) -> Result<OracleDecision> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = StructuredRequest {
            version: SCHEMA_VERSION,
            id,
            image_path: request.artifact.display().to_string(),
            html_path: request
                .markup
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        let json = serde_json::to_string(&payload).map_err(|e| ExplorerError::Json {
            context: "oracle request".into(),
            source: e,
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = match self.sink.lock().await.as_mut() {
            Some(sink) => sink
                .send(WsMessage::Text(json))
                .await
                .map_err(|e| ExplorerError::OracleDisconnected(e.to_string())),
            None => Err(ExplorerError::OracleDisconnected(format!(
                "{} already closed",
                self.endpoint
            ))),
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!(id, "oracle request sent");

        match timeout(self.reply_timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ExplorerError::OracleTimeout(self.reply_timeout))
            }
            Ok(Err(_)) | Ok(Ok(Routed::Closed)) => Err(ExplorerError::OracleDisconnected(
                "connection closed while awaiting reply".into(),
            )),
            Ok(Ok(Routed::Unparseable(raw))) => Ok(OracleDecision::Malformed(raw)),
            Ok(Ok(Routed::Reply(reply))) => reply.into_decision().map_err(ExplorerError::Protocol),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        info!(endpoint = %self.endpoint, "closed structured oracle connection");
        Ok(())
    }
}
