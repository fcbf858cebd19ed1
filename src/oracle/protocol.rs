use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Exact reply meaning "nothing left to click".
pub const NO_TARGET_SENTINEL: &str = "No login button detected";

/// Version stamped on every structured request.
pub const SCHEMA_VERSION: u32 = 1;

static CLICK_POINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Click Point:\s*(\d+)\s*,\s*(\d+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleDecision {
    Click { x: i64, y: i64 },
    NoTarget,
    Malformed(String),
}

/// Parse a free-text oracle reply.
pub fn parse_reply(raw: &str) -> OracleDecision {
    let reply = raw.trim();
    if reply == NO_TARGET_SENTINEL {
        return OracleDecision::NoTarget;
    }

    let Some(caps) = CLICK_POINT.captures(reply) else {
        return OracleDecision::Malformed(reply.to_string());
    };

    match (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
        (Ok(x), Ok(y)) => OracleDecision::Click { x, y },
        _ => OracleDecision::Malformed(reply.to_string()),
    }
}

// ============================================================================
// Structured (WebSocket) schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRequest {
    pub version: u32,
    pub id: u64,
    pub image_path: String,
    pub html_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireDecision {
    Click { x: i64, y: i64 },
    NoTarget,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub decision: Option<WireDecision>,
    /// Free-text answer from servers that predate the typed `decision` field.
    #[serde(default)]
    pub response: Option<String>,
}

impl StructuredReply {
    /// Resolve the reply into a decision, or the server-reported error.
    pub fn into_decision(self) -> Result<OracleDecision, String> {
        if let Some(error) = self.error {
            return Err(error);
        }
        match (self.decision, self.response) {
            (Some(WireDecision::Click { x, y }), _) => Ok(OracleDecision::Click { x, y }),
            (Some(WireDecision::NoTarget), _) => Ok(OracleDecision::NoTarget),
            (None, Some(text)) => Ok(parse_reply(&text)),
            (None, None) => Ok(OracleDecision::Malformed(
                "reply has neither decision nor response".into(),
            )),
        }
    }
}
