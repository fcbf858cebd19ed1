use std::fmt;

use serde::{Deserialize, Serialize};

use crate::explorer::combinations::Combination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickPoint {
    pub x: i64,
    pub y: i64,
}

impl ClickPoint {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// One accepted click in a flow, as written to `click_actions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub step: u32,
    pub click_position: ClickPoint,
    #[serde(rename = "elementHTML")]
    pub element_html: String,
    pub screenshot: String,
    pub url: String,
}

/// Why a flow's interaction loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    /// Oracle reported nothing left to click.
    NoTarget,
    /// Nothing is rendered at the click point.
    StuckNoElement,
    /// The click point resolves to the same element as the previous step.
    StuckSameElement,
    /// The click ceiling was reached.
    ClickLimit,
    /// Oracle reply was malformed, erroneous or late.
    ProtocolError(String),
    /// Browser or filesystem failure outside the oracle exchange.
    Failed(String),
}

impl Termination {
    pub fn is_error(&self) -> bool {
        matches!(self, Termination::ProtocolError(_) | Termination::Failed(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::NoTarget => write!(f, "no target"),
            Termination::StuckNoElement => write!(f, "stuck (no element at click point)"),
            Termination::StuckSameElement => write!(f, "stuck (same element as previous step)"),
            Termination::ClickLimit => write!(f, "click limit reached"),
            Termination::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            Termination::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Per-flow entry of the `flows.json` summary written next to the flow directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow: usize,
    pub combination: Combination,
    pub termination: Termination,
    pub steps: usize,
}
