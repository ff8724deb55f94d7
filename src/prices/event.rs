use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::prices::round2;

/// One price push. `change` is absent for snapshots, which have no prior tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    pub timestamp: f64,
}

impl PriceUpdate {
    pub fn tick(symbol: &str, price: f64, delta: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: round2(price),
            change: Some(round2(delta * 100.0)),
            timestamp: now_secs(),
        }
    }

    pub fn snapshot(symbol: &str, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: round2(price),
            change: None,
            timestamp: now_secs(),
        }
    }
}

/// Everything the server pushes down a connection's outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { message: String },
    /// Acknowledges a subscribe request with the symbols that were accepted.
    Subscribed { symbols: Vec<String> },
    PriceUpdate(PriceUpdate),
    Pong,
    Error { message: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Unix time in seconds with millisecond resolution.
fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
