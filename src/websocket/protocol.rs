use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SUBSCRIPTION;

/// Messages a client may send over the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribePrices {
        #[serde(default = "default_symbols")]
        symbols: Vec<String>,
    },
    Ping,
}

fn default_symbols() -> Vec<String> {
    DEFAULT_SUBSCRIPTION.iter().map(|s| s.to_string()).collect()
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Invalid message: {}", e))
    }
}
