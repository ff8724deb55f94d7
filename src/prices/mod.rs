pub mod store;
pub mod registry;
pub mod event;
pub mod broadcaster;
pub mod updater;

use thiserror::Error;

pub use store::{Price, PriceStore};
pub use registry::{ConnectionId, SubscriptionRegistry};
pub use event::{PriceUpdate, ServerMessage};
pub use broadcaster::{Broadcaster, FeedStats, TickReport};
pub use updater::PriceUpdater;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PriceError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("delivery to connection {connection} failed: {reason}")]
    DeliveryFailure {
        connection: ConnectionId,
        reason: String,
    },
    #[error("tick computation failed for {symbol}: {reason}")]
    TickComputation { symbol: String, reason: String },
}

/// Rounds to two decimal places, the precision every price payload uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Trims and uppercases a client-supplied ticker.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
