use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use log::{debug, error, info, warn};

use crate::prices::{
    normalize_symbol, ConnectionId, Price, PriceError, PriceStore, PriceUpdate, ServerMessage,
    SubscriptionRegistry,
};

struct FeedState {
    store: PriceStore,
    registry: SubscriptionRegistry,
    outboxes: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl FeedState {
    /// Sends to one connection without blocking. Closed outboxes are appended to `closed`.
    fn deliver(
        &self,
        connection: ConnectionId,
        message: ServerMessage,
        closed: &mut Vec<ConnectionId>,
    ) -> Result<(), PriceError> {
        let outbox = self.outboxes.get(&connection).ok_or_else(|| PriceError::DeliveryFailure {
            connection,
            reason: "connection not registered".to_string(),
        })?;

        match outbox.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PriceError::DeliveryFailure {
                connection,
                reason: "outbox full, message dropped".to_string(),
            }),
            Err(TrySendError::Closed(_)) => {
                closed.push(connection);
                Err(PriceError::DeliveryFailure {
                    connection,
                    reason: "connection closed".to_string(),
                })
            }
        }
    }

    fn publish(&self, update: &PriceUpdate, closed: &mut Vec<ConnectionId>) -> usize {
        let mut delivered = 0;
        for connection in self.registry.connections_for(&update.symbol) {
            match self.deliver(connection, ServerMessage::PriceUpdate(update.clone()), closed) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("{}", e),
            }
        }
        delivered
    }

    fn purge(&mut self, closed: Vec<ConnectionId>) -> usize {
        let mut removed = 0;
        for connection in closed {
            self.outboxes.remove(&connection);
            if self.registry.remove_connection(connection) {
                info!("Removed closed connection {} from price feed", connection.short());
                removed += 1;
            }
        }
        removed
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub updated: usize,
    pub failed: usize,
    pub delivered: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStats {
    pub symbols: usize,
    pub connections: usize,
    pub subscriptions: usize,
}

/// Shared handle over the price store, the subscription registry and each
/// connection's outbox. One mutex guards all three.
#[derive(Clone)]
pub struct Broadcaster {
    state: Arc<Mutex<FeedState>>,
    outbox_capacity: usize,
}

impl Broadcaster {
    pub fn new(store: PriceStore, outbox_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FeedState {
                store,
                registry: SubscriptionRegistry::new(),
                outboxes: HashMap::new(),
            })),
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        // No mutation spans more than one call, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new connection and returns the receiving end of its outbox.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.outbox_capacity);

        let mut state = self.lock();
        state.registry.add_connection(connection);
        state.outboxes.insert(connection, tx);
        info!("Connection {} joined price feed ({} connected)", connection.short(), state.outboxes.len());

        (connection, rx)
    }

    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        let mut state = self.lock();
        let had_outbox = state.outboxes.remove(&connection).is_some();
        let was_registered = state.registry.remove_connection(connection);
        if had_outbox || was_registered {
            info!("Connection {} left price feed ({} connected)", connection.short(), state.outboxes.len());
        }
        had_outbox || was_registered
    }

    /// Pushes a message to a single connection.
    pub fn send_to(&self, connection: ConnectionId, message: ServerMessage) -> Result<(), PriceError> {
        let mut state = self.lock();
        let mut closed = Vec::new();
        let result = state.deliver(connection, message, &mut closed);
        state.purge(closed);
        result
    }

    /// Adds the known symbols among `symbols` to the connection's set and sends it a
    /// snapshot of each. Unknown symbols are ignored. Returns the accepted symbols.
    pub fn subscribe<S: AsRef<str>>(&self, connection: ConnectionId, symbols: &[S]) -> Vec<String> {
        let mut state = self.lock();
        if !state.outboxes.contains_key(&connection) {
            warn!("Subscribe from unknown connection {}", connection.short());
            return Vec::new();
        }

        let mut accepted: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = normalize_symbol(symbol.as_ref());
            if !state.store.contains(&symbol) {
                debug!("Ignoring unknown symbol {} from {}", symbol, connection.short());
                continue;
            }
            if !accepted.contains(&symbol) {
                accepted.push(symbol);
            }
        }

        let added = state.registry.subscribe(connection, accepted.iter().cloned());
        if !added.is_empty() {
            info!("Connection {} subscribed to {:?}", connection.short(), added);
        }

        let mut closed = Vec::new();
        Self::snapshot_locked(&state, connection, &accepted, &mut closed);
        state.purge(closed);

        accepted
    }

    /// Sends the current price of each known symbol to one connection, without a
    /// `change` field. Returns how many snapshots were delivered.
    pub fn snapshot<S: AsRef<str>>(&self, connection: ConnectionId, symbols: &[S]) -> usize {
        let mut state = self.lock();
        let mut closed = Vec::new();
        let delivered = Self::snapshot_locked(&state, connection, symbols, &mut closed);
        state.purge(closed);
        delivered
    }

    fn snapshot_locked<S: AsRef<str>>(
        state: &FeedState,
        connection: ConnectionId,
        symbols: &[S],
        closed: &mut Vec<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for symbol in symbols {
            let symbol = normalize_symbol(symbol.as_ref());
            let Some(price) = state.store.get(&symbol) else {
                continue;
            };
            let message = ServerMessage::PriceUpdate(PriceUpdate::snapshot(&symbol, price));
            match state.deliver(connection, message, closed) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Snapshot {} not delivered: {}", symbol, e);
                    if closed.contains(&connection) {
                        break;
                    }
                }
            }
        }
        delivered
    }

    /// Delivers `update` to every connection subscribed to its symbol.
    pub fn publish(&self, update: &PriceUpdate) -> usize {
        let mut state = self.lock();
        let mut closed = Vec::new();
        let delivered = state.publish(update, &mut closed);
        state.purge(closed);
        delivered
    }

    /// Runs one tick: perturbs every symbol by `draw(symbol)` and publishes the result.
    /// A symbol whose update fails is logged and skipped.
    pub fn tick<F>(&self, mut draw: F) -> TickReport
    where
        F: FnMut(&str) -> f64,
    {
        let mut state = self.lock();
        let mut report = TickReport::default();
        let mut closed = Vec::new();

        for symbol in state.store.symbols() {
            let delta = draw(&symbol);
            match state.store.apply_delta(&symbol, delta) {
                Ok(price) => {
                    let update = PriceUpdate::tick(&symbol, price, delta);
                    report.updated += 1;
                    report.delivered += state.publish(&update, &mut closed);
                }
                Err(e) => {
                    error!("Skipping {} this tick: {}", symbol, e);
                    report.failed += 1;
                }
            }
        }

        report.removed = state.purge(closed);
        report
    }

    /// Drops every outbox and registration. Connection writers see their channel end.
    pub fn close_all(&self) -> usize {
        let mut state = self.lock();
        let count = state.outboxes.len();
        let connections: Vec<ConnectionId> = state.outboxes.keys().copied().collect();
        for connection in connections {
            state.registry.remove_connection(connection);
        }
        state.outboxes.clear();
        count
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.lock().store.get(&normalize_symbol(symbol))
    }

    pub fn prices(&self) -> Vec<Price> {
        self.lock().store.snapshot()
    }

    pub fn change_since_open(&self, symbol: &str) -> Option<f64> {
        self.lock().store.change_since_open(&normalize_symbol(symbol))
    }

    pub fn subscribers(&self, symbol: &str) -> Vec<ConnectionId> {
        self.lock().registry.connections_for(&normalize_symbol(symbol))
    }

    pub fn stats(&self) -> FeedStats {
        let state = self.lock();
        FeedStats {
            symbols: state.store.len(),
            connections: state.outboxes.len(),
            subscriptions: state.registry.subscription_count(),
        }
    }
}
