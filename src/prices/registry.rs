use std::collections::HashSet;
use std::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of one client connection, independent of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    connection: ConnectionId,
    symbols: HashSet<String>,
}

/// Per-connection symbol sets, kept in registration order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection with no symbols. Returns false if it was already present.
    pub fn add_connection(&mut self, connection: ConnectionId) -> bool {
        if self.position(connection).is_some() {
            return false;
        }
        self.subscriptions.push(Subscription {
            connection,
            symbols: HashSet::new(),
        });
        true
    }

    /// Drops a connection and every symbol it was subscribed to.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.connection != connection);
        before != self.subscriptions.len()
    }

    /// Unions `symbols` into the connection's set, registering it first if needed.
    /// Returns the symbols that were newly added.
    pub fn subscribe<I, S>(&mut self, connection: ConnectionId, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = match self.position(connection) {
            Some(index) => index,
            None => {
                self.add_connection(connection);
                self.subscriptions.len() - 1
            }
        };

        let set = &mut self.subscriptions[index].symbols;
        symbols
            .into_iter()
            .map(Into::into)
            .filter(|symbol| set.insert(symbol.clone()))
            .collect()
    }

    pub fn connections_for(&self, symbol: &str) -> Vec<ConnectionId> {
        self.subscriptions
            .iter()
            .filter(|s| s.symbols.contains(symbol))
            .map(|s| s.connection)
            .collect()
    }

    #[cfg(test)]
    pub fn symbols_for(&self, connection: ConnectionId) -> Option<HashSet<String>> {
        self.position(connection)
            .map(|index| self.subscriptions[index].symbols.clone())
    }

    #[cfg(test)]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.position(connection).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.iter().map(|s| s.symbols.len()).sum()
    }

    fn position(&self, connection: ConnectionId) -> Option<usize> {
        self.subscriptions.iter().position(|s| s.connection == connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connections_for_keeps_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        let (a, b, c) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        registry.add_connection(a);
        registry.add_connection(b);
        registry.add_connection(c);

        registry.subscribe(c, ["BTC"]);
        registry.subscribe(a, ["BTC", "ETH"]);
        registry.subscribe(b, ["ETH"]);

        assert_eq!(registry.connections_for("BTC"), vec![a, c]);
        assert_eq!(registry.connections_for("ETH"), vec![a, b]);
        assert!(registry.connections_for("ADA").is_empty());
    }

    #[test]
    fn test_resubscribe_unions_and_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let id = ConnectionId::new();
        registry.add_connection(id);

        assert_eq!(registry.subscribe(id, ["BTC"]), vec!["BTC"]);
        assert_eq!(registry.subscribe(id, ["BTC", "ETH"]), vec!["ETH"]);
        assert!(registry.subscribe(id, ["BTC"]).is_empty());

        assert_eq!(registry.connections_for("BTC"), vec![id]);
        let symbols = registry.symbols_for(id).unwrap();
        assert_eq!(symbols.len(), 2);
    }

    #[test]
    fn test_subscribe_registers_unknown_connection() {
        let mut registry = SubscriptionRegistry::new();
        let id = ConnectionId::new();
        registry.subscribe(id, ["BNB"]);
        assert!(registry.contains(id));
        assert_eq!(registry.connections_for("BNB"), vec![id]);
    }

    #[test]
    fn test_remove_connection_purges_all_symbols() {
        let mut registry = SubscriptionRegistry::new();
        let id = ConnectionId::new();
        registry.subscribe(id, ["BTC", "ETH"]);

        assert!(registry.remove_connection(id));
        assert!(!registry.remove_connection(id));
        assert!(registry.connections_for("BTC").is_empty());
        assert!(registry.connections_for("ETH").is_empty());
        assert!(!registry.contains(id));
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn test_add_connection_twice() {
        let mut registry = SubscriptionRegistry::new();
        let id = ConnectionId::new();
        assert!(registry.add_connection(id));
        registry.subscribe(id, ["BTC"]);
        assert!(!registry.add_connection(id));
        assert_eq!(registry.subscription_count(), 1);
    }
}
