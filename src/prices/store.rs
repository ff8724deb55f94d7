use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use log::warn;

use crate::prices::PriceError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Price {
    pub symbol: String,
    pub value: f64,
}

/// Current price per symbol. Symbols are fixed at construction and never removed.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    prices: HashMap<String, f64>,
    // Seed order, so ticks and listings are deterministic
    order: Vec<String>,
    opening: HashMap<String, f64>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a seed table. Non-positive or non-finite seeds are skipped,
    /// and a repeated symbol keeps its first value.
    pub fn from_seed<S: AsRef<str>>(seed: &[(S, f64)]) -> Self {
        let mut store = Self::new();
        for (symbol, value) in seed {
            let symbol = crate::prices::normalize_symbol(symbol.as_ref());
            if symbol.is_empty() || !value.is_finite() || *value <= 0.0 {
                warn!("Skipping invalid seed price {}={}", symbol, value);
                continue;
            }
            if store.prices.contains_key(&symbol) {
                continue;
            }
            store.order.push(symbol.clone());
            store.opening.insert(symbol.clone(), *value);
            store.prices.insert(symbol, *value);
        }
        store
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.prices.contains_key(symbol)
    }

    /// Applies `price *= (1 + delta)` in place and returns the new price.
    pub fn apply_delta(&mut self, symbol: &str, delta: f64) -> Result<f64, PriceError> {
        let price = self
            .prices
            .get_mut(symbol)
            .ok_or_else(|| PriceError::UnknownSymbol(symbol.to_string()))?;

        if !delta.is_finite() {
            return Err(PriceError::TickComputation {
                symbol: symbol.to_string(),
                reason: format!("non-finite delta {}", delta),
            });
        }

        let next = *price * (1.0 + delta);
        if !next.is_finite() || next <= 0.0 {
            return Err(PriceError::TickComputation {
                symbol: symbol.to_string(),
                reason: format!("{} * (1 + {}) = {} is not a positive price", price, delta, next),
            });
        }

        *price = next;
        Ok(next)
    }

    /// Percent move of the current price against its seed value.
    pub fn change_since_open(&self, symbol: &str) -> Option<f64> {
        let open = self.opening.get(symbol)?;
        let current = self.prices.get(symbol)?;
        Some((current / open - 1.0) * 100.0)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn snapshot(&self) -> Vec<Price> {
        self.order
            .iter()
            .filter_map(|symbol| {
                self.prices.get(symbol).map(|value| Price {
                    symbol: symbol.clone(),
                    value: *value,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
