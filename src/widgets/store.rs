use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use log::info;

use crate::auth::User;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Widget {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub symbol: String,
    pub description: String,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub user_id: u64,
    pub active: bool,
}

impl Widget {
    /// Admins may touch any widget; everyone else only their own.
    pub fn visible_to(&self, user: &User) -> bool {
        user.is_admin() || self.user_id == user.id
    }
}

/// Body of a create request. Required fields are optional here so the handler can
/// answer a missing one with 400 instead of a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWidget {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WidgetPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub config: Option<Value>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WidgetSummary {
    pub widget_types: BTreeMap<String, usize>,
    pub total_widgets: usize,
    pub active_widgets: usize,
}

#[derive(Default)]
struct WidgetTable {
    widgets: Vec<Widget>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct WidgetStore {
    table: Arc<Mutex<WidgetTable>>,
}

impl WidgetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two sample widgets owned by the demo accounts (ids 1 and 2).
    pub fn with_demo_widgets() -> Self {
        let store = Self::new();
        let created = |d: u32, h: u32, m: u32| {
            Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).single().unwrap_or_else(Utc::now)
        };
        {
            let mut table = store.lock();
            table.next_id = 2;
            table.widgets.push(Widget {
                id: 1,
                name: "Bitcoin Price Tracker".to_string(),
                kind: "price".to_string(),
                symbol: "BTC".to_string(),
                description: "Tracks the Bitcoin price in real time".to_string(),
                config: json!({"theme": "dark", "currency": "USD", "refresh_interval": 30}),
                created_at: created(15, 10, 30),
                user_id: 1,
                active: true,
            });
            table.widgets.push(Widget {
                id: 2,
                name: "Ethereum Portfolio".to_string(),
                kind: "portfolio".to_string(),
                symbol: "ETH".to_string(),
                description: "Follows an Ethereum portfolio".to_string(),
                config: json!({"theme": "light", "show_chart": true, "timeframe": "24h"}),
                created_at: created(16, 9, 15),
                user_id: 2,
                active: true,
            });
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, WidgetTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn list_for(&self, user: &User) -> Vec<Widget> {
        self.lock()
            .widgets
            .iter()
            .filter(|w| w.visible_to(user))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<Widget> {
        self.lock().widgets.iter().find(|w| w.id == id).cloned()
    }

    pub fn create(&self, new: NewWidget, owner: u64) -> Result<Widget, String> {
        let (Some(name), Some(kind), Some(symbol)) = (new.name, new.kind, new.symbol) else {
            return Err("Missing required fields".to_string());
        };

        let mut table = self.lock();
        table.next_id += 1;
        let widget = Widget {
            id: table.next_id,
            name,
            kind,
            symbol,
            description: new.description.unwrap_or_default(),
            config: new.config.unwrap_or_else(|| json!({})),
            created_at: Utc::now(),
            user_id: owner,
            active: true,
        };
        table.widgets.push(widget.clone());
        info!("Created widget {} ({}) for user {}", widget.id, widget.name, owner);
        Ok(widget)
    }

    /// Merges the provided fields into the widget. Returns None if it does not exist.
    pub fn update(&self, id: u64, patch: WidgetPatch) -> Option<Widget> {
        let mut table = self.lock();
        let widget = table.widgets.iter_mut().find(|w| w.id == id)?;
        if let Some(name) = patch.name {
            widget.name = name;
        }
        if let Some(kind) = patch.kind {
            widget.kind = kind;
        }
        if let Some(symbol) = patch.symbol {
            widget.symbol = symbol;
        }
        if let Some(description) = patch.description {
            widget.description = description;
        }
        if let Some(config) = patch.config {
            widget.config = config;
        }
        if let Some(active) = patch.active {
            widget.active = active;
        }
        Some(widget.clone())
    }

    pub fn delete(&self, id: u64) -> bool {
        let mut table = self.lock();
        let before = table.widgets.len();
        table.widgets.retain(|w| w.id != id);
        before != table.widgets.len()
    }

    pub fn summary(&self) -> WidgetSummary {
        let table = self.lock();
        let mut widget_types = BTreeMap::new();
        for widget in &table.widgets {
            *widget_types.entry(widget.kind.clone()).or_insert(0) += 1;
        }
        WidgetSummary {
            widget_types,
            total_widgets: table.widgets.len(),
            active_widgets: table.widgets.iter().filter(|w| w.active).count(),
        }
    }
}
