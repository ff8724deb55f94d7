use std::env;
use std::time::Duration;
use log::warn;

// Server Configuration
pub const DEFAULT_WS_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:3001";
pub const DEFAULT_STATIC_DIR: &str = "./static";
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

// JWT Configuration
pub const DEFAULT_JWT_SECRET: &str = "widget-feed-secret-change-in-production";
pub const TOKEN_TTL_HOURS: i64 = 24;

// Price feed Configuration
pub const DEFAULT_TICK_MILLIS: u64 = 2000;
pub const DEFAULT_MAX_CHANGE: f64 = 0.02;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 100;
pub const STATS_INTERVAL_SECS: u64 = 60;

/// Symbols tracked by the price feed and their starting prices.
pub const SEED_PRICES: &[(&str, f64)] = &[
    ("BTC", 45000.0),
    ("ETH", 3200.0),
    ("BNB", 320.0),
    ("ADA", 1.25),
];

/// Symbols a `subscribe_prices` request gets when it names none.
pub const DEFAULT_SUBSCRIPTION: &[&str] = &["BTC", "ETH"];

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_bind_address: String,
    pub api_bind_address: String,
    pub jwt_secret: String,
    pub static_dir: String,
    pub tick_millis: u64,
    pub max_change: f64,
    pub outbox_capacity: usize,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            ws_bind_address: env::var("WS_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_WS_BIND_ADDRESS.to_string()),
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_API_BIND_ADDRESS.to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using default (NOT for production!)");
                    DEFAULT_JWT_SECRET.to_string()
                }),
            static_dir: env::var("STATIC_DIR")
                .unwrap_or_else(|_| DEFAULT_STATIC_DIR.to_string()),
            tick_millis: parse_var("PRICE_TICK_MILLIS", DEFAULT_TICK_MILLIS),
            max_change: parse_var("PRICE_MAX_CHANGE", DEFAULT_MAX_CHANGE),
            outbox_capacity: parse_var("OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY),
            log_level: env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret == DEFAULT_JWT_SECRET {
            warn!("Using default JWT secret - change for production!");
        }

        if self.jwt_secret.len() < 32 {
            return Err("JWT secret should be at least 32 characters long".to_string());
        }

        if self.tick_millis == 0 {
            return Err("PRICE_TICK_MILLIS must be greater than zero".to_string());
        }

        if !self.max_change.is_finite() || self.max_change < 0.0 || self.max_change >= 0.5 {
            return Err(format!("PRICE_MAX_CHANGE must be in [0, 0.5), got {}", self.max_change));
        }

        if self.outbox_capacity == 0 {
            return Err("OUTBOX_CAPACITY must be greater than zero".to_string());
        }

        if self.ws_bind_address == self.api_bind_address {
            return Err(format!("WebSocket and API cannot share {}", self.ws_bind_address));
        }

        if !std::path::Path::new(&self.static_dir).is_dir() {
            warn!("Static directory not found: {} (static assets disabled)", self.static_dir);
        }

        Ok(())
    }

    pub fn log_config(&self) {
        println!("Server Configuration:");
        println!("  WebSocket Address: {}", self.ws_bind_address);
        println!("  API Address: {}", self.api_bind_address);
        println!("  Static Dir: {}", self.static_dir);
        println!("  Price Tick: {} ms (±{:.2}%)", self.tick_millis, self.max_change * 100.0);
        println!("  Outbox Capacity: {}", self.outbox_capacity);
        println!("  Log Level: {}", self.log_level);
        println!("  JWT Secret: {}", self.masked_secret());
    }

    /// First four characters of the secret, never split inside a multi-byte char.
    fn masked_secret(&self) -> String {
        format!("{}***", self.jwt_secret.chars().take(4).collect::<String>())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid {}={:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
