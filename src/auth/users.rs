use std::sync::{Arc, Mutex, MutexGuard};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use log::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Demo account. Passwords are kept in plain text and never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Default)]
struct UserTable {
    users: Vec<User>,
    next_id: u64,
}

impl UserTable {
    fn insert(&mut self, username: &str, email: &str, password: &str, role: Role, created_at: DateTime<Utc>) -> User {
        self.next_id += 1;
        let user = User {
            id: self.next_id,
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role,
            created_at,
        };
        self.users.push(user.clone());
        user
    }
}

#[derive(Clone)]
pub struct UserStore {
    table: Arc<Mutex<UserTable>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(UserTable::default())),
        }
    }

    /// Store pre-loaded with an admin and a regular account.
    pub fn with_demo_users() -> Self {
        let store = Self::new();
        let seed = [
            ("admin", "admin@widgetfeed.dev", "admin123", Role::Admin, (2024, 1, 15, 10, 0)),
            ("user1", "user1@widgetfeed.dev", "user123", Role::User, (2024, 1, 16, 14, 30)),
        ];
        {
            let mut table = store.lock();
            for (username, email, password, role, (y, mo, d, h, mi)) in seed {
                let created_at = Utc
                    .with_ymd_and_hms(y, mo, d, h, mi, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                table.insert(username, email, password, role, created_at);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, UserTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Option<User> {
        self.lock()
            .users
            .iter()
            .find(|u| same_email(&u.email, email) && u.password == password)
            .cloned()
    }

    /// Creates a regular account. Ids are never reused, even after a delete.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User, String> {
        let mut table = self.lock();
        if table.users.iter().any(|u| same_email(&u.email, email)) {
            return Err("Email already exists".to_string());
        }
        let user = table.insert(username, email, password, Role::User, Utc::now());
        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn get(&self, id: u64) -> Option<User> {
        self.lock().users.iter().find(|u| u.id == id).cloned()
    }

    pub fn list(&self) -> Vec<User> {
        self.lock().users.clone()
    }

    pub fn delete(&self, id: u64) -> bool {
        let mut table = self.lock();
        let before = table.users.len();
        table.users.retain(|u| u.id != id);
        before != table.users.len()
    }

    pub fn count(&self) -> usize {
        self.lock().users.len()
    }
}

/// Emails match case-insensitively for both login and registration.
fn same_email(stored: &str, given: &str) -> bool {
    stored.trim().eq_ignore_ascii_case(given.trim())
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}
