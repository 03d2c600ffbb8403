//! Persistence gateway: SQLite-backed credentials and message history.
//!
//! All operations hop through `spawn_blocking` so synchronous SQLite I/O
//! never blocks the tokio runtime. Passwords are stored as salted Argon2
//! PHC strings; plaintext never touches the database.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::StoreError;

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// The login already exists. Registration is the only store failure with
    /// its own reply on the wire.
    Conflict,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected,
    NotFound,
}

/// One persisted chat message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub user: String,
    pub content: String,
    /// Message type tag; `text` unless a future sender says otherwise.
    pub kind: String,
    pub file_path: Option<String>,
    pub timestamp: String,
}

struct ChatDb {
    conn: Mutex<Connection>,
}

impl ChatDb {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Worker("store mutex poisoned".to_string()))
    }
}

/// Handle to the chat store. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ChatStore {
    db: Arc<ChatDb>,
}

impl ChatStore {
    /// Open the store at `path`, creating the schema if needed.
    /// `None` opens an in-memory database.
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Worker(e.to_string()))?;
                }
                let conn = Connection::open(path)?;
                info!(path = %path.display(), "opened chat store");
                conn
            }
            None => Connection::open_in_memory()?,
        };

        // WAL for concurrent readers; no-op for in-memory databases.
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                login      TEXT PRIMARY KEY,
                password   TEXT
            );
            CREATE TABLE IF NOT EXISTS messages (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user       TEXT,
                content    TEXT,
                type       TEXT,
                file_path  TEXT,
                timestamp  DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        Ok(Self {
            db: Arc::new(ChatDb {
                conn: Mutex::new(conn),
            }),
        })
    }

    /// Create a credential. The unique key on `login` resolves races: a
    /// constraint violation maps to `Conflict` rather than an error.
    pub async fn register(
        &self,
        login: &str,
        password: &str,
    ) -> Result<RegisterOutcome, StoreError> {
        let db = Arc::clone(&self.db);
        let login = login.to_string();
        let password = password.to_string();
        spawn_store(move || {
            let hash = hash_password(&password)?;
            let conn = db.lock()?;
            match conn.execute(
                "INSERT INTO users (login, password) VALUES (?1, ?2)",
                rusqlite::params![login, hash],
            ) {
                Ok(_) => Ok(RegisterOutcome::Created),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(RegisterOutcome::Conflict)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Verify a login/password pair against the stored hash.
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<AuthOutcome, StoreError> {
        let db = Arc::clone(&self.db);
        let login = login.to_string();
        let password = password.to_string();
        spawn_store(move || {
            let conn = db.lock()?;
            let stored: Option<String> = conn
                .query_row(
                    "SELECT password FROM users WHERE login = ?1",
                    [&login],
                    |row| row.get(0),
                )
                .optional()?;
            drop(conn);

            match stored {
                None => Ok(AuthOutcome::NotFound),
                Some(hash) if verify_password(&password, &hash) => Ok(AuthOutcome::Accepted),
                Some(_) => Ok(AuthOutcome::Rejected),
            }
        })
        .await
    }

    /// Persist one chat message. The timestamp is assigned by the database.
    pub async fn save_message(&self, user: &str, content: &str) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        let user = user.to_string();
        let content = content.to_string();
        spawn_store(move || {
            let conn = db.lock()?;
            conn.execute(
                "INSERT INTO messages (user, content, type) VALUES (?1, ?2, 'text')",
                rusqlite::params![user, content],
            )?;
            Ok(())
        })
        .await
    }

    /// The most recent messages, newest first.
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let db = Arc::clone(&self.db);
        spawn_store(move || {
            let conn = db.lock()?;
            let mut stmt = conn.prepare(
                "SELECT user, content, type, file_path, timestamp
                 FROM messages ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], |row| {
                Ok(StoredMessage {
                    user: row.get(0)?,
                    content: row.get(1)?,
                    kind: row.get(2)?,
                    file_path: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
    }
}

async fn spawn_store<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
}

fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::Hash(e.to_string()))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
