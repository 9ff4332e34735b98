//! SQLite database handle — connection wrapper and migrations.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

/// Shared database handle wrapping a SQLite connection behind a Mutex.
///
/// Using `Mutex` (not `RwLock`) because rusqlite `Connection` is `!Sync`.
/// All DB access is serialized, which also makes the rate-limit and quota
/// counter updates atomic read-increment-compare operations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory {}: {}", parent.display(), e)),
                )
            })?;
        }

        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a lock on the underlying connection.
    ///
    /// Callers hold the lock for the duration of their DB operation.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("Database mutex poisoned")
    }

    /// Run all schema migrations.
    fn run_migrations(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL DEFAULT '',
                auto_reply_enabled INTEGER NOT NULL DEFAULT 1,
                ai_enabled INTEGER NOT NULL DEFAULT 1,
                after_hours_ai INTEGER NOT NULL DEFAULT 0,
                daily_reply_limit INTEGER NOT NULL DEFAULT 100,
                burst_limit INTEGER NOT NULL DEFAULT 5,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                business_hours TEXT,
                ooo_enabled INTEGER NOT NULL DEFAULT 0,
                ooo_message TEXT,
                ai_model TEXT,
                ai_temperature REAL NOT NULL DEFAULT 0.7,
                ai_max_tokens INTEGER NOT NULL DEFAULT 150,
                ai_persona TEXT,
                ai_instructions TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number TEXT NOT NULL UNIQUE,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                is_regular INTEGER NOT NULL DEFAULT 0,
                blocked_reason TEXT,
                first_contact TEXT NOT NULL,
                last_contact TEXT NOT NULL,
                total_messages INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS blocked_clients (
                account_id INTEGER NOT NULL,
                client_id INTEGER NOT NULL,
                reason TEXT,
                blocked_at TEXT NOT NULL,
                PRIMARY KEY (account_id, client_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                direction TEXT NOT NULL,
                from_number TEXT NOT NULL,
                to_number TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'received',
                external_id TEXT UNIQUE,
                thread_id TEXT NOT NULL,
                reply_source TEXT,
                in_reply_to TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                flag_reason TEXT,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                delivered_at TEXT,
                failed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_external ON messages(external_id);
            CREATE INDEX IF NOT EXISTS idx_messages_reply_to ON messages(in_reply_to);
            CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(account_id, direction, created_at);

            CREATE TABLE IF NOT EXISTS auto_reply_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                trigger TEXT NOT NULL,
                response TEXT NOT NULL,
                match_mode TEXT NOT NULL DEFAULT 'contains',
                case_sensitive INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                use_count INTEGER NOT NULL DEFAULT 0,
                last_used TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_rules_account ON auto_reply_rules(account_id, is_active);

            CREATE TABLE IF NOT EXISTS rate_windows (
                account_id INTEGER NOT NULL,
                sender TEXT NOT NULL,
                window_start INTEGER NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (account_id, sender, window_start)
            );

            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                external_id TEXT,
                thread_id TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT NOT NULL,
                context TEXT,
                created_at TEXT NOT NULL
            );",
        )?;

        info!("Database migrations complete");
        Ok(())
    }
}
