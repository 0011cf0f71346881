//! SQLite persistence.
//!
//! One database holds the integration registry together with the records it
//! reads from: IRC channels, gateway applications, snippets and Slack
//! installations. Access goes through one connection behind a mutex, on the
//! blocking pool.

mod registry;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::common::error::RelayResult;
use crate::common::types::{Application, Channel, SlackInstallation};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE
);

CREATE TABLE IF NOT EXISTS channel_integrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    target TEXT NOT NULL,
    extra TEXT,
    is_authorized INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(type, target),
    UNIQUE(type, channel_id)
);

CREATE TABLE IF NOT EXISTS applications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    secret_key TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS application_channels (
    application_id INTEGER NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
    channel TEXT NOT NULL,
    PRIMARY KEY (application_id, channel)
);

CREATE TABLE IF NOT EXISTS snippets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS slack_installations (
    team_id TEXT PRIMARY KEY,
    bot_user_id TEXT NOT NULL,
    access_token TEXT NOT NULL
);
";

/// Thread-safe handle to the relay database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> RelayResult<Self> {
        info!("Opening relay database at {:?}", path.as_ref());
        Self::init(Connection::open(path.as_ref())?)
    }

    pub fn open_in_memory() -> RelayResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> RelayResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> RelayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RelayResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut conn)
        })
        .await?
    }

    /// Look up an IRC channel by name, ignoring case.
    pub async fn find_channel(&self, name: &str) -> RelayResult<Option<Channel>> {
        let name = name.to_owned();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name FROM channels WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok(Channel {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    /// Match an application by id and secret key.
    pub async fn find_application(&self, id: i64, secret: &str) -> RelayResult<Option<Application>> {
        let secret = secret.to_owned();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT id, slug, name FROM applications WHERE id = ?1 AND secret_key = ?2",
                    params![id, secret],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
                )
                .optional()?;

            let Some((id, slug, name)) = found else {
                return Ok(None);
            };

            let mut stmt =
                conn.prepare("SELECT channel FROM application_channels WHERE application_id = ?1")?;
            let channels = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .map(|channel| channel.map(|c| c.to_lowercase()))
                .collect::<Result<HashSet<_>, _>>()?;

            Ok(Some(Application {
                id,
                slug,
                name,
                channels,
            }))
        })
        .await
    }

    /// Persist long text, returning its snippet id.
    pub async fn save_snippet(&self, text: &str) -> RelayResult<i64> {
        let text = text.to_owned();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO snippets (text, created_at) VALUES (?1, ?2)",
                params![text, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn find_slack_installation(&self, team_id: &str) -> RelayResult<Option<SlackInstallation>> {
        let team_id = team_id.to_owned();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT team_id, bot_user_id, access_token FROM slack_installations WHERE team_id = ?1",
                    params![team_id],
                    |row| {
                        Ok(SlackInstallation {
                            team_id: row.get(0)?,
                            bot_user_id: row.get(1)?,
                            access_token: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }
}

/// Seeding helpers for records owned by other systems.
#[cfg(test)]
impl Store {
    pub async fn add_channel(&self, name: &str) -> RelayResult<Channel> {
        let name = name.to_owned();
        self.run(move |conn| {
            conn.execute("INSERT INTO channels (name) VALUES (?1)", params![name])?;
            Ok(Channel {
                id: conn.last_insert_rowid(),
                name,
            })
        })
        .await
    }

    pub async fn add_application(
        &self,
        slug: &str,
        name: &str,
        secret: &str,
        channels: &[&str],
    ) -> RelayResult<i64> {
        let slug = slug.to_owned();
        let name = name.to_owned();
        let secret = secret.to_owned();
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO applications (slug, name, secret_key) VALUES (?1, ?2, ?3)",
                params![slug, name, secret],
            )?;
            let id = tx.last_insert_rowid();
            for channel in channels {
                tx.execute(
                    "INSERT INTO application_channels (application_id, channel) VALUES (?1, ?2)",
                    params![id, channel],
                )?;
            }
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    pub async fn save_slack_installation(&self, installation: SlackInstallation) -> RelayResult<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO slack_installations (team_id, bot_user_id, access_token)
                 VALUES (?1, ?2, ?3)",
                params![
                    installation.team_id,
                    installation.bot_user_id,
                    installation.access_token
                ],
            )?;
            Ok(())
        })
        .await
    }
}
