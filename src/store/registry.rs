//! Channel integration registry.
//!
//! The only writer of `channel_integrations`. Uniqueness per `(type, target)`
//! and per `(type, channel)` is enforced by the table constraints, so two
//! racing attaches cannot both succeed.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use super::Store;
use crate::common::error::{RelayError, RelayResult};
use crate::common::types::{ChannelIntegration, IntegrationKind};

const SELECT_INTEGRATION: &str = "
SELECT ci.id, ci.channel_id, c.name, ci.type, ci.target, ci.extra, ci.is_authorized, ci.created_at
FROM channel_integrations ci
JOIN channels c ON c.id = ci.channel_id";

fn row_to_integration(row: &Row<'_>) -> rusqlite::Result<ChannelIntegration> {
    let kind: String = row.get(3)?;
    let kind = kind
        .parse::<IntegrationKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;

    Ok(ChannelIntegration {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        channel: row.get(2)?,
        kind,
        target: row.get(4)?,
        extra: row.get(5)?,
        is_authorized: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn select_one(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> RelayResult<Option<ChannelIntegration>> {
    let sql = format!("{} WHERE {}", SELECT_INTEGRATION, filter);
    Ok(conn.query_row(&sql, params, row_to_integration).optional()?)
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl Store {
    pub async fn find_by_target(
        &self,
        kind: IntegrationKind,
        target: &str,
    ) -> RelayResult<Option<ChannelIntegration>> {
        let target = target.to_owned();
        self.run(move |conn| {
            select_one(
                conn,
                "ci.type = ?1 AND ci.target = ?2",
                params![kind.as_str(), target],
            )
        })
        .await
    }

    /// Integration of `kind` bound to the named IRC channel, if any.
    pub async fn find_by_channel(
        &self,
        kind: IntegrationKind,
        channel: &str,
    ) -> RelayResult<Option<ChannelIntegration>> {
        let channel = channel.to_owned();
        self.run(move |conn| {
            select_one(
                conn,
                "ci.type = ?1 AND c.name = ?2 COLLATE NOCASE",
                params![kind.as_str(), channel],
            )
        })
        .await
    }

    pub async fn get_integration(&self, id: i64) -> RelayResult<Option<ChannelIntegration>> {
        self.run(move |conn| select_one(conn, "ci.id = ?1", params![id]))
            .await
    }

    /// Register a new, unauthorized integration.
    ///
    /// Fails with [`RelayError::UnknownChannel`] if the IRC channel does not
    /// exist and with [`RelayError::DuplicateIntegration`] if `target` or the
    /// channel already has an integration of this kind.
    pub async fn create_integration(
        &self,
        kind: IntegrationKind,
        channel: &str,
        target: &str,
        extra: Option<&str>,
    ) -> RelayResult<ChannelIntegration> {
        let channel = channel.to_owned();
        let target = target.to_owned();
        let extra = extra.map(str::to_owned);

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let channel_id: i64 = tx
                .query_row(
                    "SELECT id FROM channels WHERE name = ?1",
                    params![channel],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| RelayError::UnknownChannel {
                    name: channel.clone(),
                })?;

            let inserted = tx.execute(
                "INSERT INTO channel_integrations (channel_id, type, target, extra, is_authorized, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![channel_id, kind.as_str(), target, extra, Utc::now()],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => return Err(RelayError::DuplicateIntegration),
                Err(e) => return Err(e.into()),
            }

            let id = tx.last_insert_rowid();
            let created = select_one(&tx, "ci.id = ?1", params![id])?
                .ok_or(RelayError::Store(rusqlite::Error::QueryReturnedNoRows))?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    /// Mark an integration authorized. Idempotent; returns the updated record.
    pub async fn authorize_integration(&self, id: i64) -> RelayResult<Option<ChannelIntegration>> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE channel_integrations SET is_authorized = 1 WHERE id = ?1",
                params![id],
            )?;
            select_one(conn, "ci.id = ?1", params![id])
        })
        .await
    }

    /// Delete an integration and return what was removed.
    pub async fn remove_integration(&self, id: i64) -> RelayResult<ChannelIntegration> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let existing = select_one(&tx, "ci.id = ?1", params![id])?.ok_or(RelayError::NotBound)?;
            tx.execute("DELETE FROM channel_integrations WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(existing)
        })
        .await
    }
}
