//! SQLite backend for all three persistence ports
//!
//! Timestamps are stored as fixed-width RFC 3339 TEXT, metadata as JSON TEXT.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use onair_common::models::{
    ExecutorState, ExecutorStatus, LiveSession, LiveToken, Metadata, PriorityLevel,
    PrioritySource, SourceType,
};
use onair_common::time::{parse_rfc3339, to_db_timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{
    ExecutorStore, LiveStore, PriorityStore, PriorityTx, RedeemOutcome, StoreError, StoreResult,
};

const PRIORITY_COLUMNS: &str = "id, station_id, mount_id, priority, source_type, source_id, \
                                metadata, active, activated_at, deactivated_at";

const TOKEN_COLUMNS: &str = "token, session_id, station_id, mount_id, user_id, username, \
                             priority, expires_at, used, used_at, created_at";

const SESSION_COLUMNS: &str = "id, station_id, mount_id, user_id, username, priority, token, \
                               source_ip, source_port, user_agent, active, connected_at, \
                               disconnected_at, metadata";

const EXECUTOR_COLUMNS: &str = "station_id, mount_id, state, current_priority, \
                                current_source_id, next_source_id, audio_level_l, \
                                audio_level_r, loudness_lufs, buffer_depth_ms, \
                                underrun_count, last_heartbeat, metadata";

/// sqlx-backed store over one SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::Decode(format!("invalid uuid '{}': {}", value, e)))
}

fn decode_priority(value: i64) -> StoreResult<PriorityLevel> {
    PriorityLevel::try_from(value).map_err(|e| StoreError::Decode(e.to_string()))
}

fn decode_time(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(parse_rfc3339(value)?)
}

fn decode_opt_time(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(decode_time).transpose()
}

fn decode_metadata(value: &str) -> StoreResult<Metadata> {
    serde_json::from_str(value).map_err(|e| StoreError::Decode(format!("invalid metadata: {}", e)))
}

fn encode_metadata(metadata: &Metadata) -> StoreResult<String> {
    serde_json::to_string(metadata).map_err(|e| StoreError::Decode(format!("metadata: {}", e)))
}

fn priority_source_from_row(row: &SqliteRow) -> StoreResult<PrioritySource> {
    let source_type: String = row.get("source_type");
    Ok(PrioritySource {
        id: decode_uuid(row.get("id"))?,
        station_id: row.get("station_id"),
        mount_id: row.get("mount_id"),
        priority: decode_priority(row.get("priority"))?,
        source_type: source_type.parse::<SourceType>().map_err(StoreError::Decode)?,
        source_id: row.get("source_id"),
        metadata: decode_metadata(row.get("metadata"))?,
        active: row.get::<i64, _>("active") != 0,
        activated_at: decode_time(row.get("activated_at"))?,
        deactivated_at: decode_opt_time(row.get("deactivated_at"))?,
    })
}

fn token_from_row(row: &SqliteRow) -> StoreResult<LiveToken> {
    Ok(LiveToken {
        token: row.get("token"),
        session_id: decode_uuid(row.get("session_id"))?,
        station_id: row.get("station_id"),
        mount_id: row.get("mount_id"),
        user_id: row.get("user_id"),
        username: row.get("username"),
        priority: decode_priority(row.get("priority"))?,
        expires_at: decode_time(row.get("expires_at"))?,
        used: row.get::<i64, _>("used") != 0,
        used_at: decode_opt_time(row.get("used_at"))?,
        created_at: decode_time(row.get("created_at"))?,
    })
}

fn session_from_row(row: &SqliteRow) -> StoreResult<LiveSession> {
    let source_port: Option<i64> = row.get("source_port");
    Ok(LiveSession {
        id: decode_uuid(row.get("id"))?,
        station_id: row.get("station_id"),
        mount_id: row.get("mount_id"),
        user_id: row.get("user_id"),
        username: row.get("username"),
        priority: decode_priority(row.get("priority"))?,
        token: row.get("token"),
        source_ip: row.get("source_ip"),
        source_port: source_port.and_then(|p| u16::try_from(p).ok()),
        user_agent: row.get("user_agent"),
        active: row.get::<i64, _>("active") != 0,
        connected_at: decode_time(row.get("connected_at"))?,
        disconnected_at: decode_opt_time(row.get("disconnected_at"))?,
        metadata: decode_metadata(row.get("metadata"))?,
    })
}

fn executor_state_from_row(row: &SqliteRow) -> StoreResult<ExecutorState> {
    let state: String = row.get("state");
    let current_priority: Option<i64> = row.get("current_priority");
    Ok(ExecutorState {
        station_id: row.get("station_id"),
        mount_id: row.get("mount_id"),
        state: state.parse::<ExecutorStatus>().map_err(StoreError::Decode)?,
        current_priority: current_priority.map(decode_priority).transpose()?,
        current_source_id: row.get("current_source_id"),
        next_source_id: row.get("next_source_id"),
        audio_level_l: row.get("audio_level_l"),
        audio_level_r: row.get("audio_level_r"),
        loudness_lufs: row.get("loudness_lufs"),
        buffer_depth_ms: row.get("buffer_depth_ms"),
        underrun_count: row.get("underrun_count"),
        last_heartbeat: decode_time(row.get("last_heartbeat"))?,
        metadata: decode_metadata(row.get("metadata"))?,
    })
}

// ---------------------------------------------------------------------------
// Priority sources
// ---------------------------------------------------------------------------

/// Priority transaction over one pooled connection
pub struct SqlitePriorityTx {
    tx: Transaction<'static, Sqlite>,
}

async fn insert_priority_source<'e, E>(executor: E, row: &PrioritySource) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(&format!(
        "INSERT INTO priority_sources ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        PRIORITY_COLUMNS
    ))
    .bind(row.id.to_string())
    .bind(&row.station_id)
    .bind(&row.mount_id)
    .bind(row.priority.as_i64())
    .bind(row.source_type.as_str())
    .bind(&row.source_id)
    .bind(encode_metadata(&row.metadata)?)
    .bind(row.active as i64)
    .bind(to_db_timestamp(&row.activated_at))
    .bind(row.deactivated_at.as_ref().map(to_db_timestamp))
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl PriorityTx for SqlitePriorityTx {
    async fn current_source(&mut self, station_id: &str) -> StoreResult<Option<PrioritySource>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM priority_sources
             WHERE station_id = ? AND active = 1
             ORDER BY priority ASC, activated_at DESC
             LIMIT 1",
            PRIORITY_COLUMNS
        ))
        .bind(station_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(priority_source_from_row).transpose()
    }

    async fn find_by_source_id(
        &mut self,
        station_id: &str,
        source_id: &str,
    ) -> StoreResult<Option<PrioritySource>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM priority_sources
             WHERE station_id = ? AND source_id = ?
             ORDER BY active DESC, activated_at DESC
             LIMIT 1",
            PRIORITY_COLUMNS
        ))
        .bind(station_id)
        .bind(source_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(priority_source_from_row).transpose()
    }

    async fn next_active_excluding(
        &mut self,
        station_id: &str,
        row_id: Uuid,
    ) -> StoreResult<Option<PrioritySource>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM priority_sources
             WHERE station_id = ? AND active = 1 AND id != ?
             ORDER BY priority ASC, activated_at DESC
             LIMIT 1",
            PRIORITY_COLUMNS
        ))
        .bind(station_id)
        .bind(row_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(priority_source_from_row).transpose()
    }

    async fn deactivate(&mut self, row: &PrioritySource) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE priority_sources SET active = 0, deactivated_at = ? WHERE id = ?",
        )
        .bind(row.deactivated_at.as_ref().map(to_db_timestamp))
        .bind(row.id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(format!("priority source {} vanished", row.id)));
        }
        Ok(())
    }

    async fn reactivate(&mut self, row: &PrioritySource) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE priority_sources SET active = 1, deactivated_at = NULL WHERE id = ?",
        )
        .bind(row.id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(format!("priority source {} vanished", row.id)));
        }
        Ok(())
    }

    async fn insert(&mut self, row: &PrioritySource) -> StoreResult<()> {
        insert_priority_source(&mut *self.tx, row).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl PriorityStore for SqliteStore {
    async fn begin(&self) -> StoreResult<Box<dyn PriorityTx>> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock before the first read so the snapshot cannot go stale
        sqlx::query("UPDATE schema_version SET version = version WHERE 0")
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(SqlitePriorityTx { tx }))
    }

    async fn active_sources(&self, station_id: &str) -> StoreResult<Vec<PrioritySource>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM priority_sources
             WHERE station_id = ? AND active = 1
             ORDER BY priority ASC, activated_at DESC",
            PRIORITY_COLUMNS
        ))
        .bind(station_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(priority_source_from_row).collect()
    }

    async fn history(&self, station_id: &str, limit: usize) -> StoreResult<Vec<PrioritySource>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM priority_sources
             WHERE station_id = ?
             ORDER BY activated_at DESC
             LIMIT ?",
            PRIORITY_COLUMNS
        ))
        .bind(station_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(priority_source_from_row).collect()
    }

    async fn insert_source(&self, row: &PrioritySource) -> StoreResult<()> {
        insert_priority_source(&self.pool, row).await
    }
}

// ---------------------------------------------------------------------------
// Live tokens and sessions
// ---------------------------------------------------------------------------

#[async_trait]
impl LiveStore for SqliteStore {
    async fn insert_token(&self, token: &LiveToken) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO live_tokens ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TOKEN_COLUMNS
        ))
        .bind(&token.token)
        .bind(token.session_id.to_string())
        .bind(&token.station_id)
        .bind(&token.mount_id)
        .bind(&token.user_id)
        .bind(&token.username)
        .bind(token.priority.as_i64())
        .bind(to_db_timestamp(&token.expires_at))
        .bind(token.used as i64)
        .bind(token.used_at.as_ref().map(to_db_timestamp))
        .bind(to_db_timestamp(&token.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_token(
        &self,
        station_id: &str,
        mount_id: &str,
        token: &str,
    ) -> StoreResult<Option<LiveToken>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM live_tokens WHERE token = ? AND station_id = ? AND mount_id = ?",
            TOKEN_COLUMNS
        ))
        .bind(token)
        .bind(station_id)
        .bind(mount_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(token_from_row).transpose()
    }

    async fn redeem_token(
        &self,
        station_id: &str,
        mount_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome> {
        let now_text = to_db_timestamp(&now);

        // Single conditional update: at most one caller can flip `used`
        let redeemed = sqlx::query(&format!(
            "UPDATE live_tokens SET used = 1, used_at = ?
             WHERE token = ? AND station_id = ? AND mount_id = ?
               AND used = 0 AND expires_at > ?
             RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(&now_text)
        .bind(token)
        .bind(station_id)
        .bind(mount_id)
        .bind(&now_text)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = redeemed {
            return Ok(RedeemOutcome::Redeemed(token_from_row(&row)?));
        }

        debug!(station_id, mount_id, "token redemption lost or rejected");
        match self.find_token(station_id, mount_id, token).await? {
            Some(existing) if existing.used => Ok(RedeemOutcome::AlreadyUsed),
            _ => Ok(RedeemOutcome::Invalid),
        }
    }

    async fn create_session(&self, session: &LiveSession) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            "INSERT OR IGNORE INTO live_sessions ({})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SESSION_COLUMNS
        ))
        .bind(session.id.to_string())
        .bind(&session.station_id)
        .bind(&session.mount_id)
        .bind(&session.user_id)
        .bind(&session.username)
        .bind(session.priority.as_i64())
        .bind(&session.token)
        .bind(&session.source_ip)
        .bind(session.source_port.map(i64::from))
        .bind(&session.user_agent)
        .bind(session.active as i64)
        .bind(to_db_timestamp(&session.connected_at))
        .bind(session.disconnected_at.as_ref().map(to_db_timestamp))
        .bind(encode_metadata(&session.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<LiveSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM live_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_session(&self, session: &LiveSession) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE live_sessions
             SET active = ?, disconnected_at = ?, metadata = ?
             WHERE id = ?",
        )
        .bind(session.active as i64)
        .bind(session.disconnected_at.as_ref().map(to_db_timestamp))
        .bind(encode_metadata(&session.metadata)?)
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(format!("live session {} not found", session.id)));
        }
        Ok(())
    }

    async fn active_sessions(&self, station_id: Option<&str>) -> StoreResult<Vec<LiveSession>> {
        let rows = match station_id {
            Some(station_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM live_sessions
                     WHERE active = 1 AND station_id = ?
                     ORDER BY connected_at DESC",
                    SESSION_COLUMNS
                ))
                .bind(station_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM live_sessions WHERE active = 1 ORDER BY connected_at DESC",
                    SESSION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(session_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Executor states
// ---------------------------------------------------------------------------

#[async_trait]
impl ExecutorStore for SqliteStore {
    async fn upsert_state(&self, state: &ExecutorState) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO executor_states ({})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(station_id) DO UPDATE SET
                 mount_id = excluded.mount_id,
                 state = excluded.state,
                 current_priority = excluded.current_priority,
                 current_source_id = excluded.current_source_id,
                 next_source_id = excluded.next_source_id,
                 audio_level_l = excluded.audio_level_l,
                 audio_level_r = excluded.audio_level_r,
                 loudness_lufs = excluded.loudness_lufs,
                 buffer_depth_ms = excluded.buffer_depth_ms,
                 underrun_count = excluded.underrun_count,
                 last_heartbeat = excluded.last_heartbeat,
                 metadata = excluded.metadata
             WHERE excluded.last_heartbeat >= executor_states.last_heartbeat",
            EXECUTOR_COLUMNS
        ))
        .bind(&state.station_id)
        .bind(&state.mount_id)
        .bind(state.state.as_str())
        .bind(state.current_priority.map(PriorityLevel::as_i64))
        .bind(&state.current_source_id)
        .bind(&state.next_source_id)
        .bind(state.audio_level_l)
        .bind(state.audio_level_r)
        .bind(state.loudness_lufs)
        .bind(state.buffer_depth_ms)
        .bind(state.underrun_count)
        .bind(to_db_timestamp(&state.last_heartbeat))
        .bind(encode_metadata(&state.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_state(&self, station_id: &str) -> StoreResult<Option<ExecutorState>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executor_states WHERE station_id = ?",
            EXECUTOR_COLUMNS
        ))
        .bind(station_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(executor_state_from_row).transpose()
    }

    async fn list_states(&self) -> StoreResult<Vec<ExecutorState>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executor_states ORDER BY station_id ASC",
            EXECUTOR_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(executor_state_from_row).collect()
    }
}
