//! SQLite storage backend
//!
//! rusqlite behind a deadpool-sqlite connection pool. Blocking calls run on
//! the pool's worker threads via `interact`. Timestamps are stored as
//! microseconds since the epoch so ordering in SQL matches ordering in Rust.

use crate::error::{FleetError, Result};
use crate::storage::SupervisionStore;
use crate::supervision::{EventFilter, EventType, MonitorConfig, ProcessEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS monitor_configs (
    cluster_id TEXT PRIMARY KEY,
    auto_monitor INTEGER NOT NULL DEFAULT 1,
    auto_restart INTEGER NOT NULL DEFAULT 1,
    monitor_interval INTEGER NOT NULL DEFAULT 0,
    restart_delay INTEGER NOT NULL DEFAULT 0,
    max_restarts INTEGER NOT NULL DEFAULT 0,
    time_window INTEGER NOT NULL DEFAULT 0,
    cooldown_period INTEGER NOT NULL DEFAULT 0,
    config_version INTEGER NOT NULL DEFAULT 1,
    last_sync_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS process_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    host_id TEXT NOT NULL DEFAULT '',
    event_type TEXT NOT NULL,
    pid INTEGER NOT NULL DEFAULT 0,
    process_name TEXT NOT NULL DEFAULT '',
    install_dir TEXT NOT NULL DEFAULT '',
    role TEXT NOT NULL DEFAULT '',
    details TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_process_events_cluster_time
    ON process_events(cluster_id, created_at);
";

const CONFIG_COLUMNS: &str = "cluster_id, auto_monitor, auto_restart, monitor_interval, \
     restart_delay, max_restarts, time_window, cooldown_period, config_version, \
     last_sync_at, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, cluster_id, node_id, host_id, event_type, pid, \
     process_name, install_dir, role, details, created_at";

/// Persistent store in a single SQLite file
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn open<P: AsRef<Path>>(db_path: P, pool_size: usize) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(
            "Opening supervision store at {} (pool_size: {})",
            path.display(),
            pool_size
        );

        let mut config = Config::new(path);
        config.pool = Some(PoolConfig::new(pool_size.max(1)));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            FleetError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        debug!("Supervision schema ready");
        Ok(store)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            FleetError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(f)
            .await
            .map_err(|e| FleetError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(idx: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn config_from_row(row: &Row<'_>) -> rusqlite::Result<MonitorConfig> {
    let last_sync_at = row
        .get::<_, Option<i64>>(9)?
        .map(|v| from_micros(9, v))
        .transpose()?;
    Ok(MonitorConfig {
        cluster_id: row.get(0)?,
        auto_monitor: row.get(1)?,
        auto_restart: row.get(2)?,
        monitor_interval_secs: row.get(3)?,
        restart_delay_secs: row.get(4)?,
        max_restarts: row.get(5)?,
        time_window_secs: row.get(6)?,
        cooldown_period_secs: row.get(7)?,
        config_version: row.get(8)?,
        last_sync_at,
        created_at: from_micros(10, row.get(10)?)?,
        updated_at: from_micros(11, row.get(11)?)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessEvent> {
    let raw_type: String = row.get(4)?;
    let event_type = EventType::parse(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown event type: {}", raw_type).into(),
        )
    })?;
    Ok(ProcessEvent {
        id: row.get(0)?,
        cluster_id: row.get(1)?,
        node_id: row.get(2)?,
        host_id: row.get(3)?,
        event_type,
        pid: row.get(5)?,
        process_name: row.get(6)?,
        install_dir: row.get(7)?,
        role: row.get(8)?,
        details: row.get(9)?,
        created_at: from_micros(10, row.get(10)?)?,
    })
}

/// WHERE clause and bound values for an event filter
fn event_conditions(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(cluster_id) = &filter.cluster_id {
        clauses.push("cluster_id = ?");
        values.push(Value::Text(cluster_id.clone()));
    }
    if let Some(node_id) = &filter.node_id {
        clauses.push("node_id = ?");
        values.push(Value::Text(node_id.clone()));
    }
    if let Some(host_id) = &filter.host_id {
        clauses.push("host_id = ?");
        values.push(Value::Text(host_id.clone()));
    }
    if let Some(event_type) = filter.event_type {
        clauses.push("event_type = ?");
        values.push(Value::Text(event_type.as_str().to_string()));
    }
    if let Some(start) = filter.start_time {
        clauses.push("created_at >= ?");
        values.push(Value::Integer(to_micros(start)));
    }
    if let Some(end) = filter.end_time {
        clauses.push("created_at < ?");
        values.push(Value::Integer(to_micros(end)));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

#[async_trait]
impl SupervisionStore for SqliteStore {
    async fn get_config(&self, cluster_id: &str) -> Result<Option<MonitorConfig>> {
        let cluster_id = cluster_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM monitor_configs WHERE cluster_id = ?1",
                CONFIG_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![cluster_id], config_from_row)
                .optional()?)
        })
        .await
    }

    async fn save_config(&self, config: &MonitorConfig) -> Result<()> {
        let config = config.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO monitor_configs (
                    cluster_id, auto_monitor, auto_restart, monitor_interval,
                    restart_delay, max_restarts, time_window, cooldown_period,
                    config_version, last_sync_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(cluster_id) DO UPDATE SET
                    auto_monitor = excluded.auto_monitor,
                    auto_restart = excluded.auto_restart,
                    monitor_interval = excluded.monitor_interval,
                    restart_delay = excluded.restart_delay,
                    max_restarts = excluded.max_restarts,
                    time_window = excluded.time_window,
                    cooldown_period = excluded.cooldown_period,
                    config_version = excluded.config_version,
                    updated_at = excluded.updated_at",
                params![
                    config.cluster_id,
                    config.auto_monitor,
                    config.auto_restart,
                    config.monitor_interval_secs,
                    config.restart_delay_secs,
                    config.max_restarts,
                    config.time_window_secs,
                    config.cooldown_period_secs,
                    config.config_version,
                    config.last_sync_at.map(to_micros),
                    to_micros(config.created_at),
                    to_micros(config.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_synced(
        &self,
        cluster_id: &str,
        config_version: i64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let cluster_id = cluster_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE monitor_configs SET last_sync_at = ?3
                 WHERE cluster_id = ?1 AND config_version = ?2",
                params![cluster_id, config_version, to_micros(at)],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn delete_config(&self, cluster_id: &str) -> Result<bool> {
        let cluster_id = cluster_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM monitor_configs WHERE cluster_id = ?1",
                params![cluster_id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn insert_event(&self, event: &ProcessEvent) -> Result<i64> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO process_events (
                    cluster_id, node_id, host_id, event_type, pid,
                    process_name, install_dir, role, details, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    event.cluster_id,
                    event.node_id,
                    event.host_id,
                    event.event_type.as_str(),
                    event.pid,
                    event.process_name,
                    event.install_dir,
                    event.role,
                    event.details,
                    to_micros(event.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<(Vec<ProcessEvent>, u64)> {
        let (clause, values) = event_conditions(filter);
        let limit = filter.page_size as i64;
        let offset = filter.offset() as i64;

        self.with_conn(move |conn| {
            let count_sql = format!("SELECT COUNT(*) FROM process_events{}", clause);
            let total: i64 =
                conn.query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

            let page_sql = format!(
                "SELECT {} FROM process_events{} \
                 ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                EVENT_COLUMNS, clause, limit, offset
            );
            let mut stmt = conn.prepare(&page_sql)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), event_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((rows, total.max(0) as u64))
        })
        .await
    }

    async fn count_events(
        &self,
        cluster_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<(EventType, u64)>> {
        let cluster_id = cluster_id.to_string();
        let since = since.map(to_micros).unwrap_or(i64::MIN);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type, COUNT(*) FROM process_events
                 WHERE cluster_id = ?1 AND created_at >= ?2
                 GROUP BY event_type",
            )?;
            let rows = stmt
                .query_map(params![cluster_id, since], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // Rows with a type this build doesn't know are left out of the stats
            Ok(rows
                .into_iter()
                .filter_map(|(raw, count)| {
                    EventType::parse(&raw).map(|t| (t, count.max(0) as u64))
                })
                .collect())
        })
        .await
    }
}
