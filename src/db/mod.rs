use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, ClientRecord, ClientStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Bumping this recreates the `clients` table on the next open.
pub const SCHEMA_VERSION: i64 = 2;

const LAST_UPDATE_KEY: &str = "lastUpdate";

const CLIENT_COLUMNS: &str = "account_id, client_name, total_cameras, cameras_ok, status, billing, notes, last_updated, needs_follow_up";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    migration_backup: Option<PathBuf>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::StorageUnavailable(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let migration_backup = migrate_schema(&conn, path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            migration_backup,
        };
        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Copy of the database taken before a schema upgrade dropped stored clients.
    pub fn migration_backup(&self) -> Option<&Path> {
        self.migration_backup.as_deref()
    }

    pub fn get_client(&self, account_id: &str) -> AppResult<Option<ClientRecord>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM clients WHERE account_id = ?1", CLIENT_COLUMNS),
            [account_id],
            parse_client_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Insert-or-replace keyed by account id; the last-write marker moves to `now` in the same transaction.
    pub fn put_client(&self, record: &ClientRecord, now: DateTime<Utc>) -> AppResult<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO clients ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                CLIENT_COLUMNS
            ),
            params![
                record.account_id,
                record.client_name,
                record.total_cameras,
                record.cameras_ok,
                record.status.as_str(),
                record.billing,
                record.notes,
                record.last_updated.to_rfc3339(),
                record.needs_follow_up,
            ],
        )?;
        touch_last_write(&tx, now)?;
        tx.commit()?;
        Ok(())
    }

    /// Returns whether a record existed. Deleting a missing key still moves the marker.
    pub fn delete_client(&self, account_id: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM clients WHERE account_id = ?1", [account_id])?;
        touch_last_write(&tx, now)?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn list_clients(&self) -> AppResult<Vec<ClientRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clients ORDER BY account_id ASC",
            CLIENT_COLUMNS
        ))?;
        let rows = stmt.query_map([], parse_client_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn client_count(&self) -> AppResult<usize> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM clients", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn last_write_timestamp(&self) -> AppResult<Option<DateTime<Utc>>> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                [LAST_UPDATE_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|raw| parse_time(&raw)).transpose().map_err(AppError::from)
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)?;
        if settings.fresh_within_hours > settings.stale_after_hours {
            return Err(AppError::Validation(format!(
                "freshWithinHours ({}) cannot exceed staleAfterHours ({})",
                settings.fresh_within_hours, settings.stale_after_hours
            )));
        }

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::StorageUnavailable("database mutex poisoned".to_string()))
    }
}

/// Applies the destructive upgrade policy and returns the backup taken, if any.
fn migrate_schema(conn: &Connection, db_path: &Path) -> AppResult<Option<PathBuf>> {
    let persisted: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if persisted > SCHEMA_VERSION {
        return Err(AppError::StorageUnavailable(format!(
            "database schema v{} is newer than supported v{}",
            persisted, SCHEMA_VERSION
        )));
    }
    if persisted == SCHEMA_VERSION || !table_exists(conn, "clients")? {
        return Ok(None);
    }

    let rows: i64 = conn.query_row("SELECT COUNT(1) FROM clients", [], |row| row.get(0))?;
    let mut backup = None;
    if rows > 0 {
        let backup_path = backup_path_for(db_path, persisted);
        if let Some(parent) = backup_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::StorageUnavailable(err.to_string()))?;
        }
        conn.execute("VACUUM INTO ?1", [backup_path.to_string_lossy().as_ref()])?;
        tracing::warn!(
            from_version = persisted,
            to_version = SCHEMA_VERSION,
            rows,
            backup = %backup_path.display(),
            "schema upgrade discards stored clients; backup written first"
        );
        backup = Some(backup_path);
    }

    conn.execute_batch("DROP TABLE clients;")?;
    Ok(backup)
}

fn backup_path_for(db_path: &Path, persisted: i64) -> PathBuf {
    let dir = db_path
        .parent()
        .map(|parent| parent.join("backups"))
        .unwrap_or_else(|| PathBuf::from("backups"));
    dir.join(format!(
        "state-v{}-{}.sqlite",
        persisted,
        Utc::now().format("%Y%m%dT%H%M%S")
    ))
}

fn touch_last_write(tx: &Transaction<'_>, now: DateTime<Utc>) -> AppResult<()> {
    tx.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![LAST_UPDATE_KEY, now.to_rfc3339()],
    )?;
    Ok(())
}

fn parse_client_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRecord> {
    Ok(ClientRecord {
        account_id: row.get(0)?,
        client_name: row.get(1)?,
        total_cameras: row.get(2)?,
        cameras_ok: row.get(3)?,
        status: parse_status(&row.get::<_, String>(4)?)?,
        billing: row.get::<_, i32>(5)? != 0,
        notes: row.get(6)?,
        last_updated: parse_time(&row.get::<_, String>(7)?)?,
        needs_follow_up: row.get::<_, i32>(8)? != 0,
    })
}

fn parse_status(raw: &str) -> rusqlite::Result<ClientStatus> {
    ClientStatus::from_label(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown status '{}'", raw),
            )),
        )
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn table_exists(conn: &Connection, table: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
