use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Transaction};
use sayings_core::{KeyValueStorage, StorageError};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

/// Forward migrations in apply order. The last entry is the target version.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r"
CREATE TABLE IF NOT EXISTS kv_entries (
  key TEXT PRIMARY KEY CHECK (length(key) > 0),
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
",
)];

/// `SQLite`-backed key-value storage for the saying catalog.
pub struct SqliteStorage {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupReport {
    pub backup_path: PathBuf,
    pub entries: i64,
}

/// Health of the database file and the catalog rows it holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub ok: bool,
    /// Rows reported by `PRAGMA quick_check` other than `ok`.
    pub problems: Vec<String>,
    pub entries: i64,
    pub schema: SchemaStatus,
}

impl SqliteStorage {
    /// Open (creating if needed) the database file in WAL mode.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened or configured.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open sayings database {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("cannot configure sayings database")?;

        Ok(Self { conn })
    }

    /// Open and bring the schema up to date.
    ///
    /// # Errors
    /// Returns an error when opening or migrating fails.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let mut storage = Self::open(path)?;
        storage.migrate()?;
        Ok(storage)
    }

    /// # Errors
    /// Returns an error when the migrations table cannot be created or read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let current_version = applied_version(&self.conn)?;
        let pending_versions = MIGRATIONS
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| *version > current_version)
            .collect();

        Ok(SchemaStatus { current_version, target_version: target_version(), pending_versions })
    }

    /// Apply every pending migration, each in its own transaction.
    ///
    /// # Errors
    /// Returns an error when a migration fails or the database is newer than
    /// this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        let current = applied_version(&self.conn)?;
        if current > target_version() {
            return Err(anyhow!(
                "sayings database is at schema v{current}, newer than supported v{}",
                target_version()
            ));
        }

        for (version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
            let tx = self.conn.transaction().context("cannot begin migration")?;
            tx.execute_batch(sql).with_context(|| format!("schema migration v{version} failed"))?;
            mark_applied(&tx, *version)?;
            tx.commit().with_context(|| format!("cannot commit schema migration v{version}"))?;
            tracing::info!(version, "applied sayings schema migration");
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn read_value(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM kv_entries WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("cannot read `{key}`"))
    }

    /// Upsert several values in one transaction; nothing lands if any write
    /// fails.
    ///
    /// # Errors
    /// Returns an error when any write fails.
    pub fn write_values(&mut self, entries: &[(&str, &str)]) -> Result<()> {
        let now = timestamp()?;
        let tx = self.conn.transaction().context("cannot begin write")?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO kv_entries(key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("cannot write `{key}`"))?;
        }
        tx.commit().context("cannot commit write")
    }

    /// # Errors
    /// Returns an error when any delete fails.
    pub fn delete_values(&mut self, keys: &[&str]) -> Result<()> {
        let tx = self.conn.transaction().context("cannot begin delete")?;
        for key in keys {
            tx.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
                .with_context(|| format!("cannot delete `{key}`"))?;
        }
        tx.commit().context("cannot commit delete")
    }

    /// Snapshot the live database into `out_file`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    /// Returns an error when the target cannot be prepared or written.
    pub fn backup_to(&self, out_file: &Path) -> Result<BackupReport> {
        if let Some(dir) = out_file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create backup directory {}", dir.display()))?;
        }
        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("backup to {} failed", out_file.display()))?;

        let entries = self.entry_count()?;
        tracing::info!(path = %out_file.display(), entries, "backed up sayings database");
        Ok(BackupReport { backup_path: out_file.to_path_buf(), entries })
    }

    /// Replace the live database with `in_file` and migrate the result.
    ///
    /// # Errors
    /// Returns an error when `in_file` is missing, unreadable, or cannot be
    /// migrated.
    pub fn restore_from(&mut self, in_file: &Path) -> Result<SchemaStatus> {
        if !in_file.is_file() {
            return Err(anyhow!("no backup at {}", in_file.display()));
        }
        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| format!("restore from {} failed", in_file.display()))?;
        self.migrate()?;

        tracing::info!(path = %in_file.display(), "restored sayings database");
        self.schema_status()
    }

    /// # Errors
    /// Returns an error when the checks themselves cannot run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut stmt =
            self.conn.prepare("PRAGMA quick_check").context("cannot prepare quick_check")?;
        let problems = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("quick_check failed")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("cannot read quick_check rows")?
            .into_iter()
            .filter(|row| row != "ok")
            .collect::<Vec<_>>();

        let schema = self.schema_status()?;
        let entries = if schema.current_version >= 1 { self.entry_count()? } else { 0 };

        Ok(IntegrityReport { ok: problems.is_empty(), problems, entries, schema })
    }

    fn entry_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get::<_, i64>(0))
            .context("cannot count stored entries")
    }
}

impl KeyValueStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.read_value(key).map_err(backend_error)
    }

    fn set_many(&mut self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        self.write_values(entries).map_err(backend_error)
    }

    fn remove_many(&mut self, keys: &[&str]) -> Result<(), StorageError> {
        self.delete_values(keys).map_err(backend_error)
    }
}

fn backend_error(err: anyhow::Error) -> StorageError {
    StorageError::Backend(format!("{err:#}"))
}

fn target_version() -> i64 {
    MIGRATIONS.last().map_or(0, |(version, _)| *version)
}

fn applied_version(conn: &Connection) -> Result<i64> {
    conn.execute_batch(SCHEMA_MIGRATIONS_SQL).context("cannot create schema_migrations")?;
    conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .map(Option::unwrap_or_default)
    .context("cannot read applied schema version")
}

fn mark_applied(tx: &Transaction<'_>, version: i64) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, timestamp()?],
    )
    .with_context(|| format!("cannot record schema migration v{version}"))?;
    Ok(())
}

fn timestamp() -> Result<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).context("cannot format timestamp")
}
