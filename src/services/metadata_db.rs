use crate::archive::ArchiveFormat;
use crate::error::{AppError, Result};
use crate::infrastructure::config::DatabaseConfig;
use crate::models::ArchiveEntry;
use crate::services::archive_repository::{
    ArchiveRecord, ArchiveRepository, EntryRecord, OperationRecord, OperationResult,
    OperationType,
};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

const MEMORY_URL: &str = "sqlite::memory:";

fn collaborator(operation: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::collaborator(operation, e.to_string())
}

fn path_key(archive: &Path) -> String {
    archive.to_string_lossy().into_owned()
}

fn archive_type(archive: &Path) -> &'static str {
    ArchiveFormat::from_path(archive)
        .map(|format| format.display_name())
        .unwrap_or("UNKNOWN")
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// SQLite-backed archive metadata and audit store
///
/// Three tables: `archives`, their `entries`, and the `operations` audit trail.
/// The schema is applied from the embedded migrations on open.
pub struct SqliteArchiveRepository {
    pool: SqlitePool,
}

impl SqliteArchiveRepository {
    /// Opens (creating if missing) the database at `db_url`
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self> {
        let memory = is_memory_url(db_url);
        let mut options = SqliteConnectOptions::from_str(db_url)
            .map_err(collaborator("open"))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // Every pooled connection to `:memory:` would see its own empty database
        let pool_options = if memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(collaborator("open"))?;

        info!(url = %db_url, "Running archive metadata migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::collaborator("migrate", e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.url, config.max_connections).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(MEMORY_URL, 1).await
    }

    async fn ensure_archive(conn: &mut SqliteConnection, archive: &Path) -> Result<i64> {
        let key = path_key(archive);
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO archives (file_path, archive_type, checksum, created_at, modified_at)
            VALUES (?, ?, NULL, ?, ?)
            ON CONFLICT(file_path) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(archive_type(archive))
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(collaborator("get_or_create_archive"))?;

        let row = sqlx::query("SELECT id FROM archives WHERE file_path = ?")
            .bind(&key)
            .fetch_one(&mut *conn)
            .await
            .map_err(collaborator("get_or_create_archive"))?;

        Ok(row.get("id"))
    }

    pub async fn archive_record(&self, archive: &Path) -> Result<Option<ArchiveRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, file_path, archive_type, checksum, created_at, modified_at
            FROM archives
            WHERE file_path = ?
            "#,
        )
        .bind(path_key(archive))
        .fetch_optional(&self.pool)
        .await
        .map_err(collaborator("archive_record"))?;

        Ok(row.map(|row| ArchiveRecord {
            id: row.get("id"),
            file_path: row.get("file_path"),
            archive_type: row.get("archive_type"),
            checksum: row.get("checksum"),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
        }))
    }

    /// Recorded entries in the order they were synced
    pub async fn entries_for(&self, archive: &Path) -> Result<Vec<EntryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT e.file_name, e.file_size, e.modified_date, e.is_directory
            FROM entries e
            JOIN archives a ON a.id = e.archive_id
            WHERE a.file_path = ?
            ORDER BY e.id
            "#,
        )
        .bind(path_key(archive))
        .fetch_all(&self.pool)
        .await
        .map_err(collaborator("entries_for"))?;

        Ok(rows
            .into_iter()
            .map(|row| EntryRecord {
                file_name: row.get("file_name"),
                file_size: row.get("file_size"),
                modified_date: row.get("modified_date"),
                is_directory: row.get("is_directory"),
            })
            .collect())
    }

    /// Newest first; `archive = None` lists operations across all archives
    pub async fn recent_operations(
        &self,
        archive: Option<&Path>,
        limit: u32,
    ) -> Result<Vec<OperationRecord>> {
        let base = r#"
            SELECT o.id, a.file_path AS archive_path, o.operation_type, o.timestamp, o.result, o.metadata
            FROM operations o
            LEFT JOIN archives a ON a.id = o.archive_id
        "#;

        let rows = match archive {
            Some(path) => {
                let sql = format!("{base} WHERE a.file_path = ? ORDER BY o.timestamp DESC, o.id DESC LIMIT ?");
                sqlx::query(&sql)
                    .bind(path_key(path))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("{base} ORDER BY o.timestamp DESC, o.id DESC LIMIT ?");
                sqlx::query(&sql)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(collaborator("recent_operations"))?;

        Ok(rows
            .into_iter()
            .map(|row| OperationRecord {
                id: row.get("id"),
                archive_path: row.get("archive_path"),
                operation_type: row.get("operation_type"),
                timestamp: row.get("timestamp"),
                result: row.get("result"),
                metadata: row.get("metadata"),
            })
            .collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ArchiveRepository for SqliteArchiveRepository {
    async fn update_checksum(&self, archive: &Path, checksum: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(collaborator("update_checksum"))?;
        let id = Self::ensure_archive(&mut tx, archive).await?;

        sqlx::query("UPDATE archives SET checksum = ?, modified_at = ? WHERE id = ?")
            .bind(checksum)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(collaborator("update_checksum"))?;

        tx.commit().await.map_err(collaborator("update_checksum"))?;
        debug!(archive = %archive.display(), checksum, "Checksum recorded");
        Ok(())
    }

    async fn sync_entries(&self, archive: &Path, entries: &[ArchiveEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(collaborator("sync_entries"))?;
        let id = Self::ensure_archive(&mut tx, archive).await?;

        sqlx::query("DELETE FROM entries WHERE archive_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(collaborator("sync_entries"))?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO entries (archive_id, file_name, file_size, modified_date, is_directory)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(&entry.full_name)
            .bind(entry.uncompressed_size as i64)
            .bind(entry.last_modified.timestamp())
            .bind(entry.is_directory)
            .execute(&mut *tx)
            .await
            .map_err(collaborator("sync_entries"))?;
        }

        sqlx::query("UPDATE archives SET modified_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(collaborator("sync_entries"))?;

        tx.commit().await.map_err(collaborator("sync_entries"))?;
        debug!(archive = %archive.display(), count = entries.len(), "Entries synced");
        Ok(())
    }

    async fn log_operation(
        &self,
        archive: &Path,
        operation: OperationType,
        result: OperationResult,
        metadata: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(collaborator("log_operation"))?;
        let id = Self::ensure_archive(&mut tx, archive).await?;

        sqlx::query(
            r#"
            INSERT INTO operations (archive_id, operation_type, timestamp, result, metadata)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(operation.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(result.as_str())
        .bind(metadata)
        .execute(&mut *tx)
        .await
        .map_err(collaborator("log_operation"))?;

        tx.commit().await.map_err(collaborator("log_operation"))?;
        debug!(archive = %archive.display(), %operation, %result, "Operation logged");
        Ok(())
    }

    async fn delete_archive(&self, archive: &Path) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM archives WHERE file_path = ?")
            .bind(path_key(archive))
            .execute(&self.pool)
            .await
            .map_err(collaborator("delete_archive"))?
            .rows_affected();

        info!(archive = %archive.display(), deleted, "Archive metadata purged");
        Ok(())
    }
}
