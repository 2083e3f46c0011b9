//! Postgres-backed process/file repository.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / Tls / timeouts | N/A | `Backend` |
//!
//! Statuses are stored as their SCREAMING_SNAKE strings; top words as a JSONB
//! array.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use docproc_core::{FileId, ProcessId};
use docproc_processing::{File, FileStatus, Process, ProcessStatus};

use super::{ProcessRepository, RepositoryError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processes (
    id               UUID PRIMARY KEY,
    status           TEXT NOT NULL,
    total_files      BIGINT NOT NULL,
    completed_files  BIGINT NOT NULL DEFAULT 0,
    failed_files     BIGINT NOT NULL DEFAULT 0,
    skipped_files    BIGINT NOT NULL DEFAULT 0,
    reason           TEXT,
    started_at       TIMESTAMPTZ,
    completed_at     TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id               UUID PRIMARY KEY,
    process_id       UUID NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
    file_name        TEXT NOT NULL,
    status           TEXT NOT NULL,
    word_count       BIGINT NOT NULL DEFAULT 0,
    line_count       BIGINT NOT NULL DEFAULT 0,
    character_count  BIGINT NOT NULL DEFAULT 0,
    top_words        JSONB NOT NULL DEFAULT '[]'::jsonb,
    summary          TEXT,
    error_message    TEXT,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS files_process_id_idx ON files (process_id, created_at);
"#;

#[derive(Debug, Clone)]
pub struct PostgresProcessRepository {
    pool: Arc<PgPool>,
}

impl PostgresProcessRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProcessRepository for PostgresProcessRepository {
    #[instrument(skip(self, process), fields(process_id = %process.id), err)]
    async fn create_process(&self, process: &Process) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO processes (
                id, status, total_files, completed_files, failed_files, skipped_files,
                reason, started_at, completed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(process.id.as_uuid())
        .bind(process.status.as_str())
        .bind(i64::from(process.total_files))
        .bind(i64::from(process.completed_files))
        .bind(i64::from(process.failed_files))
        .bind(i64::from(process.skipped_files))
        .bind(process.reason.as_deref())
        .bind(process.started_at)
        .bind(process.completed_at)
        .bind(process.created_at)
        .bind(process.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_process", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(process_id = %id), err)]
    async fn get_process(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {PROCESS_COLUMNS} FROM processes WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_process", e))?;

        row.map(|r| ProcessRow::from_row(&r).and_then(Process::try_from))
            .transpose()
    }

    #[instrument(skip(self, process), fields(process_id = %process.id, status = %process.status), err)]
    async fn update_process(&self, process: &Process) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE processes SET
                status = $2,
                total_files = $3,
                completed_files = $4,
                failed_files = $5,
                skipped_files = $6,
                reason = $7,
                started_at = $8,
                completed_at = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(process.id.as_uuid())
        .bind(process.status.as_str())
        .bind(i64::from(process.total_files))
        .bind(i64::from(process.completed_files))
        .bind(i64::from(process.failed_files))
        .bind(i64::from(process.skipped_files))
        .bind(process.reason.as_deref())
        .bind(process.started_at)
        .bind(process.completed_at)
        .bind(process.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_process", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("process {}", process.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_processes(&self) -> Result<Vec<Process>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROCESS_COLUMNS} FROM processes ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_processes", e))?;

        rows.iter()
            .map(|r| ProcessRow::from_row(r).and_then(Process::try_from))
            .collect()
    }

    #[instrument(skip(self), fields(process_id = %id), err)]
    async fn delete_process(&self, id: ProcessId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM processes WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_process", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, files), fields(file_count = files.len()), err)]
    async fn create_files(&self, files: &[File]) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for f in files {
            sqlx::query(
                r#"
                INSERT INTO files (
                    id, process_id, file_name, status, word_count, line_count, character_count,
                    top_words, summary, error_message, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(f.id.as_uuid())
            .bind(f.process_id.as_uuid())
            .bind(&f.file_name)
            .bind(f.status.as_str())
            .bind(i64::from(f.word_count))
            .bind(i64::from(f.line_count))
            .bind(i64::from(f.character_count))
            .bind(Json(&f.top_words))
            .bind(f.summary.as_deref())
            .bind(f.error_message.as_deref())
            .bind(f.created_at)
            .bind(f.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_file", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(file_id = %id), err)]
    async fn get_file(&self, id: FileId) -> Result<Option<File>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_file", e))?;

        row.map(|r| FileRow::from_row(&r).and_then(File::try_from))
            .transpose()
    }

    #[instrument(skip(self), fields(process_id = %process_id), err)]
    async fn get_files_by_process(&self, process_id: ProcessId) -> Result<Vec<File>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE process_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(process_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_files_by_process", e))?;

        rows.iter()
            .map(|r| FileRow::from_row(r).and_then(File::try_from))
            .collect()
    }

    #[instrument(skip(self, file), fields(file_id = %file.id, status = %file.status), err)]
    async fn update_file(&self, file: &File) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE files SET
                status = $2,
                word_count = $3,
                line_count = $4,
                character_count = $5,
                top_words = $6,
                summary = $7,
                error_message = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(file.id.as_uuid())
        .bind(file.status.as_str())
        .bind(i64::from(file.word_count))
        .bind(i64::from(file.line_count))
        .bind(i64::from(file.character_count))
        .bind(Json(&file.top_words))
        .bind(file.summary.as_deref())
        .bind(file.error_message.as_deref())
        .bind(file.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_file", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("file {}", file.id)));
        }
        Ok(())
    }
}

const PROCESS_COLUMNS: &str = "id, status, total_files, completed_files, failed_files, skipped_files, \
     reason, started_at, completed_at, created_at, updated_at";

const FILE_COLUMNS: &str = "id, process_id, file_name, status, word_count, line_count, character_count, \
     top_words, summary, error_message, created_at, updated_at";

/// Map SQLx errors onto repository errors.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Conflict(msg),
                Some("23503") => RepositoryError::NotFound(msg),
                _ => RepositoryError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            RepositoryError::Backend(format!("connection pool timeout in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            RepositoryError::Corrupt(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => RepositoryError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn count(value: i64, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("{column} out of range: {value}")))
}

struct ProcessRow {
    id: uuid::Uuid,
    status: String,
    total_files: i64,
    completed_files: i64,
    failed_files: i64,
    skipped_files: i64,
    reason: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProcessRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, RepositoryError> {
        let get = |e: sqlx::Error| map_sqlx_error("decode_process", e);
        Ok(ProcessRow {
            id: row.try_get("id").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            total_files: row.try_get("total_files").map_err(get)?,
            completed_files: row.try_get("completed_files").map_err(get)?,
            failed_files: row.try_get("failed_files").map_err(get)?,
            skipped_files: row.try_get("skipped_files").map_err(get)?,
            reason: row.try_get("reason").map_err(get)?,
            started_at: row.try_get("started_at").map_err(get)?,
            completed_at: row.try_get("completed_at").map_err(get)?,
            created_at: row.try_get("created_at").map_err(get)?,
            updated_at: row.try_get("updated_at").map_err(get)?,
        })
    }
}

impl TryFrom<ProcessRow> for Process {
    type Error = RepositoryError;

    fn try_from(row: ProcessRow) -> Result<Self, Self::Error> {
        Ok(Process {
            id: ProcessId::from_uuid(row.id),
            status: row
                .status
                .parse::<ProcessStatus>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            total_files: count(row.total_files, "total_files")?,
            completed_files: count(row.completed_files, "completed_files")?,
            failed_files: count(row.failed_files, "failed_files")?,
            skipped_files: count(row.skipped_files, "skipped_files")?,
            reason: row.reason,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

struct FileRow {
    id: uuid::Uuid,
    process_id: uuid::Uuid,
    file_name: String,
    status: String,
    word_count: i64,
    line_count: i64,
    character_count: i64,
    top_words: Json<Vec<String>>,
    summary: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FileRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, RepositoryError> {
        let get = |e: sqlx::Error| map_sqlx_error("decode_file", e);
        Ok(FileRow {
            id: row.try_get("id").map_err(get)?,
            process_id: row.try_get("process_id").map_err(get)?,
            file_name: row.try_get("file_name").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            word_count: row.try_get("word_count").map_err(get)?,
            line_count: row.try_get("line_count").map_err(get)?,
            character_count: row.try_get("character_count").map_err(get)?,
            top_words: row.try_get("top_words").map_err(get)?,
            summary: row.try_get("summary").map_err(get)?,
            error_message: row.try_get("error_message").map_err(get)?,
            created_at: row.try_get("created_at").map_err(get)?,
            updated_at: row.try_get("updated_at").map_err(get)?,
        })
    }
}

impl TryFrom<FileRow> for File {
    type Error = RepositoryError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(File {
            id: FileId::from_uuid(row.id),
            process_id: ProcessId::from_uuid(row.process_id),
            file_name: row.file_name,
            status: row
                .status
                .parse::<FileStatus>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            word_count: count(row.word_count, "word_count")?,
            line_count: count(row.line_count, "line_count")?,
            character_count: count(row.character_count, "character_count")?,
            top_words: row.top_words.0,
            summary: row.summary,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
