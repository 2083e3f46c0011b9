//! Postgres-backed saga store.
//!
//! One row per correlation id in `process_saga_state`. `current_state` is kept
//! as the plain phase string; the per-file stage ledger is a JSONB object.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use docproc_core::{FileId, ProcessId};
use docproc_events::{FileStage, SagaPhase, SagaState};

use super::{SagaStore, SagaStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS process_saga_state (
    correlation_id   UUID PRIMARY KEY,
    current_state    TEXT NOT NULL,
    total_files      BIGINT NOT NULL,
    completed_files  BIGINT NOT NULL DEFAULT 0,
    persisted_files  BIGINT NOT NULL DEFAULT 0,
    failed_files     BIGINT NOT NULL DEFAULT 0,
    skipped_files    BIGINT NOT NULL DEFAULT 0,
    files            JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS process_saga_state_finalized_idx
    ON process_saga_state (current_state, updated_at);
"#;

const SAGA_COLUMNS: &str = "correlation_id, current_state, total_files, completed_files, \
     persisted_files, failed_files, skipped_files, files, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresSagaStore {
    pool: Arc<PgPool>,
}

impl PostgresSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn ensure_schema(&self) -> Result<(), SagaStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SagaStore for PostgresSagaStore {
    #[instrument(skip(self), fields(process_id = %correlation_id), err)]
    async fn load(&self, correlation_id: ProcessId) -> Result<Option<SagaState>, SagaStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM process_saga_state WHERE correlation_id = $1"
        ))
        .bind(correlation_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_saga", e))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    #[instrument(skip(self, state), fields(process_id = %state.correlation_id), err)]
    async fn insert(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        sqlx::query(
            r#"
            INSERT INTO process_saga_state (
                correlation_id, current_state, total_files, completed_files,
                persisted_files, failed_files, skipped_files, files, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(state.correlation_id.as_uuid())
        .bind(state.current_state.as_str())
        .bind(i64::from(state.total_files))
        .bind(i64::from(state.completed_files))
        .bind(i64::from(state.persisted_files))
        .bind(i64::from(state.failed_files))
        .bind(i64::from(state.skipped_files))
        .bind(Json(&state.files))
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SagaStoreError::AlreadyExists(state.correlation_id)
            } else {
                map_sqlx_error("insert_saga", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self, state), fields(process_id = %state.correlation_id, state = %state.current_state), err)]
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE process_saga_state SET
                current_state = $2,
                total_files = $3,
                completed_files = $4,
                persisted_files = $5,
                failed_files = $6,
                skipped_files = $7,
                files = $8,
                updated_at = $9
            WHERE correlation_id = $1
            "#,
        )
        .bind(state.correlation_id.as_uuid())
        .bind(state.current_state.as_str())
        .bind(i64::from(state.total_files))
        .bind(i64::from(state.completed_files))
        .bind(i64::from(state.persisted_files))
        .bind(i64::from(state.failed_files))
        .bind(i64::from(state.skipped_files))
        .bind(Json(&state.files))
        .bind(state.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_saga", e))?;

        if result.rows_affected() == 0 {
            return Err(SagaStoreError::NotFound(state.correlation_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(process_id = %correlation_id), err)]
    async fn remove(&self, correlation_id: ProcessId) -> Result<bool, SagaStoreError> {
        let result = sqlx::query("DELETE FROM process_saga_state WHERE correlation_id = $1")
            .bind(correlation_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_saga", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn purge_finalized(&self, before: DateTime<Utc>) -> Result<usize, SagaStoreError> {
        let result = sqlx::query(
            "DELETE FROM process_saga_state WHERE current_state = $1 AND updated_at < $2",
        )
        .bind(SagaPhase::Completed.as_str())
        .bind(before)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_finalized", e))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SagaStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            SagaStoreError::Backend(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            SagaStoreError::Corrupt(format!("failed to decode row in {operation}: {err}"))
        }
        _ => SagaStoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn count(value: i64, column: &str) -> Result<u32, SagaStoreError> {
    u32::try_from(value).map_err(|_| SagaStoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<SagaState, SagaStoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_saga", e);

    let correlation_id: uuid::Uuid = row.try_get("correlation_id").map_err(get)?;
    let current_state: String = row.try_get("current_state").map_err(get)?;
    let files: Json<BTreeMap<FileId, FileStage>> = row.try_get("files").map_err(get)?;

    Ok(SagaState {
        correlation_id: ProcessId::from_uuid(correlation_id),
        current_state: current_state
            .parse::<SagaPhase>()
            .map_err(|e| SagaStoreError::Corrupt(e.to_string()))?,
        total_files: count(row.try_get("total_files").map_err(get)?, "total_files")?,
        completed_files: count(row.try_get("completed_files").map_err(get)?, "completed_files")?,
        persisted_files: count(row.try_get("persisted_files").map_err(get)?, "persisted_files")?,
        failed_files: count(row.try_get("failed_files").map_err(get)?, "failed_files")?,
        skipped_files: count(row.try_get("skipped_files").map_err(get)?, "skipped_files")?,
        files: files.0,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}
