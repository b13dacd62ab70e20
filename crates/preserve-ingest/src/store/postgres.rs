use super::{FileBatch, MetadataStore};
use crate::models::{IngestFile, IngestObject};
use async_trait::async_trait;
use preserve_common::{PreserveError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, instrument};

const KIND_OBJECT: &str = "object";
const KIND_FILE: &str = "file";

fn db_error(context: &str, err: sqlx::Error) -> PreserveError {
    PreserveError::MetadataStore(format!("{}: {}", context, err))
}

/// Metadata store backed by the `ingest_records` table.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then bring the schema up to date.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect to metadata store", e))?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| PreserveError::MetadataStore(format!("Migration failed: {}", e)))?;

        info!("Metadata store connected");
        Ok(Self::new(pool))
    }

    async fn get<T>(&self, kind: &str, work_item_id: i64, identifier: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send + Unpin + 'static,
    {
        let row = sqlx::query(
            "SELECT data FROM ingest_records WHERE work_item_id = $1 AND kind = $2 AND identifier = $3",
        )
        .bind(work_item_id)
        .bind(kind)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load record", e))?;

        row.map(|r| r.try_get::<Json<T>, _>("data").map(|json| json.0))
            .transpose()
            .map_err(|e| db_error("Failed to decode record", e))
    }

    async fn save<T>(&self, kind: &str, work_item_id: i64, identifier: &str, record: &T) -> Result<()>
    where
        T: serde::Serialize + Sync,
    {
        sqlx::query(
            r#"
            INSERT INTO ingest_records (work_item_id, kind, identifier, data, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (work_item_id, kind, identifier)
            DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(work_item_id)
        .bind(kind)
        .bind(identifier)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save record", e))?;
        Ok(())
    }

    async fn delete(&self, kind: &str, work_item_id: i64, identifier: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM ingest_records WHERE work_item_id = $1 AND kind = $2 AND identifier = $3",
        )
        .bind(work_item_id)
        .bind(kind)
        .bind(identifier)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to delete record", e))?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self))]
    async fn object_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestObject>> {
        self.get(KIND_OBJECT, work_item_id, identifier).await
    }

    #[instrument(skip(self, object), fields(identifier = %object.identifier()))]
    async fn object_save(&self, work_item_id: i64, object: &IngestObject) -> Result<()> {
        self.save(KIND_OBJECT, work_item_id, &object.identifier(), object)
            .await
    }

    async fn object_delete(&self, work_item_id: i64, identifier: &str) -> Result<()> {
        self.delete(KIND_OBJECT, work_item_id, identifier).await
    }

    #[instrument(skip(self))]
    async fn file_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestFile>> {
        self.get(KIND_FILE, work_item_id, identifier).await
    }

    async fn file_save(&self, work_item_id: i64, file: &IngestFile) -> Result<()> {
        self.save(KIND_FILE, work_item_id, &file.identifier(), file)
            .await
    }

    async fn file_delete(&self, work_item_id: i64, identifier: &str) -> Result<()> {
        self.delete(KIND_FILE, work_item_id, identifier).await
    }

    #[instrument(skip(self))]
    async fn file_batch(&self, work_item_id: i64, offset: u64, limit: u64) -> Result<FileBatch> {
        // One extra row tells us whether another page exists.
        let rows = sqlx::query(
            r#"
            SELECT data FROM ingest_records
            WHERE work_item_id = $1 AND kind = $2
            ORDER BY identifier
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(work_item_id)
        .bind(KIND_FILE)
        .bind(offset as i64)
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list file records", e))?;

        let mut files = rows
            .iter()
            .map(|r| r.try_get::<Json<IngestFile>, _>("data").map(|json| json.0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_error("Failed to decode file record", e))?;

        let next_offset = if files.len() as u64 > limit {
            files.truncate(limit as usize);
            Some(offset + limit)
        } else {
            None
        };
        debug!(work_item_id, offset, count = files.len(), "Loaded file batch");
        Ok(FileBatch { files, next_offset })
    }

    async fn file_count(&self, work_item_id: i64) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ingest_records WHERE work_item_id = $1 AND kind = $2",
        )
        .bind(work_item_id)
        .bind(KIND_FILE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count file records", e))?;
        Ok(count as u64)
    }

    #[instrument(skip(self))]
    async fn work_item_delete(&self, work_item_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ingest_records WHERE work_item_id = $1")
            .bind(work_item_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete WorkItem records", e))?;
        Ok(result.rows_affected())
    }
}
