//! Recording repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{PriorityCount, RecordingDbModel, RecordingMetadata};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::domain::{FetchState, PlaceholderId, PublishState};
use crate::{Error, Result};

/// Outcome of upserting a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogUpsert {
    Inserted,
    Refreshed,
}

/// Recording repository trait.
#[async_trait]
pub trait RecordingRepository: Send + Sync {
    async fn get_recording(&self, id: &str) -> Result<RecordingDbModel>;
    async fn find_recording(&self, id: &str) -> Result<Option<RecordingDbModel>>;
    async fn list_recordings(&self, channel: &str, limit: i64) -> Result<Vec<RecordingDbModel>>;

    // Discovery
    async fn upsert_from_catalog(
        &self,
        channel: &str,
        metadata: &RecordingMetadata,
    ) -> Result<CatalogUpsert>;
    /// Insert a placeholder row; returns `false` if it already exists.
    async fn create_placeholder(
        &self,
        channel: &str,
        placeholder: &PlaceholderId,
        started_at_ms: i64,
    ) -> Result<bool>;
    async fn list_placeholders(&self, channel: &str) -> Result<Vec<RecordingDbModel>>;

    // Selection
    /// Best eligible row whose last error (if any) is at or before `error_cutoff_ms`.
    async fn select_next(&self, channel: &str, error_cutoff_ms: i64)
    -> Result<Option<RecordingDbModel>>;
    /// Conditional `pending|failed -> downloading`. Returns `false` if the row was not claimable.
    async fn claim(&self, id: &str) -> Result<bool>;

    // Fetch bookkeeping
    async fn update_progress(&self, id: &str, bytes: i64, total: i64) -> Result<()>;
    async fn mark_fetched(
        &self,
        id: &str,
        local_path: &str,
        publish_state: PublishState,
    ) -> Result<()>;
    async fn record_fetch_failure(&self, id: &str, error: &str, attempts: u32) -> Result<()>;
    /// Hand a `downloading` row back to `pending` without touching its counters.
    async fn release_claim(&self, id: &str) -> Result<()>;
    /// Reset rows left `downloading` by a previous process. Returns the count.
    async fn reset_interrupted(&self, channel: &str) -> Result<u64>;

    // Publish bookkeeping
    async fn mark_published(&self, id: &str, url: &str) -> Result<()>;
    async fn record_publish_failure(&self, id: &str, error: &str) -> Result<()>;
    /// Fetched rows whose publish never finished, highest priority first.
    async fn list_pending_publishes(&self, channel: &str) -> Result<Vec<RecordingDbModel>>;

    // Operator controls
    async fn set_priority(&self, id: &str, priority: i64) -> Result<()>;
    async fn set_skip_publish(&self, id: &str, skip: bool) -> Result<()>;
    async fn pending_counts_by_priority(&self, channel: &str) -> Result<Vec<PriorityCount>>;
    /// Rows with a fetch in flight or a publish outstanding.
    async fn list_active(&self, channel: &str) -> Result<Vec<RecordingDbModel>>;
}

/// SQLx implementation of RecordingRepository.
#[derive(Clone)]
pub struct SqlxRecordingRepository {
    pool: SqlitePool,
}

impl SqlxRecordingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn ensure_found(rows: u64, id: &str) -> Result<()> {
        if rows == 0 {
            return Err(Error::not_found("Recording", id));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordingRepository for SqlxRecordingRepository {
    async fn get_recording(&self, id: &str) -> Result<RecordingDbModel> {
        self.find_recording(id)
            .await?
            .ok_or_else(|| Error::not_found("Recording", id))
    }

    async fn find_recording(&self, id: &str) -> Result<Option<RecordingDbModel>> {
        let recording =
            sqlx::query_as::<_, RecordingDbModel>("SELECT * FROM recordings WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(recording)
    }

    async fn list_recordings(&self, channel: &str, limit: i64) -> Result<Vec<RecordingDbModel>> {
        let recordings = sqlx::query_as::<_, RecordingDbModel>(
            "SELECT * FROM recordings WHERE channel = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(channel)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(recordings)
    }

    async fn upsert_from_catalog(
        &self,
        channel: &str,
        metadata: &RecordingMetadata,
    ) -> Result<CatalogUpsert> {
        let now = now_ms();
        let inserted = sqlx::query(
            r#"
            INSERT INTO recordings (id, channel, title, started_at, duration_secs, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&metadata.id)
        .bind(channel)
        .bind(&metadata.title)
        .bind(metadata.started_at.timestamp_millis())
        .bind(metadata.duration_secs)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok(CatalogUpsert::Inserted);
        }

        // Known row: refresh metadata only, fetch/publish state is not ours.
        sqlx::query(
            "UPDATE recordings SET title = ?, duration_secs = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&metadata.title)
        .bind(metadata.duration_secs)
        .bind(now)
        .bind(&metadata.id)
        .execute(&self.pool)
        .await?;
        Ok(CatalogUpsert::Refreshed)
    }

    async fn create_placeholder(
        &self,
        channel: &str,
        placeholder: &PlaceholderId,
        started_at_ms: i64,
    ) -> Result<bool> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO recordings (id, channel, title, started_at, is_placeholder, created_at, updated_at)
            VALUES (?, ?, '', ?, 1, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(placeholder.as_str())
        .bind(channel)
        .bind(started_at_ms)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_placeholders(&self, channel: &str) -> Result<Vec<RecordingDbModel>> {
        let recordings = sqlx::query_as::<_, RecordingDbModel>(
            "SELECT * FROM recordings WHERE channel = ? AND is_placeholder = 1 ORDER BY started_at",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(recordings)
    }

    async fn select_next(
        &self,
        channel: &str,
        error_cutoff_ms: i64,
    ) -> Result<Option<RecordingDbModel>> {
        let recording = sqlx::query_as::<_, RecordingDbModel>(
            r#"
            SELECT * FROM recordings
            WHERE channel = ?
              AND is_placeholder = 0
              AND fetch_state IN ('pending', 'failed')
              AND (last_error_at IS NULL OR last_error_at <= ?)
            ORDER BY priority DESC, started_at ASC
            LIMIT 1
            "#,
        )
        .bind(channel)
        .bind(error_cutoff_ms)
        .fetch_optional(&self.pool)
        .await?;
        Ok(recording)
    }

    async fn claim(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET fetch_state = 'downloading', updated_at = ?
            WHERE id = ? AND is_placeholder = 0 AND fetch_state IN ('pending', 'failed')
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(&self, id: &str, bytes: i64, total: i64) -> Result<()> {
        let total = total.max(0);
        let bytes = if total > 0 {
            bytes.clamp(0, total)
        } else {
            bytes.max(0)
        };

        retry_on_sqlite_busy("update_progress", || async move {
            let now = now_ms();
            sqlx::query(
                r#"
                UPDATE recordings
                SET bytes = ?, total = ?, progress_updated_at = ?, updated_at = ?
                WHERE id = ? AND fetch_state = 'downloading'
                "#,
            )
            .bind(bytes)
            .bind(total)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn mark_fetched(
        &self,
        id: &str,
        local_path: &str,
        publish_state: PublishState,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET fetch_state = ?, local_path = ?, publish_state = ?,
                bytes = CASE WHEN total > 0 THEN total ELSE bytes END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(FetchState::Completed.as_str())
        .bind(local_path)
        .bind(publish_state.as_str())
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::ensure_found(result.rows_affected(), id)
    }

    async fn record_fetch_failure(&self, id: &str, error: &str, attempts: u32) -> Result<()> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET fetch_state = 'failed', retry_count = retry_count + ?,
                last_error = ?, last_error_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::ensure_found(result.rows_affected(), id)
    }

    async fn release_claim(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE recordings SET fetch_state = 'pending', updated_at = ? WHERE id = ? AND fetch_state = 'downloading'",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_interrupted(&self, channel: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE recordings SET fetch_state = 'pending', updated_at = ? WHERE channel = ? AND fetch_state = 'downloading'",
        )
        .bind(now_ms())
        .bind(channel)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_published(&self, id: &str, url: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET publish_state = 'published', publish_url = ?, publish_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(url)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::ensure_found(result.rows_affected(), id)
    }

    async fn record_publish_failure(&self, id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE recordings SET publish_state = 'failed', publish_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::ensure_found(result.rows_affected(), id)
    }

    async fn set_priority(&self, id: &str, priority: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE recordings SET priority = ?, updated_at = ? WHERE id = ?")
                .bind(priority)
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Self::ensure_found(result.rows_affected(), id)
    }

    async fn set_skip_publish(&self, id: &str, skip: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE recordings SET skip_publish = ?, updated_at = ? WHERE id = ?")
                .bind(skip)
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Self::ensure_found(result.rows_affected(), id)
    }

    async fn pending_counts_by_priority(&self, channel: &str) -> Result<Vec<PriorityCount>> {
        let counts = sqlx::query_as::<_, PriorityCount>(
            r#"
            SELECT priority, COUNT(*) AS count FROM recordings
            WHERE channel = ? AND is_placeholder = 0 AND fetch_state IN ('pending', 'failed')
            GROUP BY priority
            ORDER BY priority DESC
            "#,
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn list_pending_publishes(&self, channel: &str) -> Result<Vec<RecordingDbModel>> {
        let recordings = sqlx::query_as::<_, RecordingDbModel>(
            r#"
            SELECT * FROM recordings
            WHERE channel = ? AND is_placeholder = 0
              AND fetch_state = 'completed' AND publish_state = 'pending'
              AND local_path IS NOT NULL AND skip_publish = 0
            ORDER BY priority DESC, started_at ASC
            "#,
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(recordings)
    }

    async fn list_active(&self, channel: &str) -> Result<Vec<RecordingDbModel>> {
        let recordings = sqlx::query_as::<_, RecordingDbModel>(
            r#"
            SELECT * FROM recordings
            WHERE channel = ? AND is_placeholder = 0
              AND (fetch_state = 'downloading' OR publish_state = 'pending')
            ORDER BY priority DESC, started_at ASC
            "#,
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;
        Ok(recordings)
    }
}
