//! Transactional merge of a live placeholder into its archived recording.

use sqlx::SqliteConnection;

use crate::Result;
use crate::database::models::RecordingMetadata;
use crate::database::time::now_ms;
use crate::domain::PlaceholderId;

/// Result of a merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Chat was moved onto `real_id` and the placeholder row deleted.
    Merged {
        real_id: String,
        /// `real.start - placeholder.start`, in seconds
        delta_secs: f64,
        messages_moved: u64,
    },
    /// The placeholder no longer exists.
    AlreadyReconciled,
}

/// Merge operations that run inside a caller-owned transaction.
///
/// Nothing here commits. The caller commits on `Ok` and rolls back otherwise.
pub struct ReconcileTxOps;

impl ReconcileTxOps {
    pub async fn merge(
        tx: &mut SqliteConnection,
        channel: &str,
        placeholder: &PlaceholderId,
        real: &RecordingMetadata,
    ) -> Result<MergeOutcome> {
        let placeholder_start: Option<i64> = sqlx::query_scalar(
            "SELECT started_at FROM recordings WHERE id = ? AND is_placeholder = 1",
        )
        .bind(placeholder.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(placeholder_start) = placeholder_start else {
            return Ok(MergeOutcome::AlreadyReconciled);
        };

        let now = now_ms();
        let real_start = real.started_at.timestamp_millis();

        // The real row may already be known from catalog sync; only metadata is refreshed.
        sqlx::query(
            r#"
            INSERT INTO recordings (id, channel, title, started_at, duration_secs, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                started_at = excluded.started_at,
                duration_secs = excluded.duration_secs,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&real.id)
        .bind(channel)
        .bind(&real.title)
        .bind(real_start)
        .bind(real.duration_secs)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let delta_secs = (real_start - placeholder_start) as f64 / 1000.0;

        let messages_moved = sqlx::query(
            r#"
            UPDATE chat_messages
            SET rel_timestamp = rel_timestamp - ?, recording_id = ?
            WHERE recording_id = ?
            "#,
        )
        .bind(delta_secs)
        .bind(&real.id)
        .bind(placeholder.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM recordings WHERE id = ? AND is_placeholder = 1")
            .bind(placeholder.as_str())
            .execute(&mut *tx)
            .await?;

        Ok(MergeOutcome::Merged {
            real_id: real.id.clone(),
            delta_secs,
            messages_moved,
        })
    }
}
