//! Chat message repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{ChatMessageDbModel, NewChatMessage};
use crate::database::retry::retry_on_sqlite_busy;

/// Chat message repository trait.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn insert_message(&self, message: &NewChatMessage) -> Result<i64>;
    /// Insert a batch in one transaction. Returns the number of rows written.
    async fn insert_batch(&self, messages: &[NewChatMessage]) -> Result<u64>;
    async fn list_for_recording(&self, recording_id: &str) -> Result<Vec<ChatMessageDbModel>>;
    async fn count_for_recording(&self, recording_id: &str) -> Result<i64>;
}

/// SQLx implementation of ChatRepository.
#[derive(Clone)]
pub struct SqlxChatRepository {
    pool: SqlitePool,
}

impl SqlxChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO chat_messages (recording_id, author, body, sent_at, rel_timestamp)
    VALUES (?, ?, ?, ?, ?)
"#;

#[async_trait]
impl ChatRepository for SqlxChatRepository {
    async fn insert_message(&self, message: &NewChatMessage) -> Result<i64> {
        retry_on_sqlite_busy("insert_chat_message", || async move {
            let result = sqlx::query(INSERT_SQL)
                .bind(&message.recording_id)
                .bind(&message.author)
                .bind(&message.body)
                .bind(message.sent_at.timestamp_millis())
                .bind(message.rel_timestamp)
                .execute(&self.pool)
                .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn insert_batch(&self, messages: &[NewChatMessage]) -> Result<u64> {
        if messages.is_empty() {
            return Ok(0);
        }

        retry_on_sqlite_busy("insert_chat_batch", || async move {
            let mut tx = self.pool.begin().await?;
            let mut written = 0u64;
            for message in messages {
                written += sqlx::query(INSERT_SQL)
                    .bind(&message.recording_id)
                    .bind(&message.author)
                    .bind(&message.body)
                    .bind(message.sent_at.timestamp_millis())
                    .bind(message.rel_timestamp)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        })
        .await
    }

    async fn list_for_recording(&self, recording_id: &str) -> Result<Vec<ChatMessageDbModel>> {
        let messages = sqlx::query_as::<_, ChatMessageDbModel>(
            "SELECT * FROM chat_messages WHERE recording_id = ? ORDER BY rel_timestamp, id",
        )
        .bind(recording_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn count_for_recording(&self, recording_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE recording_id = ?")
                .bind(recording_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
