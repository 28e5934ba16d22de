use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::error;

use crate::errors::AppError;
use crate::models::{Message, MessageRole};

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whole conversation, oldest first.
    pub async fn find_by_conversation_id(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for conversation {conversation_id}: {e}");
            AppError::db_query(
                format!("Failed to fetch messages for conversation {conversation_id}"),
                e,
            )
        })?;

        rows.iter().map(row_to_message).collect()
    }

    /// The `limit` most recent messages, still oldest first.
    pub async fn find_recent(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM (
                 SELECT id, conversation_id, role, content, created_at
                 FROM messages
                 WHERE conversation_id = ?
                 ORDER BY id DESC
                 LIMIT ?
             ) ORDER BY id ASC",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch recent messages for conversation {conversation_id}: {e}");
            AppError::db_query("Failed to fetch recent messages", e)
        })?;

        rows.iter().map(row_to_message).collect()
    }

    pub async fn create(
        &self,
        conversation_id: i64,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, AppError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save {role} message for conversation {conversation_id}: {e}");
            AppError::db_query("Failed to save message", e)
        })?;

        Ok(Message {
            id: result.last_insert_rowid(),
            conversation_id,
            role,
            content: content.to_string(),
            created_at,
        })
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message, AppError> {
    let role_str: String = row
        .try_get("role")
        .map_err(|e| AppError::db_query("Failed to read role", e))?;
    let role = MessageRole::try_from(role_str)
        .map_err(|e| AppError::Unexpected(format!("Unknown message role: {e}")))?;
    Ok(Message {
        id: row.try_get("id")
            .map_err(|e| AppError::db_query("Failed to read id", e))?,
        conversation_id: row.try_get("conversation_id")
            .map_err(|e| AppError::db_query("Failed to read conversation_id", e))?,
        role,
        content: row.try_get("content")
            .map_err(|e| AppError::db_query("Failed to read content", e))?,
        created_at: row.try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::conversation_repository::ConversationRepository;
    use crate::db::Database;

    #[tokio::test]
    async fn recent_messages_are_bounded_and_chronological() {
        let db = Database::open_in_memory().await.unwrap();
        let conversation = ConversationRepository::new(db.pool()).create("t").await.unwrap();
        let repo = MessageRepository::new(db.pool());
        for i in 0..25 {
            let role = if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant };
            repo.create(conversation.id, role, &format!("m{i}")).await.unwrap();
        }

        let recent = repo.find_recent(conversation.id, 10).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (15..25).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
        assert_eq!(repo.find_by_conversation_id(conversation.id).await.unwrap().len(), 25);
    }

    #[tokio::test]
    async fn deleting_conversation_cascades() {
        let db = Database::open_in_memory().await.unwrap();
        let conversations = ConversationRepository::new(db.pool());
        let repo = MessageRepository::new(db.pool());
        let c = conversations.create("t").await.unwrap();
        repo.create(c.id, MessageRole::User, "hi").await.unwrap();

        conversations.delete(c.id).await.unwrap();
        assert!(repo.find_by_conversation_id(c.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn system_role_is_rejected_by_schema() {
        let db = Database::open_in_memory().await.unwrap();
        let c = ConversationRepository::new(db.pool()).create("t").await.unwrap();
        let err = MessageRepository::new(db.pool())
            .create(c.id, MessageRole::System, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DatabaseQueryFailed { .. }));
    }
}
