use chrono::Utc;
use sqlx::SqlitePool;
use tracing::error;

use crate::errors::AppError;
use crate::models::Conversation;

#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recently updated first.
    pub async fn find_all(&self) -> Result<Vec<Conversation>, AppError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at FROM conversations
             ORDER BY updated_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch all conversations: {e}");
            AppError::db_query("Failed to fetch conversations", e)
        })
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find conversation {id}: {e}");
            AppError::db_query(format!("Failed to find conversation {id}"), e)
        })
    }

    pub async fn create(&self, title: &str) -> Result<Conversation, AppError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO conversations (title, created_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create conversation: {e}");
            AppError::db_query("Failed to create conversation", e)
        })?;

        Ok(Conversation {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn update_title(&self, id: i64, title: &str) -> Result<Conversation, AppError> {
        let result = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to rename conversation {id}: {e}");
                AppError::db_query("Failed to update conversation", e)
            })?;
        if result.rows_affected() == 0 {
            return Err(AppError::ConversationNotFound { id });
        }
        self.find_by_id(id)
            .await?
            .ok_or(AppError::ConversationNotFound { id })
    }

    pub async fn update_timestamp(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to update conversation timestamp {id}: {e}");
                AppError::db_query("Failed to update conversation", e)
            })?;
        Ok(())
    }

    /// Messages go with it through the foreign-key cascade.
    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete conversation {id}: {e}");
                AppError::db_query("Failed to delete conversation", e)
            })?;
        if result.rows_affected() == 0 {
            return Err(AppError::ConversationNotFound { id });
        }
        Ok(())
    }
}
