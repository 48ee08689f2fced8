use sqlx::FromRow;

use crate::{Result, Storage, now_epoch};

/// A recorded exchange row.
///
/// `id` is the append-only ordering key; "latest N" means the N highest ids,
/// re-sorted ascending before being rendered as history turns.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    /// Append-only sequence id.
    pub id: i64,
    /// The model that produced the answer.
    pub bot_name: String,
    /// The caller's external id.
    pub user_id: String,
    /// The caller's display name.
    pub user_name: String,
    /// `{model}_{user uuid}` conversation key.
    pub conversation_id: String,
    /// Upstream-reported total token count.
    pub total_tokens: i64,
    /// The user prompt.
    pub prompt: String,
    /// Prompt modality code.
    pub prompt_kind: i64,
    /// Upstream-reported prompt tokens (includes merged history).
    pub prompt_tokens: i64,
    /// The accumulated answer.
    pub answer: String,
    /// Answer modality code.
    pub answer_kind: i64,
    /// Upstream-reported answer tokens.
    pub answer_tokens: i64,
    /// Insertion time, epoch seconds.
    pub created_at: i64,
}

/// Fields of one completed exchange, handed to the recorder.
#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    /// The model that produced the answer.
    pub bot_name: String,
    /// The caller's external id.
    pub user_id: String,
    /// The caller's display name.
    pub user_name: String,
    /// `{model}_{user uuid}` conversation key.
    pub conversation_id: String,
    /// Upstream-reported total token count.
    pub total_tokens: i64,
    /// The user prompt.
    pub prompt: String,
    /// Prompt modality code.
    pub prompt_kind: i64,
    /// Upstream-reported prompt tokens.
    pub prompt_tokens: i64,
    /// The accumulated answer.
    pub answer: String,
    /// Answer modality code.
    pub answer_kind: i64,
    /// Upstream-reported answer tokens.
    pub answer_tokens: i64,
}

impl Storage {
    /// Append one exchange, returning its sequence id.
    pub async fn insert_exchange(&self, record: &ExchangeRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (bot_name, user_id, user_name, conversation_id, total_tokens,
                                  prompt, prompt_kind, prompt_tokens,
                                  answer, answer_kind, answer_tokens, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&record.bot_name)
        .bind(&record.user_id)
        .bind(&record.user_name)
        .bind(&record.conversation_id)
        .bind(record.total_tokens)
        .bind(&record.prompt)
        .bind(record.prompt_kind)
        .bind(record.prompt_tokens)
        .bind(&record.answer)
        .bind(record.answer_kind)
        .bind(record.answer_tokens)
        .bind(now_epoch())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The latest `n` exchanges for a conversation, newest first.
    pub async fn latest_exchanges(&self, conversation_id: &str, n: i64) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(n)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
