use storage::Storage;

use crate::{
    error::ChatError,
    messages::{Turn, TurnRole},
};

/// Load the conversation history as alternating turns, oldest first.
///
/// The latest `n` exchanges are fetched by descending sequence id and
/// re-sorted ascending; each stored exchange expands to exactly two turns,
/// user prompt then assistant answer, so the rendered context always starts
/// with a user turn and alternates from there. `requested` is honored only
/// when it is positive and below the model's configured maximum.
pub(crate) async fn assemble(
    storage: &Storage,
    conversation_id: &str,
    requested: Option<i64>,
    model_max: i64,
) -> Result<Vec<Turn>, ChatError> {
    let n = match requested {
        Some(requested) if requested > 0 && requested < model_max => requested,
        _ => model_max,
    };

    let mut rows = storage.latest_exchanges(conversation_id, n).await?;
    rows.sort_by_key(|row| row.id);

    let mut turns = Vec::with_capacity(rows.len() * 2);

    for row in rows {
        turns.push(Turn {
            role: TurnRole::User,
            content: row.prompt,
        });
        turns.push(Turn {
            role: TurnRole::Assistant,
            content: row.answer,
        });
    }

    Ok(turns)
}
