//! The streaming chat gateway core.
//!
//! One pipeline serves every request: credential validation, entitlement
//! (including mid-lifecycle membership demotion), bounded history assembly,
//! the provider-shaped upstream call with bounded retries, order-preserving
//! reframing of raw provider chunks into the canonical chunk protocol, and
//! fire-and-forget persistence of the completed exchange.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Json, Path, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::{Stream, StreamExt, stream};

mod entitlement;
mod error;
mod history;
mod messages;
mod pipeline;
mod provider;
mod recorder;
mod reorder;
mod upstream;

pub use error::ChatError;
pub use messages::{ChatChunk, ChatRequest, ChunkPayload, ChunkUsage, ErrorChunk, ErrorChunkKind};
pub use pipeline::ChatGateway;

/// Creates the axum router for the chat endpoint.
pub fn router(gateway: Arc<ChatGateway>) -> Router {
    Router::new()
        .route("/chat/{provider}", post(chat))
        .with_state(gateway)
}

/// Handle one chat request as a line-framed streaming response.
///
/// Refusals (blank prompt, unknown model, rejected credential, entitlement
/// outcomes) still produce a well-formed single-chunk stream; once the
/// upstream is connected, every raw chunk maps to exactly one canonical
/// chunk in arrival order.
async fn chat(
    State(gateway): State<Arc<ChatGateway>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    log::info!("Chat request for model {} via {provider}", request.model_name);

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match gateway.prepare(&provider, bearer, request).await {
        Ok(prepared) => streaming_response(pipeline::frames(prepared)),
        Err(chunk) => streaming_response(stream::once(async move { pipeline::frame(&chunk) })),
    }
}

fn streaming_response(lines: impl Stream<Item = String> + Send + 'static) -> Response {
    let body = Body::from_stream(lines.map(Ok::<_, Infallible>));

    (
        [(header::CONTENT_TYPE, "text/event-stream;charset=UTF-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod tests {
    use auth::CredentialGuard;
    use config::{CredentialsConfig, DatabaseConfig};
    use secrecy::SecretString;
    use storage::Storage;
    use tempfile::TempDir;

    /// A storage handle backed by a throwaway on-disk database. The TempDir
    /// must be kept alive for the duration of the test.
    pub(crate) async fn test_storage() -> (Storage, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("botgate-test.db");

        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", path.display()),
            max_connections: 2,
        };

        let storage = Storage::connect(&config).await.unwrap();

        (storage, dir)
    }

    pub(crate) fn test_guard() -> CredentialGuard {
        CredentialGuard::new(&CredentialsConfig {
            secret: Some(SecretString::from("0123456789abcdef0123456789abcdef")),
            expiration: 3600,
            admin_expiration: 600,
        })
        .unwrap()
    }
}
