use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use auth::CredentialGuard;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use config::ProvidersConfig;
use futures::{Stream, StreamExt, stream};
use storage::{ExchangeRecord, Storage};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    entitlement::{self, Entitlement},
    error::ChatError,
    history,
    messages::{ChatChunk, ChatRequest, ChunkUsage, Turn, TurnRole},
    provider::{CallerIdentity, Reframer, bailian, qianfan},
    recorder::ExchangeRecorder,
    reorder::ReorderBuffer,
    upstream::{RawChunkStream, UpstreamClient},
};

/// Per-request pipeline driver.
///
/// One instance serves every chat request: it ties credential validation and
/// entitlement to the upstream call and the reframing stage, preserves chunk
/// ordering, converts stage failures into in-band error chunks, and hands
/// completed exchanges to the recorder without blocking the response.
pub struct ChatGateway {
    storage: Storage,
    guard: Arc<CredentialGuard>,
    recorder: ExchangeRecorder,
    providers: BTreeMap<&'static str, ProviderHandle>,
}

struct ProviderHandle {
    reframer: &'static dyn Reframer,
    client: UpstreamClient,
}

impl ChatGateway {
    /// Build the gateway and start the recorder worker.
    ///
    /// The returned handle joins once the worker has drained its queue after
    /// `shutdown` fires.
    pub fn new(
        providers: &ProvidersConfig,
        storage: Storage,
        guard: Arc<CredentialGuard>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let mut handles: BTreeMap<&'static str, ProviderHandle> = BTreeMap::new();

        if let Some(config) = &providers.qianfan {
            handles.insert(
                qianfan::PROVIDER,
                ProviderHandle {
                    reframer: &qianfan::QianfanReframer,
                    client: UpstreamClient::new(config)?,
                },
            );
        }

        if let Some(config) = &providers.bailian {
            handles.insert(
                bailian::PROVIDER,
                ProviderHandle {
                    reframer: &bailian::BailianReframer,
                    client: UpstreamClient::new(config)?,
                },
            );
        }

        log::debug!("Chat gateway initialized with {} upstream provider(s)", handles.len());

        let (recorder, worker) = ExchangeRecorder::spawn(storage.clone(), shutdown);

        Ok((
            Self {
                storage,
                guard,
                recorder,
                providers: handles,
            },
            worker,
        ))
    }

    /// Run the pre-stream stages: validation, authorization, history
    /// assembly, request building and the upstream connect (with retries).
    ///
    /// Any refusal comes back as the single canonical chunk the client will
    /// see; on success the raw upstream stream is ready to be reframed.
    pub(crate) async fn prepare(
        &self,
        provider_path: &str,
        bearer: Option<&str>,
        request: ChatRequest,
    ) -> Result<PreparedStream, Box<ChatChunk>> {
        // Manual validation: the response is already committed to a
        // streaming content type, so a rejected body must still arrive as a
        // readable chunk.
        if request.content.trim().is_empty() {
            return Err(refuse(ChatError::BlankPrompt));
        }

        let model = self
            .storage
            .model_by_name(&request.model_name)
            .await
            .map_err(|e| refuse(e.into()))?;

        let Some(model) = model else {
            return Err(refuse(ChatError::UnknownModel(request.model_name)));
        };

        if model.provider != provider_path {
            return Err(refuse(ChatError::WrongProvider {
                model: model.name,
                provider: provider_path.to_string(),
            }));
        }

        let Some(handle) = self.providers.get(model.provider.as_str()) else {
            return Err(refuse(ChatError::ProviderNotConfigured(model.provider)));
        };

        log::debug!(
            "Dispatching model {} to the {} reframer",
            model.name,
            handle.reframer.provider()
        );

        let identity = self.guard.validate_bearer(bearer).map_err(|e| refuse(e.into()))?;

        let user = match entitlement::authorize(&self.storage, &self.guard, &identity, &model).await {
            Ok(Entitlement::Allowed(user)) => user,
            Ok(Entitlement::Demoted { token }) => {
                return Err(Box::new(
                    ChatError::MembershipLapsed.into_chunk_with(None, Some(token)),
                ));
            }
            Err(e) => return Err(refuse(e)),
        };

        let conversation_id = format!("{}_{}", model.name, user.uuid);

        let mut turns = if request.is_new_chat {
            Vec::new()
        } else {
            history::assemble(&self.storage, &conversation_id, request.his_msg_number, model.max_history)
                .await
                .map_err(refuse)?
        };

        turns.push(Turn {
            role: TurnRole::User,
            content: request.content.clone(),
        });

        let params: serde_json::Value = serde_json::from_str(&model.parameters).unwrap_or_else(|e| {
            log::warn!("Model {} carries unparsable parameters: {e}", model.name);
            serde_json::json!({})
        });

        let body = handle.reframer.build_request(&params, &turns);

        let raw = handle
            .client
            .stream(&model.url, &body, handle.reframer.streaming_headers())
            .await
            .map_err(refuse)?;

        Ok(PreparedStream {
            raw,
            reframer: handle.reframer,
            caller: CallerIdentity {
                requested_model: model.name.clone(),
                user_id: user.uuid.clone(),
                user_name: identity.nickname.clone(),
            },
            recorder: self.recorder.clone(),
            seed: ExchangeRecord {
                bot_name: model.name,
                user_id: user.uuid,
                user_name: identity.nickname,
                conversation_id,
                total_tokens: 0,
                prompt: request.content,
                prompt_kind: request.content_type,
                prompt_tokens: 0,
                answer: String::new(),
                answer_kind: model.kind,
                answer_tokens: 0,
            },
        })
    }
}

fn refuse(error: ChatError) -> Box<ChatChunk> {
    log::debug!("Chat request refused: {error}");
    Box::new(error.into_chunk())
}

/// Everything the streaming stage needs once the upstream call is open.
pub(crate) struct PreparedStream {
    raw: RawChunkStream,
    reframer: &'static dyn Reframer,
    caller: CallerIdentity,
    recorder: ExchangeRecorder,
    seed: ExchangeRecord,
}

struct StreamState {
    raw: RawChunkStream,
    reframer: &'static dyn Reframer,
    caller: CallerIdentity,
    recorder: ExchangeRecorder,
    seed: ExchangeRecord,
    reorder: ReorderBuffer<ChatChunk>,
    ready: VecDeque<String>,
    index: u64,
    usage: ChunkUsage,
    done: bool,
    fatal: bool,
}

impl StreamState {
    /// Classify and reframe one raw chunk. Index 0 is always a first chunk
    /// regardless of content; the terminal marker makes a last chunk and
    /// captures usage; everything else is a middle. A chunk that fails to
    /// reframe becomes an in-band error chunk and the stream carries on.
    fn build(&mut self, raw: &str) -> ChatChunk {
        let result = if self.index == 0 {
            self.reframer.first(raw, &self.caller)
        } else if self.reframer.is_terminal(raw) {
            self.usage = self.reframer.usage(raw);
            self.reframer.last(raw)
        } else {
            self.reframer.middle(raw)
        };

        match result {
            Ok(chunk) => chunk,
            Err(e) => {
                log::error!("Failed to reframe upstream chunk: {e}");
                e.into_chunk_with(Some(raw.to_string()), None)
            }
        }
    }

    fn finish(&mut self) {
        if self.fatal {
            return;
        }

        let mut record = self.seed.clone();
        record.prompt_tokens = self.usage.prompt_tokens;
        record.answer_tokens = self.usage.answer_tokens;
        record.total_tokens = self.usage.total_tokens;

        self.recorder.record(record);
    }
}

/// Drive the streaming stage: raw chunks in arrival order are scanned into
/// the persistence accumulator, reframed into canonical chunks, pushed
/// through the reorder buffer under their ingestion index, and emitted as
/// framed lines. Completion schedules the recorder and ends the stream; a
/// mid-flight failure emits one final error chunk instead of truncating
/// silently.
pub(crate) fn frames(prepared: PreparedStream) -> impl Stream<Item = String> + Send {
    let state = StreamState {
        raw: prepared.raw,
        reframer: prepared.reframer,
        caller: prepared.caller,
        recorder: prepared.recorder,
        seed: prepared.seed,
        reorder: ReorderBuffer::new(),
        ready: VecDeque::new(),
        index: 0,
        usage: ChunkUsage::default(),
        done: false,
        fatal: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((line, state));
            }

            if state.done {
                state.finish();
                return None;
            }

            match state.raw.next().await {
                Some(Ok(raw)) => {
                    // The accumulator scan runs for every raw chunk and must
                    // never disturb the client-visible sequence.
                    let delta = state.reframer.delta(&raw);
                    state.seed.answer.push_str(&delta);

                    let chunk = state.build(&raw);

                    for chunk in state.reorder.push(state.index, chunk) {
                        state.ready.push_back(frame(&chunk));
                    }

                    state.index += 1;
                }
                Some(Err(e)) => {
                    log::error!("Upstream stream failed mid-flight: {e}");

                    let chunk = e.into_chunk();

                    for chunk in state.reorder.push(state.index, chunk) {
                        state.ready.push_back(frame(&chunk));
                    }

                    state.index += 1;
                    state.done = true;
                    state.fatal = true;
                }
                None => {
                    state.done = true;
                }
            }
        }
    })
}

/// Serialize one canonical chunk into its line frame: UTF-8 JSON, base64
/// encoded so an embedded newline inside content can never split a frame,
/// terminated by a newline.
pub(crate) fn frame(chunk: &ChatChunk) -> String {
    let json = serde_json::to_string(chunk).unwrap_or_else(|e| {
        log::error!("Failed to serialize canonical chunk: {e}");
        r#"{"kind":"error","error":{"kind":"unknown","code":500,"message":"serialization failed","timestamp":0}}"#
            .to_string()
    });

    let mut line = BASE64.encode(json.as_bytes());
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use auth::Role;
    use config::UpstreamConfig;
    use secrecy::SecretString;
    use serde_json::Value;
    use storage::ModelRegistration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::tests::{test_guard, test_storage};

    /// Serve one streaming response built from the given SSE data lines,
    /// then close. Returns the bound address.
    async fn sse_server(chunks: Vec<String>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;

            let body: String = chunks.iter().map(|chunk| format!("data: {chunk}\n\n")).collect();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        addr
    }

    fn providers() -> ProvidersConfig {
        let upstream = UpstreamConfig {
            api_key: SecretString::from("test-key"),
            response_timeout_ms: 5000,
            connect_timeout_ms: 1000,
            read_timeout_ms: 5000,
        };

        ProvidersConfig {
            qianfan: Some(upstream.clone()),
            bailian: Some(upstream),
        }
    }

    async fn register_model(storage: &Storage, url: &str, allowed_roles: &[&str]) {
        storage
            .register_model(&ModelRegistration {
                name: "ernie-speed".to_string(),
                kind: 0,
                provider: "qianfan".to_string(),
                url: url.to_string(),
                parameters: serde_json::json!({"model": "ernie-speed-8k", "stream": true}),
                allowed_roles: allowed_roles.iter().map(|role| role.to_string()).collect(),
                max_history: 10,
            })
            .await
            .unwrap();
    }

    fn request(content: &str) -> ChatRequest {
        ChatRequest {
            model_name: "ernie-speed".to_string(),
            content: content.to_string(),
            content_type: 0,
            is_new_chat: false,
            his_msg_number: None,
        }
    }

    fn decode(line: &str) -> Value {
        let bytes = BASE64.decode(line.trim_end()).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn full_stream_reframes_records_and_preserves_order() {
        let (storage, _dir) = test_storage().await;
        let guard = Arc::new(test_guard());
        let shutdown = CancellationToken::new();
        let (gateway, worker) = ChatGateway::new(&providers(), storage.clone(), guard.clone(), shutdown.clone()).unwrap();

        let addr = sse_server(vec![
            r#"{"id":"as-1","model":"ernie-speed-8k","choices":[{"delta":{"content":"He"},"finish_reason":null}]}"#.to_string(),
            r#"{"id":"as-1","choices":[{"delta":{"content":"llo"},"finish_reason":null}]}"#.to_string(),
            r#"{"id":"as-1","choices":[{"delta":{"content":"!"},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":3,"total_tokens":8}}"#.to_string(),
        ])
        .await;

        storage.register_user("alice@example.com", None, "alice", "h").await.unwrap();
        register_model(&storage, &format!("http://{addr}/chat"), &["ROLE_NORMAL"]).await;

        let token = guard.mint("alice@example.com", Role::Normal, "alice", 0).unwrap();
        let bearer = format!("Bearer {token}");

        let prepared = gateway.prepare("qianfan", Some(&bearer), request("hi")).await;
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(chunk) => unreachable!("prepare refused: {chunk:?}"),
        };

        let lines: Vec<String> = frames(prepared).collect().await;
        assert_eq!(lines.len(), 3);

        let first = decode(&lines[0]);
        assert_eq!(first["kind"], "first");
        assert_eq!(first["bot_name"], "ernie-speed-8k");
        assert_eq!(first["user_name"], "alice");
        assert_eq!(first["content"], "He");

        let middle = decode(&lines[1]);
        assert_eq!(middle["kind"], "middle");
        assert_eq!(middle["content"], "llo");

        let last = decode(&lines[2]);
        assert_eq!(last["kind"], "last");
        assert_eq!(last["usage"]["total_tokens"], 8);

        // Recording is fire-and-forget; poll until the row lands.
        let user = storage.user_by_email("alice@example.com").await.unwrap().unwrap();
        let conversation_id = format!("ernie-speed_{}", user.uuid);

        let mut rows = Vec::new();
        for _ in 0..100 {
            rows = storage.latest_exchanges(&conversation_id, 10).await.unwrap();
            if !rows.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].answer, "Hello!");
        assert_eq!(rows[0].prompt, "hi");
        assert_eq!(rows[0].prompt_tokens, 5);
        assert_eq!(rows[0].answer_tokens, 3);
        assert_eq!(rows[0].total_tokens, 8);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn blank_prompt_short_circuits_before_any_upstream_call() {
        let (storage, _dir) = test_storage().await;
        let guard = Arc::new(test_guard());
        let shutdown = CancellationToken::new();
        let (gateway, worker) = ChatGateway::new(&providers(), storage.clone(), guard.clone(), shutdown.clone()).unwrap();

        let chunk = gateway
            .prepare("qianfan", None, request("   "))
            .await
            .err()
            .expect("blank prompt must be refused");

        let json = decode(&frame(&chunk));
        assert_eq!(json["kind"], "error");
        assert_eq!(json["error"]["kind"], "invalid-request");

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn insufficient_role_is_refused_without_upstream_call() {
        let (storage, _dir) = test_storage().await;
        let guard = Arc::new(test_guard());
        let shutdown = CancellationToken::new();
        let (gateway, worker) = ChatGateway::new(&providers(), storage.clone(), guard.clone(), shutdown.clone()).unwrap();

        // No upstream server exists; reaching the connect stage would fail
        // with a different error kind than the one asserted here.
        storage.register_user("norm@example.com", None, "norm", "h").await.unwrap();
        register_model(&storage, "http://127.0.0.1:9/chat", &["ROLE_MEMBER"]).await;

        let token = guard.mint("norm@example.com", Role::Normal, "norm", 0).unwrap();
        let bearer = format!("Bearer {token}");

        let chunk = gateway
            .prepare("qianfan", Some(&bearer), request("hi"))
            .await
            .err()
            .expect("normal tier must be refused");

        let json = decode(&frame(&chunk));
        assert_eq!(json["error"]["kind"], "authorization-failure");
        assert_eq!(json["error"]["code"], 403);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn lapsed_membership_returns_fresh_credential_without_upstream_call() {
        let (storage, dir) = test_storage().await;
        let guard = Arc::new(test_guard());
        let shutdown = CancellationToken::new();
        let (gateway, worker) = ChatGateway::new(&providers(), storage.clone(), guard.clone(), shutdown.clone()).unwrap();

        storage.register_user("bob@example.com", None, "bob", "h").await.unwrap();
        storage.grant_role("bob@example.com", Role::Member.code(), 30).await.unwrap();
        register_model(&storage, "http://127.0.0.1:9/chat", &["ROLE_MEMBER"]).await;

        let pool = sqlx::SqlitePool::connect(&format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("botgate-test.db").display()
        ))
        .await
        .unwrap();
        sqlx::query("UPDATE users SET membership_expiry = 1 WHERE email = 'bob@example.com'")
            .execute(&pool)
            .await
            .unwrap();

        let token = guard.mint("bob@example.com", Role::Member, "bob", 0).unwrap();
        let bearer = format!("Bearer {token}");

        let chunk = gateway
            .prepare("qianfan", Some(&bearer), request("hi"))
            .await
            .err()
            .expect("lapsed member must be refused");

        let json = decode(&frame(&chunk));
        assert_eq!(json["error"]["kind"], "entitlement-lapsed");

        let fresh = json["error"]["token"].as_str().expect("a fresh credential rides along");
        let identity = guard.validate(fresh).unwrap();
        assert_eq!(identity.role, Role::Normal);
        assert_eq!(identity.version, 1);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn index_zero_is_always_a_first_chunk_even_with_terminal_marker() {
        let (storage, _dir) = test_storage().await;
        let guard = Arc::new(test_guard());
        let shutdown = CancellationToken::new();
        let (gateway, worker) = ChatGateway::new(&providers(), storage.clone(), guard.clone(), shutdown.clone()).unwrap();

        let addr = sse_server(vec![
            r#"{"id":"as-1","choices":[{"delta":{"content":"all at once"},"finish_reason":"stop"}]}"#.to_string(),
        ])
        .await;

        storage.register_user("alice@example.com", None, "alice", "h").await.unwrap();
        register_model(&storage, &format!("http://{addr}/chat"), &["ROLE_NORMAL"]).await;

        let token = guard.mint("alice@example.com", Role::Normal, "alice", 0).unwrap();
        let bearer = format!("Bearer {token}");

        let prepared = match gateway.prepare("qianfan", Some(&bearer), request("hi")).await {
            Ok(prepared) => prepared,
            Err(chunk) => unreachable!("prepare refused: {chunk:?}"),
        };

        let lines: Vec<String> = frames(prepared).collect().await;
        assert_eq!(lines.len(), 1);
        assert_eq!(decode(&lines[0])["kind"], "first");

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_chunk_becomes_error_chunk_and_stream_continues() {
        let (storage, _dir) = test_storage().await;
        let guard = Arc::new(test_guard());
        let shutdown = CancellationToken::new();
        let (gateway, worker) = ChatGateway::new(&providers(), storage.clone(), guard.clone(), shutdown.clone()).unwrap();

        let addr = sse_server(vec![
            r#"{"id":"as-1","choices":[{"delta":{"content":"ok"},"finish_reason":null}]}"#.to_string(),
            "{{definitely-not-json".to_string(),
            r#"{"id":"as-1","choices":[{"delta":{"content":"!"},"finish_reason":"stop"}]}"#.to_string(),
        ])
        .await;

        storage.register_user("alice@example.com", None, "alice", "h").await.unwrap();
        register_model(&storage, &format!("http://{addr}/chat"), &["ROLE_NORMAL"]).await;

        let token = guard.mint("alice@example.com", Role::Normal, "alice", 0).unwrap();
        let bearer = format!("Bearer {token}");

        let prepared = match gateway.prepare("qianfan", Some(&bearer), request("hi")).await {
            Ok(prepared) => prepared,
            Err(chunk) => unreachable!("prepare refused: {chunk:?}"),
        };

        let lines: Vec<String> = frames(prepared).collect().await;
        assert_eq!(lines.len(), 3);

        assert_eq!(decode(&lines[0])["kind"], "first");

        let error = decode(&lines[1]);
        assert_eq!(error["kind"], "error");
        assert_eq!(error["error"]["kind"], "json-malformed");
        assert_eq!(error["error"]["raw_chunk"], "{{definitely-not-json");

        assert_eq!(decode(&lines[2])["kind"], "last");

        shutdown.cancel();
        worker.await.unwrap();
    }
}
