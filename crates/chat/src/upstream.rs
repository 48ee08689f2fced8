use std::{pin::Pin, time::Duration};

use config::UpstreamConfig;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ChatError;

/// Raw provider chunks as decoded from the upstream SSE stream, in arrival
/// order. Mid-stream failures surface as `Err` items; the pipeline converts
/// them into one final error chunk.
pub(crate) type RawChunkStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Streaming HTTP client for one upstream platform.
///
/// Holds the platform bearer key and the configured timeouts; the underlying
/// reqwest client pools connections across concurrent streams.
pub(crate) struct UpstreamClient {
    client: Client,
    api_key: SecretString,
    response_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .read_timeout(Duration::from_millis(config.read_timeout_ms))
            .build()
            .map_err(|e| {
                log::error!("Failed to build upstream HTTP client: {e}");
                ChatError::UpstreamConnection(e.to_string())
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        })
    }

    /// Open the streaming call and return the raw chunk sequence.
    ///
    /// Transient connection failures are retried up to three times with a
    /// doubling backoff starting at 100ms; a retried attempt restarts the
    /// whole request. Non-success statuses and caller-side request errors
    /// fail fast. No partial chunks are ever emitted for a failed attempt.
    pub async fn stream(
        &self,
        url: &str,
        body: &serde_json::Value,
        extra_headers: &'static [(&'static str, &'static str)],
    ) -> Result<RawChunkStream, ChatError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;

        let response = loop {
            match self.send(url, body, extra_headers).await {
                Ok(response) => break response,
                Err(failure) if failure.transient && attempt < MAX_RETRIES => {
                    attempt += 1;
                    log::warn!(
                        "Upstream call to {url} failed ({error}), retry {attempt}/{MAX_RETRIES} in {backoff:?}",
                        error = failure.error
                    );

                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(failure) => return Err(failure.error),
            }
        };

        let events = response.bytes_stream().eventsource();

        let chunks = events.filter_map(|event| async move {
            match event {
                Ok(event) => {
                    // OpenAI-compatible upstreams close with a [DONE] marker
                    // that carries no payload.
                    if event.data.trim() == "[DONE]" {
                        None
                    } else {
                        Some(Ok(event.data))
                    }
                }
                Err(e) => Some(Err(ChatError::UpstreamConnection(e.to_string()))),
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn send(
        &self,
        url: &str,
        body: &serde_json::Value,
        extra_headers: &'static [(&'static str, &'static str)],
    ) -> Result<reqwest::Response, SendFailure> {
        let mut request = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .json(body);

        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }

        let response = match tokio::time::timeout(self.response_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(SendFailure {
                    // Request construction problems are the caller's fault
                    // and will not heal on retry.
                    transient: !e.is_builder(),
                    error: ChatError::UpstreamConnection(e.to_string()),
                });
            }
            Err(_) => {
                return Err(SendFailure {
                    transient: true,
                    error: ChatError::UpstreamConnection(format!(
                        "no response within {:?}",
                        self.response_timeout
                    )),
                });
            }
        };

        let status = response.status();

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            log::error!("Upstream {url} answered {status}: {detail}");

            return Err(SendFailure {
                transient: false,
                error: ChatError::UpstreamProtocol {
                    status: status.as_u16(),
                    detail,
                },
            });
        }

        Ok(response)
    }
}

struct SendFailure {
    error: ChatError,
    transient: bool,
}
