// Chat-completion streaming client
// Author: kelexine (https://github.com/kelexine)

mod cost;
pub mod sink;
pub mod streaming;

pub use cost::{CostBreakdown, Pricing};
pub use sink::{NullSink, ReplySink, StdoutSink};
pub use streaming::{LineOutcome, ReplyAccumulator};

use crate::cache::{compute_key, CacheStore};
use crate::config::ApiConfig;
use crate::error::{ChatError, Result};
use crate::models::{ChatRequest, Message, Usage};
use crate::utils::logging::sanitize;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// How often a blocking read waiting on the server re-checks the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// A completed (or degraded) reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// Reconstructed reply text; possibly partial or empty after a network failure.
    pub reply: String,
    /// Usage reported by the server, if any.
    pub usage: Option<Usage>,
    /// Whether the reply came from the cache.
    pub cached: bool,
}

/// Where a turn gets its reply from.
enum Prepared<'a> {
    Cached(ChatReply),
    Live {
        key: Option<String>,
        request: ChatRequest<'a>,
    },
}

/// Client for a streaming chat-completion endpoint.
///
/// Offers a blocking form (`send_blocking`) and an async form (`send`) with
/// identical behaviour:
/// - cache lookup before any network traffic
/// - SSE parsing with per-line error isolation
/// - cache write-back of non-empty replies
///
/// Each form owns its own connection pool, created on first use and released
/// when the client is closed or dropped.
pub struct ChatClient {
    config: ApiConfig,
    pricing: Pricing,
    cache: CacheStore,
    blocking_http: OnceLock<reqwest::blocking::Client>,
    async_http: OnceCell<reqwest::Client>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl ChatClient {
    pub fn new(config: &ApiConfig, cache: CacheStore) -> Self {
        Self {
            config: config.clone(),
            pricing: Pricing::from_config(config),
            cache,
            blocking_http: OnceLock::new(),
            async_http: OnceCell::new(),
            interrupt: None,
        }
    }

    /// Abort the current turn whenever `flag` is set.
    ///
    /// The flag is checked before the request is sent, after every line, and
    /// while a blocking read is waiting on a stalled server.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Token counts and estimated dollar cost of a turn.
    pub fn calculate_cost(&self, usage: Option<&Usage>) -> CostBreakdown {
        self.pricing.cost(usage)
    }

    fn check_interrupt(&self) -> Result<()> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(ChatError::Interrupted),
            _ => Ok(()),
        }
    }

    fn blocking_http(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.blocking_http.get() {
            return Ok(client);
        }

        // Configure HTTP client for streaming: bounded connect, unbounded body
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(self.config.timeout_seconds))
            .timeout(None::<Duration>)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created blocking HTTP client with connection pooling");
        Ok(self.blocking_http.get_or_init(|| client))
    }

    fn build_async_http(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.config.timeout_seconds))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to create HTTP client: {}", e)))
    }

    async fn async_http(&self) -> Result<&reqwest::Client> {
        self.async_http
            .get_or_try_init(|| async {
                let client = self.build_async_http();
                debug!("Created async HTTP client with connection pooling");
                client
            })
            .await
    }

    /// Shared first step of both call forms: consult the cache, or build the request.
    fn prepare<'a>(
        &'a self,
        history: &[Message],
        prompt: &str,
        use_cache: bool,
        sink: &mut dyn ReplySink,
    ) -> Prepared<'a> {
        let key = if use_cache {
            let key = compute_key(history, prompt, &self.config.model);
            if let Some(entry) = self.cache.get(&key) {
                sink.cache_hit();
                sink.emit(&entry.response);
                sink.finish();
                return Prepared::Cached(ChatReply {
                    reply: entry.response,
                    usage: entry.usage,
                    cached: true,
                });
            }
            Some(key)
        } else {
            None
        };

        Prepared::Live {
            key,
            request: ChatRequest::streaming(&self.config.model, history, prompt),
        }
    }

    /// Shared last step of both call forms: write back and build the reply.
    fn finalize(
        &self,
        key: Option<String>,
        accumulator: ReplyAccumulator,
        sink: &mut dyn ReplySink,
    ) -> ChatReply {
        sink.finish();

        let (reply, usage) = accumulator.into_parts();
        if let Some(key) = key {
            if !reply.is_empty() {
                self.cache.put(&key, &reply, usage);
            }
        }

        ChatReply {
            reply,
            usage,
            cached: false,
        }
    }

    /// Send a prompt and block until the whole reply has streamed in.
    ///
    /// Network failures are logged and degrade to whatever reply had
    /// accumulated. Only an interrupt is returned as an error.
    pub fn send_blocking(
        &self,
        history: &[Message],
        prompt: &str,
        use_cache: bool,
        sink: &mut dyn ReplySink,
    ) -> Result<ChatReply> {
        let (key, request) = match self.prepare(history, prompt, use_cache, sink) {
            Prepared::Cached(reply) => return Ok(reply),
            Prepared::Live { key, request } => (key, request),
        };

        self.check_interrupt()?;
        let http = self.blocking_http()?;
        let mut accumulator = ReplyAccumulator::new();

        debug!("Starting blocking SSE stream to: {}", self.config.url);

        let sent = http
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send();

        match sent {
            Ok(response) if !response.status().is_success() => {
                let status = response.status();
                let body = response.text().unwrap_or_default();
                warn!("API error: HTTP {} - {}", status, sanitize(&body));
            }
            Ok(response) => self.read_blocking_stream(response, &mut accumulator, sink)?,
            Err(e) => warn!("API request failed: {}", e),
        }

        Ok(self.finalize(key, accumulator, sink))
    }

    /// Feed the body of a blocking response into `accumulator`.
    ///
    /// Lines are read on a helper thread so the interrupt flag stays observed
    /// while the server is silent. After an interrupt the helper is left to
    /// finish on its own; it exits once the connection ends.
    fn read_blocking_stream(
        &self,
        response: reqwest::blocking::Response,
        accumulator: &mut ReplyAccumulator,
        sink: &mut dyn ReplySink,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("sse-reader".to_string())
            .spawn(move || {
                for line in streaming::blocking_lines(BufReader::new(response)) {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            })
            .map_err(|e| ChatError::Internal(format!("Failed to start stream reader: {}", e)))?;

        loop {
            self.check_interrupt()?;
            match rx.recv_timeout(INTERRUPT_POLL) {
                Ok(Ok(line)) => {
                    if accumulator.feed_line(&line, sink) == LineOutcome::Done {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    warn!("Stream read failed: {}", e);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(())
    }

    /// Send a prompt, yielding to the scheduler while waiting for each line.
    ///
    /// Same contract as [`ChatClient::send_blocking`].
    pub async fn send(
        &self,
        history: &[Message],
        prompt: &str,
        use_cache: bool,
        sink: &mut dyn ReplySink,
    ) -> Result<ChatReply> {
        let (key, request) = match self.prepare(history, prompt, use_cache, sink) {
            Prepared::Cached(reply) => return Ok(reply),
            Prepared::Live { key, request } => (key, request),
        };

        self.check_interrupt()?;
        let http = self.async_http().await?;
        let mut accumulator = ReplyAccumulator::new();

        debug!("Starting SSE stream to: {}", self.config.url);

        let sent = http
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await;

        match sent {
            Ok(response) if !response.status().is_success() => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("API error: HTTP {} - {}", status, sanitize(&body));
            }
            Ok(response) => {
                let lines = streaming::sse_lines(response.bytes_stream());
                futures::pin_mut!(lines);

                while let Some(line) = lines.next().await {
                    self.check_interrupt()?;
                    match line {
                        Ok(line) => {
                            if accumulator.feed_line(&line, sink) == LineOutcome::Done {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Stream read failed: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("API request failed: {}", e),
        }

        Ok(self.finalize(key, accumulator, sink))
    }

    /// Release both connection pools.
    pub fn close(self) {
        let stats = self.cache.stats();
        info!(
            "Closing chat client (cache hits: {}, misses: {}, writes: {})",
            stats.hits, stats.misses, stats.writes
        );
        drop(self.blocking_http);
        drop(self.async_http);
    }
}
