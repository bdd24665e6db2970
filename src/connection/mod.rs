//! A single managed SSE connection: connect/read/reconnect/heartbeat/close
//! (§4.2).
//!
//! State-machine shape and idempotent `close()` via compare-exchange are
//! grounded on the teacher's `Client`/`ChunkIterator` pairing (`client.rs`,
//! `iterator.rs`) — a cloneable HTTP client plus a stateful reader that owns
//! the live `reqwest::Response` and re-establishes it on EOF. The read loop
//! itself (`resp.chunk().await` into a line buffer) is the same shape as
//! `iterator.rs::next_sse_chunk`, here driving [`crate::codec::SseFrameParser`]
//! instead of the teacher's inline `control`/data split.

pub mod retry;

use crate::codec::{self, RawSseFrame};
use crate::config::{ConnectionConfig, HeartbeatConfig, ReconnectConfig};
use crate::error::ConnectionError;
use crate::middleware::{MiddlewareRequest, SecurityMiddleware};
use crate::monitoring::Counters;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Error,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Error => 4,
            ConnectionState::Closed => 5,
        }
    }
}

/// A single HTTP/SSE connection with its own reconnect and heartbeat
/// policy. Owns the background read task once `connect()` succeeds.
pub struct Connection {
    http: reqwest::Client,
    conn_cfg: ConnectionConfig,
    reconnect_cfg: ReconnectConfig,
    heartbeat_cfg: HeartbeatConfig,
    middleware: Option<Arc<dyn SecurityMiddleware>>,
    counters: Arc<Counters>,
    state: Arc<AtomicU8>,
    state_tx: watch::Sender<ConnectionState>,
    frame_tx: AsyncMutex<Option<mpsc::Sender<RawSseFrame>>>,
    frame_rx: AsyncMutex<Option<mpsc::Receiver<RawSseFrame>>>,
    error_tx: AsyncMutex<Option<mpsc::Sender<ConnectionError>>>,
    error_rx: AsyncMutex<Option<mpsc::Receiver<ConnectionError>>>,
    reconnect_attempts: Arc<AtomicU32>,
    heartbeat_failed: Arc<AtomicBool>,
    cancel: CancellationToken,
    closed: AtomicBool,
    task: AsyncMutex<Option<JoinHandle<()>>>,
    heartbeat_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(
        conn_cfg: ConnectionConfig,
        reconnect_cfg: ReconnectConfig,
        heartbeat_cfg: HeartbeatConfig,
        counters: Arc<Counters>,
    ) -> Result<Self, ConnectionError> {
        Self::with_middleware(conn_cfg, reconnect_cfg, heartbeat_cfg, counters, None)
    }

    pub fn with_middleware(
        conn_cfg: ConnectionConfig,
        reconnect_cfg: ReconnectConfig,
        heartbeat_cfg: HeartbeatConfig,
        counters: Arc<Counters>,
        middleware: Option<Arc<dyn SecurityMiddleware>>,
    ) -> Result<Self, ConnectionError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(conn_cfg.max_idle_conns_per_host)
            .pool_idle_timeout(conn_cfg.idle_conn_timeout)
            .connect_timeout(conn_cfg.connect_timeout)
            .user_agent(conn_cfg.user_agent.clone());

        if !conn_cfg.read_timeout.is_zero() {
            builder = builder.timeout(conn_cfg.read_timeout);
        }

        let http = builder
            .build()
            .map_err(|e| ConnectionError::Network(e.to_string()))?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (frame_tx, frame_rx) = mpsc::channel(1024);
        let (error_tx, error_rx) = mpsc::channel(64);

        Ok(Self {
            http,
            conn_cfg,
            reconnect_cfg,
            heartbeat_cfg,
            middleware,
            counters,
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected.as_u8())),
            state_tx,
            frame_tx: AsyncMutex::new(Some(frame_tx)),
            frame_rx: AsyncMutex::new(Some(frame_rx)),
            error_tx: AsyncMutex::new(Some(error_tx)),
            error_rx: AsyncMutex::new(Some(error_rx)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            heartbeat_failed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            task: AsyncMutex::new(None),
            heartbeat_task: AsyncMutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The underlying HTTP client, for callers (e.g. `Transport`) that
    /// need to issue request/response calls alongside this connection's
    /// managed SSE stream.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.conn_cfg.base_url
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Take the frame channel. Returns `None` if already taken.
    pub async fn frames(&self) -> Option<mpsc::Receiver<RawSseFrame>> {
        self.frame_rx.lock().await.take()
    }

    /// Take the error channel (heartbeat failures, disconnects, reconnect
    /// exhaustion). Returns `None` if already taken.
    pub async fn errors(&self) -> Option<mpsc::Receiver<ConnectionError>> {
        self.error_rx.lock().await.take()
    }

    async fn publish_error(&self, err: ConnectionError) {
        if let Some(tx) = self.error_tx.lock().await.as_ref() {
            let _ = tx.try_send(err);
        }
    }

    fn set_state(&self, s: ConnectionState) {
        self.state.store(s.as_u8(), Ordering::Release);
        let _ = self.state_tx.send(s);
    }

    fn stream_url(&self) -> String {
        format!(
            "{}{}",
            self.conn_cfg.base_url.trim_end_matches('/'),
            self.conn_cfg.stream_endpoint
        )
    }

    fn ping_url(&self) -> String {
        format!(
            "{}{}",
            self.conn_cfg.base_url.trim_end_matches('/'),
            self.heartbeat_cfg.ping_endpoint
        )
    }

    /// Zero the reconnect-attempt counter, used by `Transport::reset()`.
    pub fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Perform the first connect attempt inline; on success spawn the
    /// background read/reconnect/heartbeat loop. Fails fast if the very
    /// first attempt is rejected — the caller decides whether to retry.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }

        self.set_state(ConnectionState::Connecting);
        let response = self.open_stream().await?;
        self.set_state(ConnectionState::Connected);

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run(response).await });
        *self.task.lock().await = Some(handle);

        if self.heartbeat_cfg.enabled {
            let this = self.clone();
            let handle = tokio::spawn(async move { this.heartbeat_loop().await });
            *self.heartbeat_task.lock().await = Some(handle);
        }

        Ok(())
    }

    /// Authorize an outbound request against the configured middleware
    /// (validate → rate-limit → authenticate), then let it attach any
    /// auth headers it wants onto `headers`.
    async fn authorize(
        &self,
        request: &MiddlewareRequest,
        headers: &mut http::HeaderMap,
    ) -> Result<(), ConnectionError> {
        let Some(mw) = &self.middleware else {
            return Ok(());
        };
        mw.validate_request(request)
            .await
            .map_err(|e| ConnectionError::Network(e.to_string()))?;
        mw.check_rate_limit(request)
            .await
            .map_err(|e| ConnectionError::Network(e.to_string()))?;
        mw.authenticate(request)
            .await
            .map_err(|e| ConnectionError::Network(e.to_string()))?;
        mw.apply_auth_headers(headers, request);
        Ok(())
    }

    async fn open_stream(&self) -> Result<reqwest::Response, ConnectionError> {
        let url = self.stream_url();
        let mw_request = MiddlewareRequest {
            method: "GET".to_string(),
            path: self.conn_cfg.stream_endpoint.clone(),
            headers: http::HeaderMap::new(),
        };
        let mut auth_headers = http::HeaderMap::new();
        self.authorize(&mw_request, &mut auth_headers).await?;

        let mut req = self
            .http
            .get(&url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .timeout(self.conn_cfg.connect_timeout);

        for (key, value) in &self.conn_cfg.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        for (key, value) in auth_headers.iter() {
            req = req.header(key, value);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(ConnectionError::Protocol {
                status,
                content_type: resp
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("text/event-stream") {
            return Err(ConnectionError::Protocol { status, content_type });
        }

        Ok(resp)
    }

    /// Owns the connection for as long as it stays open: reads bytes,
    /// parses frames, watches heartbeats, and reconnects with backoff on
    /// failure until the reconnect policy is exhausted or `close()` runs.
    async fn run(self: Arc<Self>, first_response: reqwest::Response) {
        let mut response = Some(first_response);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let resp = match response.take() {
                Some(r) => r,
                None => {
                    self.set_state(ConnectionState::Reconnecting);
                    match self.reconnect_with_backoff().await {
                        Some(r) => r,
                        None => {
                            let attempts = self.reconnect_attempts.load(Ordering::Relaxed);
                            self.set_state(ConnectionState::Error);
                            self.publish_error(ConnectionError::ReconnectExhausted { attempts })
                                .await;
                            break;
                        }
                    }
                }
            };

            self.reconnect_attempts.store(0, Ordering::Relaxed);
            self.heartbeat_failed.store(false, Ordering::Relaxed);
            self.set_state(ConnectionState::Connected);
            match self.read_until_disconnect(resp).await {
                ReadOutcome::Cancelled => break,
                ReadOutcome::Disconnected => {
                    self.set_state(ConnectionState::Error);
                }
                ReadOutcome::HeartbeatFailed => {
                    self.set_state(ConnectionState::Error);
                }
            }
        }
    }

    async fn reconnect_with_backoff(&self) -> Option<reqwest::Response> {
        loop {
            let attempt = self.reconnect_attempts.load(Ordering::Relaxed);
            if self.cancel.is_cancelled() || !retry::should_retry(&self.reconnect_cfg, attempt) {
                return None;
            }

            let attempt = self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.counters.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            let delay = retry::backoff_delay(&self.reconnect_cfg, attempt);

            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open_stream().await {
                Ok(resp) => return Some(resp),
                Err(_) => continue,
            }
        }
    }

    /// Reads SSE bytes off the wire until EOF, a transport error, a
    /// heartbeat failure signalled by [`Self::heartbeat_loop`], or
    /// cancellation. Liveness is no longer inferred from stream silence —
    /// `heartbeat_failed` is the single source of truth, set by the
    /// independent ping ticker running alongside this loop.
    async fn read_until_disconnect(&self, response: reqwest::Response) -> ReadOutcome {
        let mut byte_stream = response.bytes_stream();
        let mut parser = codec::SseFrameParser::new();
        let mut line_buffer = String::new();

        let tx = {
            let guard = self.frame_tx.lock().await;
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return ReadOutcome::Cancelled,
            }
        };

        let mut heartbeat_poll = tokio::time::interval(Duration::from_millis(50));

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ReadOutcome::Cancelled,
                _ = heartbeat_poll.tick(), if self.heartbeat_cfg.enabled => {
                    if self.heartbeat_failed.swap(false, Ordering::Relaxed) {
                        return ReadOutcome::HeartbeatFailed;
                    }
                }
                next = byte_stream.next() => {
                    match next {
                        Some(Ok(bytes)) => {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            let frames = codec::feed_bytes(&mut parser, &mut line_buffer, &text);
                            for frame in frames {
                                if tx.send(frame).await.is_err() {
                                    return ReadOutcome::Cancelled;
                                }
                            }
                        }
                        Some(Err(_)) | None => return ReadOutcome::Disconnected,
                    }
                }
            }
        }
    }

    /// Independent liveness ticker: issues a `GET` against the ping
    /// endpoint on its own schedule, unrelated to whatever the SSE stream
    /// is or isn't sending. Sets `heartbeat_failed` (read loop reacts by
    /// forcing a reconnect) and publishes a `HeartbeatFailed` error the
    /// first tick `max_missed` is reached, not on every subsequent tick
    /// while still down.
    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.heartbeat_cfg.interval.max(Duration::from_millis(10)));
        let mut missed: u32 = 0;
        let mut failure_announced = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if self.closed.load(Ordering::Acquire) {
                return;
            }

            let url = self.ping_url();
            let result = self
                .http
                .get(&url)
                .timeout(self.heartbeat_cfg.timeout)
                .send()
                .await;

            let ok = matches!(&result, Ok(resp) if resp.status().is_success());
            if ok {
                missed = 0;
                failure_announced = false;
                continue;
            }

            missed += 1;
            self.counters.heartbeat_misses.fetch_add(1, Ordering::Relaxed);
            if missed >= self.heartbeat_cfg.max_missed {
                self.heartbeat_failed.store(true, Ordering::Relaxed);
                if !failure_announced {
                    failure_announced = true;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(missed, "heartbeat failed, forcing reconnect");
                    self.publish_error(ConnectionError::HeartbeatFailed { missed }).await;
                }
            }
        }
    }

    /// Idempotent close: cancels the read and heartbeat loops, drops the
    /// frame/error senders so pending readers observe end-of-stream, and
    /// awaits task shutdown.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        self.frame_tx.lock().await.take();
        self.error_tx.lock().await.take();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            let _ = handle.await;
        }
        self.set_state(ConnectionState::Closed);
        Ok(())
    }
}

enum ReadOutcome {
    Cancelled,
    Disconnected,
    HeartbeatFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for s in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Error,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(s.as_u8()), s);
        }
    }

    #[tokio::test]
    async fn close_before_connect_is_idempotent() {
        let conn = Connection::new(
            ConnectionConfig {
                base_url: "http://127.0.0.1:0".to_string(),
                ..Default::default()
            },
            ReconnectConfig::default(),
            HeartbeatConfig::default(),
            Counters::new(),
        )
        .unwrap();

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_fails() {
        let conn = Connection::new(
            ConnectionConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                connect_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            ReconnectConfig::default(),
            HeartbeatConfig::default(),
            Counters::new(),
        )
        .unwrap();
        let conn = Arc::new(conn);

        let result = conn.connect().await;
        assert!(result.is_err());
    }
}
