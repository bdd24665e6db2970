//! Transport façade: wires the stream pipeline, connection pool, and
//! security middleware together into `send`/`send_batch`/`receive`/
//! `ping`/`close`/`reset` (§4.4).
//!
//! Request building (header injection loop, status-code `match`) is
//! grounded on the teacher's `stream.rs`/`client.rs` style.

pub mod backpressure;

use crate::codec::{self, DecodedFrame};
use crate::config::Config;
use crate::connection::ConnectionState;
use crate::error::{ConnectionError, MiddlewareError, PipelineError, TransportError};
use crate::event::Event;
use crate::middleware::{MiddlewareRequest, SecurityMiddleware};
use crate::monitoring::Counters;
use crate::pipeline::{self, StreamPipeline};
use crate::pool::ConnectionPool;
use crate::types::InboundEvent;
use backpressure::{BackpressureMonitor, DropOutcome};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The public entry point: send application events out, receive inbound
/// server-pushed events, and manage the connection lifecycle.
pub struct Transport {
    config: Config,
    pipeline: Arc<StreamPipeline>,
    pool: Arc<ConnectionPool>,
    http: reqwest::Client,
    middleware: Option<Arc<dyn SecurityMiddleware>>,
    backpressure: Arc<BackpressureMonitor>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    forward_task: AsyncMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Transport {
    pub fn new(config: Config) -> Result<Arc<Self>, TransportError> {
        Self::with_middleware(config, None)
    }

    pub fn with_middleware(
        config: Config,
        middleware: Option<Arc<dyn SecurityMiddleware>>,
    ) -> Result<Arc<Self>, TransportError> {
        let counters = Counters::new();

        let pipeline = Arc::new(StreamPipeline::new(config.stream.clone(), counters.clone()));
        let pool = Arc::new(ConnectionPool::with_middleware(
            config.connection.clone(),
            config.reconnect.clone(),
            config.heartbeat.clone(),
            config.pool.clone(),
            counters.clone(),
            middleware.clone(),
        ));

        let http = reqwest::Client::builder()
            .connect_timeout(config.connection.connect_timeout)
            .timeout(config.connection.write_timeout)
            .user_agent(config.connection.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let backpressure = Arc::new(BackpressureMonitor::new(config.backpressure.clone()));

        Ok(Arc::new(Self {
            config,
            pipeline,
            pool,
            http,
            middleware,
            backpressure,
            counters,
            cancel: CancellationToken::new(),
            forward_task: AsyncMutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    /// Start the pipeline, the connection pool, and the chunk-forwarding
    /// loop that POSTs emitted chunks upstream.
    pub async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        self.pipeline.start().await?;
        self.pool.start().await?;

        let mut chunks = self
            .pipeline
            .receive_chunks()
            .await
            .ok_or(TransportError::Closed)?;

        let this = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                let body = codec::encode(&chunk);
                let url = format!("{}/events", this.config.connection.base_url.trim_end_matches('/'));
                let mut req = this
                    .http
                    .post(&url)
                    .header("content-type", "text/event-stream");
                if let Some(mw) = &this.middleware {
                    let mut headers = http::HeaderMap::new();
                    mw.apply_auth_headers(
                        &mut headers,
                        &MiddlewareRequest {
                            method: "POST".to_string(),
                            path: "/events".to_string(),
                            headers: http::HeaderMap::new(),
                        },
                    );
                    for (key, value) in headers.iter() {
                        req = req.header(key, value);
                    }
                }
                match req.body(body).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    _ => {
                        if let DropOutcome::ShouldStop = this.backpressure.record_drop() {
                            #[cfg(feature = "tracing")]
                            tracing::error!("backpressure Stop policy triggered, closing transport");
                            // `close()` joins this very task's `JoinHandle` —
                            // run it from a detached task so it isn't
                            // waiting on itself to return.
                            let this = this.clone();
                            tokio::spawn(async move {
                                let _ = this.close().await;
                            });
                            break;
                        }
                    }
                }
            }
        });
        *self.forward_task.lock().await = Some(handle);

        Ok(())
    }

    /// Send a single event through the pipeline, applying middleware
    /// validation first if configured.
    pub async fn send(&self, event: Arc<dyn Event>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.authorize(&MiddlewareRequest {
            method: "POST".to_string(),
            path: "/events".to_string(),
            headers: http::HeaderMap::new(),
        })
        .await?;

        self.pipeline.send_event(event).await.map_err(|e| {
            if matches!(&e, PipelineError::BackpressureTimeout(_) | PipelineError::FlowRejected(_)) {
                let _ = self.backpressure.record_drop();
            }
            TransportError::from(e)
        })
    }

    /// Send a batch of events as a single `POST {BaseURL}/events/batch`
    /// request carrying a JSON array, bypassing the per-event pipeline
    /// path. Every event is validated and serialized up front; if any
    /// fail, the whole batch is rejected with the index of each failure
    /// rather than partially posting.
    pub async fn send_batch(&self, events: Vec<Arc<dyn Event>>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if events.is_empty() {
            return Ok(());
        }

        let total = events.len();
        let mut failures = Vec::new();
        let mut bodies = Vec::with_capacity(total);

        for (idx, event) in events.iter().enumerate() {
            if let Err(e) = event.validate() {
                failures.push((idx, e.to_string()));
                continue;
            }
            match event.serialize() {
                Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(value) => bodies.push(value),
                    Err(e) => failures.push((idx, e.to_string())),
                },
                Err(e) => failures.push((idx, e.to_string())),
            }
        }

        if !failures.is_empty() {
            return Err(TransportError::BatchValidation { failures, total });
        }

        let headers = self
            .authorize(&MiddlewareRequest {
                method: "POST".to_string(),
                path: "/events/batch".to_string(),
                headers: http::HeaderMap::new(),
            })
            .await?;

        let url = format!(
            "{}/events/batch",
            self.config.connection.base_url.trim_end_matches('/')
        );
        let mut req = self.http.post(&url).json(&bodies);
        for (key, value) in headers.iter() {
            req = req.header(key, value);
        }

        let resp = req.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Streaming {
                status: resp.status().as_u16(),
                body_prefix: String::new(),
            })
        }
    }

    /// Acquire a pooled connection and drive its inbound SSE frames
    /// through decode, multi-chunk reassembly, decompression, and
    /// backpressure, handing the caller a channel of complete
    /// [`InboundEvent`]s.
    pub async fn receive(&self) -> Result<mpsc::Receiver<InboundEvent>, TransportError> {
        let conn = self.pool.acquire().await?;
        let mut frames = conn.frames().await.ok_or(TransportError::Closed)?;

        let capacity = self.config.stream.event_buffer_size.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let backpressure = self.backpressure.clone();
        let compression_type = self.config.stream.compression_type.clone();
        let timeout = self.config.stream.backpressure_timeout;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut pending: HashMap<String, PartialEvent> = HashMap::new();

            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(f) => f,
                        None => break,
                    },
                };

                let Some(decoded) = codec::decode_frame(&frame) else {
                    continue;
                };
                let Some(decoded) = reassemble(&mut pending, decoded) else {
                    continue;
                };

                let payload = if decoded.compressed {
                    match pipeline::compress::decompress(&decoded.payload, &compression_type) {
                        Ok(bytes) => bytes,
                        Err(_) => {
                            let _ = backpressure.record_drop();
                            continue;
                        }
                    }
                } else {
                    decoded.payload
                };

                let event = InboundEvent {
                    event_type: decoded.event_type,
                    event_id: decoded.event_id,
                    payload: Bytes::from(payload),
                    sequence_num: decoded.sequence_num,
                    retry_hint: decoded.retry_hint,
                };

                backpressure.observe(capacity, tx.capacity());
                if tx.send_timeout(event, timeout).await.is_err() {
                    let _ = backpressure.record_drop();
                }
            }
        });

        Ok(rx)
    }

    /// Errors from the stream pipeline's background workers (serialization
    /// failures, panics recovered mid-batch). Returns `None` once taken.
    pub async fn pipeline_errors(&self) -> Option<mpsc::Receiver<PipelineError>> {
        self.pipeline.receive_errors().await
    }

    /// Errors from a pooled connection's managed lifecycle (heartbeat
    /// failure, reconnect exhaustion). Acquires a connection the same way
    /// `receive()` does. Returns `None` once that connection's error
    /// channel has already been taken.
    pub async fn connection_errors(&self) -> Result<Option<mpsc::Receiver<ConnectionError>>, TransportError> {
        let conn = self.pool.acquire().await?;
        Ok(conn.errors().await)
    }

    /// Probe liveness via `GET {BaseURL}/{PingEndpoint}`.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let url = format!(
            "{}{}",
            self.config.connection.base_url.trim_end_matches('/'),
            self.config.heartbeat.ping_endpoint
        );
        let resp = self
            .http
            .get(&url)
            .timeout(self.config.heartbeat.timeout)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Streaming {
                status: resp.status().as_u16(),
                body_prefix: String::new(),
            })
        }
    }

    /// Validate/rate-limit/authenticate, then let the middleware attach
    /// whatever auth headers it wants onto the returned map.
    async fn authorize(&self, request: &MiddlewareRequest) -> Result<http::HeaderMap, MiddlewareError> {
        let mut headers = http::HeaderMap::new();
        let Some(mw) = &self.middleware else {
            return Ok(headers);
        };
        mw.validate_request(request).await?;
        mw.check_rate_limit(request).await?;
        mw.authenticate(request).await?;
        mw.apply_auth_headers(&mut headers, request);
        Ok(headers)
    }

    /// Tear down every pooled connection (zeroing its reconnect counter)
    /// and let the pool replenish to its minimum size, then clear
    /// backpressure bookkeeping. Fails if the transport is already closed.
    pub async fn reset(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        self.pool.reset().await?;
        self.backpressure.reset();
        Ok(())
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    pub fn backpressure(&self) -> &BackpressureMonitor {
        &self.backpressure
    }

    /// Idempotent shutdown of the forwarding task, pipeline, and pool.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        if let Some(handle) = self.forward_task.lock().await.take() {
            let _ = tokio::time::timeout(self.config.stream.drain_timeout, handle).await;
        }

        self.pipeline.close().await?;
        self.pool.close().await?;
        Ok(())
    }
}

/// Chunks collected so far for one multi-chunk event, keyed by
/// `event_id`, awaiting the rest before they can be reassembled and
/// handed to the caller.
struct PartialEvent {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    event_type: String,
    event_id: String,
    compressed: bool,
    sequence_num: u64,
    retry_hint: Option<std::time::Duration>,
}

/// Feed one decoded frame in; returns a complete `DecodedFrame` once
/// every chunk for its `event_id` has arrived (or immediately, for a
/// single-chunk frame). Out-of-order chunk arrival is tolerated — each
/// lands at its `chunk_index` slot regardless of arrival order.
fn reassemble(pending: &mut HashMap<String, PartialEvent>, frame: DecodedFrame) -> Option<DecodedFrame> {
    if frame.total_chunks <= 1 {
        return Some(frame);
    }

    let entry = pending.entry(frame.event_id.clone()).or_insert_with(|| PartialEvent {
        chunks: vec![None; frame.total_chunks as usize],
        received: 0,
        event_type: frame.event_type.clone(),
        event_id: frame.event_id.clone(),
        compressed: frame.compressed,
        sequence_num: frame.sequence_num,
        retry_hint: frame.retry_hint,
    });

    let idx = frame.chunk_index as usize;
    if idx < entry.chunks.len() && entry.chunks[idx].is_none() {
        entry.chunks[idx] = Some(frame.payload);
        entry.received += 1;
    }

    if entry.received < entry.chunks.len() {
        return None;
    }

    let partial = pending.remove(&frame.event_id)?;
    let payload = partial.chunks.into_iter().flatten().flatten().collect();
    Some(DecodedFrame {
        event_type: partial.event_type,
        event_id: partial.event_id,
        payload,
        compressed: partial.compressed,
        sequence_num: partial.sequence_num,
        chunk_index: 0,
        total_chunks: 1,
        retry_hint: partial.retry_hint,
    })
}

/// Whether every connection in the pool is currently connected. Useful
/// for readiness probes layered on top of `Transport`.
pub fn all_connected(states: &[ConnectionState]) -> bool {
    !states.is_empty() && states.iter().all(|s| *s == ConnectionState::Connected)
}

#[cfg(test)]
mod tests {
    use super::all_connected;
    use crate::connection::ConnectionState;

    #[test]
    fn all_connected_is_false_when_empty() {
        assert!(!all_connected(&[]));
    }

    #[test]
    fn all_connected_requires_every_state_connected() {
        assert!(all_connected(&[ConnectionState::Connected, ConnectionState::Connected]));
        assert!(!all_connected(&[ConnectionState::Connected, ConnectionState::Error]));
    }
}
