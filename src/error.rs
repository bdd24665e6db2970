//! Error types for the event transport.
//!
//! Each subsystem gets its own enum. Callers of `send_event`/`send`/
//! `send_batch`/`ping`/`connect` see the kind of error relevant to that
//! call; background loops (read loop, heartbeat, workers) publish onto a
//! bounded error channel instead of returning a `Result` nobody awaits.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the stream pipeline (`start`/`send_event`/`close`).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid event: {0}")]
    Validation(String),

    #[error("pipeline is closed")]
    Closed,

    #[error("pipeline has not been started")]
    NotStarted,

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("flow controller rejected event after {0:?}")]
    FlowRejected(Duration),

    #[error("backpressure timeout enqueuing event after {0:?}")]
    BackpressureTimeout(Duration),

    #[error("stream processing error: {0}")]
    Streaming(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Errors raised by a single managed connection.
#[derive(Debug, Error, Clone)]
pub enum ConnectionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {status} {content_type}")]
    Protocol { status: u16, content_type: String },

    #[error("operation timed out")]
    Timeout,

    #[error("heartbeat failed after {missed} missed pings")]
    HeartbeatFailed { missed: u32 },

    #[error("connection is closed")]
    Closed,

    #[error("reconnect attempts exhausted ({attempts})")]
    ReconnectExhausted { attempts: u32 },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ConnectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectionError::Timeout
        } else {
            ConnectionError::Network(err.to_string())
        }
    }
}

/// Errors raised by the connection pool.
#[derive(Debug, Error, Clone)]
pub enum PoolError {
    #[error("no healthy connection and pool is at capacity ({max})")]
    PoolExhausted { max: usize },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Errors raised by the transport facade.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error("stream error: {status} - {body_prefix}")]
    Streaming { status: u16, body_prefix: String },

    #[error("request error: {0}")]
    Request(String),

    #[error("{} of {total} events in batch failed validation", failures.len())]
    BatchValidation {
        failures: Vec<(usize, String)>,
        total: usize,
    },

    #[error("reset failed: transport already closed")]
    AlreadyClosed,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(ConnectionError::from(err).to_string())
    }
}

/// Errors raised by the security middleware boundary (§4.6).
#[derive(Debug, Error, Clone)]
pub enum MiddlewareError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("too many requests")]
    RateLimited { retry_after: Option<Duration> },

    #[error("bad request: {0}")]
    BadRequest(String),
}
