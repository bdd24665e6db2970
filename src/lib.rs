//! A bidirectional SSE event transport.
//!
//! A managed HTTP/SSE connection (reconnect, heartbeat, pooling) feeds a
//! multi-stage stream pipeline (flow control, sequencing, batching,
//! compression, chunking) behind a single backpressure-aware facade.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sse_event_transport::{Config, Transport};
//! use sse_event_transport::event::RawEvent;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::new();
//!     config.connection.base_url = "https://api.example.com".to_string();
//!
//!     let transport = Transport::new(config)?;
//!     transport.start().await?;
//!
//!     transport
//!         .send(Arc::new(RawEvent::new(serde_json::json!({"hello": "world"}))))
//!         .await?;
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod middleware;
pub mod monitoring;
pub mod pipeline;
pub mod pool;
pub mod transport;
pub mod types;

pub use config::Config;
pub use connection::{Connection, ConnectionState};
pub use error::{ConnectionError, MiddlewareError, PipelineError, PoolError, TransportError};
pub use event::{CustomEvent, Event, RawEvent};
pub use middleware::{AllowAllMiddleware, MiddlewareRequest, Principal, SecurityMiddleware};
pub use monitoring::{AlertGate, Counters, CountersSnapshot, LatencySink, NoopLatencySink};
pub use pipeline::StreamPipeline;
pub use pool::ConnectionPool;
pub use transport::Transport;
pub use types::{EventBatch, InboundEvent, SequencedEvent, StreamChunk};
