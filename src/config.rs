//! Configuration tree (§6).
//!
//! Mirrors the teacher's `ClientBuilder` idiom — an explicit record built
//! by a fluent builder — rather than a "named parameters" style. The
//! record is immutable once handed to `StreamPipeline::start` /
//! `Transport::new`.

use std::time::Duration;

/// Top-level configuration for a transport instance.
#[derive(Clone, Debug)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub tls: TlsConfig,
    pub http_client: HttpClientConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub stream: StreamConfig,
    pub backpressure: BackpressureConfig,
    pub pool: ConnectionPoolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            tls: TlsConfig::default(),
            http_client: HttpClientConfig::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            stream: StreamConfig::default(),
            backpressure: BackpressureConfig::default(),
            pool: ConnectionPoolConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `SSE_TRANSPORT_*` environment variables,
    /// falling back to defaults (with a warning) on unparsable values.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_duration_ms("SSE_TRANSPORT_CONNECT_TIMEOUT_MS") {
            cfg.connection.connect_timeout = v;
        }
        if let Some(v) = env_duration_ms("SSE_TRANSPORT_READ_TIMEOUT_MS") {
            cfg.connection.read_timeout = v;
        }
        if let Some(v) = env_duration_ms("SSE_TRANSPORT_WRITE_TIMEOUT_MS") {
            cfg.connection.write_timeout = v;
        }
        if let Some(v) = env_bool("SSE_TRANSPORT_RECONNECT_ENABLED") {
            cfg.reconnect.enabled = v;
        }
        if let Some(v) = env_u32("SSE_TRANSPORT_RECONNECT_MAX_ATTEMPTS") {
            cfg.reconnect.max_attempts = v;
        }
        if let Some(v) = env_duration_ms("SSE_TRANSPORT_RECONNECT_INITIAL_DELAY_MS") {
            cfg.reconnect.initial_delay = v;
        }
        if let Some(v) = env_duration_ms("SSE_TRANSPORT_RECONNECT_MAX_DELAY_MS") {
            cfg.reconnect.max_delay = v;
        }
        if let Some(v) = env_f64("SSE_TRANSPORT_RECONNECT_BACKOFF_MULTIPLIER") {
            cfg.reconnect.backoff_multiplier = v;
        }
        if let Some(v) = env_f64("SSE_TRANSPORT_RECONNECT_JITTER_FACTOR") {
            cfg.reconnect.jitter_factor = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_bool("SSE_TRANSPORT_HEARTBEAT_ENABLED") {
            cfg.heartbeat.enabled = v;
        }
        if let Some(v) = env_duration_ms("SSE_TRANSPORT_HEARTBEAT_INTERVAL_MS") {
            cfg.heartbeat.interval = v;
        }
        if let Some(v) = env_u32("SSE_TRANSPORT_HEARTBEAT_MAX_MISSED") {
            cfg.heartbeat.max_missed = v;
        }
        if let Some(v) = env_usize("SSE_TRANSPORT_WORKER_COUNT") {
            cfg.stream.worker_count = v;
        }
        if let Some(v) = env_bool("SSE_TRANSPORT_BATCH_ENABLED") {
            cfg.stream.batch_enabled = v;
        }
        if let Some(v) = env_bool("SSE_TRANSPORT_COMPRESSION_ENABLED") {
            cfg.stream.compression_enabled = v;
        }
        if let Some(v) = env_usize("SSE_TRANSPORT_POOL_MIN_SIZE") {
            cfg.pool.min_size = v;
        }
        if let Some(v) = env_usize("SSE_TRANSPORT_POOL_MAX_SIZE") {
            cfg.pool.max_size = v;
        }

        cfg
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    match env_str(key)?.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            log_bad_env(key, other);
            None
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| {
        s.parse().ok().or_else(|| {
            log_bad_env(key, &s);
            None
        })
    })
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| {
        s.parse().ok().or_else(|| {
            log_bad_env(key, &s);
            None
        })
    })
}

fn env_f64(key: &str) -> Option<f64> {
    env_str(key).and_then(|s| {
        s.parse().ok().or_else(|| {
            log_bad_env(key, &s);
            None
        })
    })
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    env_u32(key).map(|ms| Duration::from_millis(ms as u64))
}

fn log_bad_env(key: &str, value: &str) {
    #[cfg(feature = "tracing")]
    tracing::warn!(key, value, "unparsable environment override, using default");
    #[cfg(not(feature = "tracing"))]
    let _ = (key, value);
}

/// HTTP/TLS connection settings (§6).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub stream_endpoint: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            stream_endpoint: "/events/stream".to_string(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(30),
            user_agent: concat!("sse-event-transport/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: Vec::new(),
            max_idle_conns_per_host: 10,
            idle_conn_timeout: Duration::from_secs(90),
        }
    }
}

/// TLS settings for the underlying HTTP client (§6 `TLSConfig`). Config
/// surface only — `reqwest`'s `rustls`/`native-tls` backend picks these up
/// at `Client::builder()` time via its own `ClientBuilder` methods; this
/// struct just gives callers a typed place to set them.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub insecure_skip_verify: bool,
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub min_version: TlsVersion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TlsVersion {
    Tls12,
    #[default]
    Tls13,
}

/// Shared HTTP client tuning, distinct from per-connection timeouts in
/// [`ConnectionConfig`] (§6 `HTTPClientConfig`).
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub disable_keep_alives: bool,
    pub proxy_url: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            idle_conn_timeout: Duration::from_secs(90),
            disable_keep_alives: false,
            proxy_url: None,
        }
    }
}

/// Reconnect policy (§4.2, §6).
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// 0 means unlimited.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// In `[0, 1]`.
    pub jitter_factor: f64,
    pub reset_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            reset_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Heartbeat probe settings (§4.2, §6).
#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_missed: u32,
    pub ping_endpoint: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(15),
            max_missed: 5,
            ping_endpoint: "/ping".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompressionType {
    Gzip,
    Deflate,
    None,
}

/// Stream pipeline tuning (§4.1, §6).
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub event_buffer_size: usize,
    pub chunk_buffer_size: usize,
    pub max_chunk_size: usize,
    pub flush_interval: Duration,
    pub batch_enabled: bool,
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_batch_size: usize,
    pub compression_enabled: bool,
    pub compression_type: CompressionType,
    pub compression_level: u32,
    pub min_compression_size: usize,
    pub max_concurrent_events: usize,
    pub backpressure_timeout: Duration,
    pub drain_timeout: Duration,
    pub sequence_enabled: bool,
    pub ordering_required: bool,
    pub out_of_order_buffer: usize,
    pub out_of_order_timeout: Duration,
    pub worker_count: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
            chunk_buffer_size: 1024,
            max_chunk_size: 64 * 1024,
            flush_interval: Duration::from_millis(100),
            batch_enabled: false,
            batch_size: 50,
            batch_timeout: Duration::from_millis(200),
            max_batch_size: 500,
            compression_enabled: false,
            compression_type: CompressionType::Gzip,
            compression_level: 6,
            min_compression_size: 1024,
            max_concurrent_events: 256,
            backpressure_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            sequence_enabled: false,
            ordering_required: false,
            out_of_order_buffer: 1024,
            out_of_order_timeout: Duration::from_secs(30),
            worker_count: default_worker_count(),
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropActionType {
    Log,
    Reconnect,
    Stop,
}

/// Connection pool bounds (ambient, §6 `ConnectionPoolConfig`).
#[derive(Clone, Debug)]
pub struct ConnectionPoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 4,
            idle_timeout: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Backpressure drop policy, symmetric for events and errors (§4.4, §6).
#[derive(Clone, Debug)]
pub struct BackpressureConfig {
    pub threshold_percent: u8,
    pub max_dropped_events: u64,
    pub drop_action: DropActionType,
    pub enable_logging: bool,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 80,
            max_dropped_events: 100,
            drop_action: DropActionType::Log,
            enable_logging: true,
        }
    }
}
