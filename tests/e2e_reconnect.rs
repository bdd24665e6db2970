//! E4: reconnect policy under repeated connection failures.

#[path = "support/mod.rs"]
mod support;

use sse_event_transport::config::{ConnectionConfig, HeartbeatConfig, ReconnectConfig};
use sse_event_transport::{Connection, ConnectionError, ConnectionState, Counters};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn reconnect_retries_then_gives_up_after_max_attempts() {
    let server = support::spawn_drop_on_connect().await;

    let conn_cfg = ConnectionConfig {
        base_url: server.base_url(),
        connect_timeout: Duration::from_millis(300),
        read_timeout: Duration::ZERO,
        ..Default::default()
    };
    let reconnect_cfg = ReconnectConfig {
        enabled: true,
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
        ..Default::default()
    };
    let heartbeat_cfg = HeartbeatConfig {
        enabled: false,
        ..Default::default()
    };
    let counters = Counters::new();

    let conn = Arc::new(
        Connection::new(conn_cfg, reconnect_cfg, heartbeat_cfg, counters.clone()).unwrap(),
    );

    let mut states = conn.subscribe_state();
    let mut errors = conn.errors().await.expect("error channel not yet taken");
    conn.connect().await.expect("first connect succeeds");

    // The server drops every connection right after the handshake, so the
    // client exhausts its reconnect budget and lands on Error — Closed is
    // reserved for an explicit `close()`, not for giving up on reconnects.
    let reached_error = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *states.borrow() == ConnectionState::Error {
                return;
            }
            states.changed().await.unwrap();
        }
    })
    .await;

    assert!(reached_error.is_ok(), "connection never reached Error after exhausting reconnects");
    assert_eq!(conn.state(), ConnectionState::Error);
    assert_eq!(counters.snapshot().reconnect_attempts, 3);

    let published = errors.recv().await.expect("reconnect exhaustion publishes an error");
    assert!(matches!(published, ConnectionError::ReconnectExhausted { attempts: 3 }));

    conn.close().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
}
