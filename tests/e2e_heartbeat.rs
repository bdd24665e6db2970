//! E5: the independent heartbeat ticker trips after `MaxMissed` consecutive
//! failed pings, even while the SSE stream itself is still open and silent.

#[path = "support/mod.rs"]
mod support;

use sse_event_transport::config::{ConnectionConfig, HeartbeatConfig, ReconnectConfig};
use sse_event_transport::{Connection, ConnectionError, ConnectionState, Counters};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn failing_ping_endpoint_trips_heartbeat_after_max_missed() {
    let server = support::spawn_sse_with_failing_ping().await;

    let conn_cfg = ConnectionConfig {
        base_url: server.base_url(),
        connect_timeout: Duration::from_millis(300),
        read_timeout: Duration::ZERO,
        ..Default::default()
    };
    // Reconnect disabled so the state machine settles at Error right after
    // the heartbeat failure forces the read loop to give up, instead of
    // cycling through more reconnect attempts (whose `GET /events/stream`
    // would succeed again here, muddying the assertion).
    let reconnect_cfg = ReconnectConfig {
        enabled: false,
        ..Default::default()
    };
    let heartbeat_cfg = HeartbeatConfig {
        enabled: true,
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(100),
        max_missed: 3,
        ping_endpoint: "/ping".to_string(),
    };
    let counters = Counters::new();

    let conn = Arc::new(
        Connection::new(conn_cfg, reconnect_cfg, heartbeat_cfg, counters.clone()).unwrap(),
    );

    let mut states = conn.subscribe_state();
    let mut errors = conn.errors().await.expect("error channel not yet taken");
    conn.connect().await.expect("first connect succeeds");

    let tripped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if matches!(*states.borrow(), ConnectionState::Error | ConnectionState::Closed) {
                return;
            }
            states.changed().await.unwrap();
        }
    })
    .await;

    assert!(tripped.is_ok(), "connection never left Connected after the ping endpoint started failing");
    assert!(counters.snapshot().heartbeat_misses >= 3);

    let mut saw_heartbeat_failed = false;
    while let Ok(Some(err)) = tokio::time::timeout(Duration::from_secs(1), errors.recv()).await {
        if matches!(err, ConnectionError::HeartbeatFailed { missed } if missed >= 3) {
            saw_heartbeat_failed = true;
            break;
        }
    }
    assert!(saw_heartbeat_failed, "heartbeat failure was never published on the error channel");

    conn.close().await.unwrap();
}
