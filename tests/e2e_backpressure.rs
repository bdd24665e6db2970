//! E6: the `Stop` backpressure action closes the transport once
//! `MaxDroppedEvents` emitted chunks have failed to reach upstream.

#[path = "support/mod.rs"]
mod support;

use sse_event_transport::config::DropActionType;
use sse_event_transport::{Config, RawEvent, Transport};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn repeated_upstream_failures_trip_stop_and_close_transport() {
    let server = support::spawn_always_500().await;

    let mut config = Config::new();
    config.connection.base_url = server.base_url();
    config.connection.connect_timeout = Duration::from_millis(300);
    config.pool.min_size = 0;
    config.pool.max_size = 1;
    config.stream.worker_count = 1;
    config.stream.event_buffer_size = 8;
    config.stream.chunk_buffer_size = 8;
    config.stream.backpressure_timeout = Duration::from_millis(200);
    config.stream.drain_timeout = Duration::from_millis(200);
    config.backpressure.threshold_percent = 50;
    config.backpressure.max_dropped_events = 2;
    config.backpressure.drop_action = DropActionType::Stop;
    config.backpressure.enable_logging = true;

    let transport = Transport::new(config).unwrap();
    transport.start().await.unwrap();

    let mut observed_close = false;
    for i in 0..20 {
        let result = transport
            .send(Arc::new(RawEvent::new(serde_json::json!({ "i": i }))))
            .await;
        if result.is_err() {
            observed_close = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(
        observed_close,
        "transport never closed itself after repeated upstream failures under the Stop policy"
    );
    assert!(transport.backpressure().dropped_count() >= 2);
}
