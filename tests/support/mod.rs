//! A minimal in-process SSE server for the end-to-end reconnect/heartbeat/
//! backpressure scenarios. Not a mock library — just enough raw
//! `TcpListener` plumbing to accept a `GET /events/stream`, write SSE
//! response headers, and then behave however a given test needs (stay
//! silent, drop the connection, keep streaming).

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

const SSE_HEADERS: &str =
    "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: keep-alive\r\n\r\n";

async fn drain_request(stream: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    // Best-effort: read whatever the client has sent so far. The request
    // is small enough to land in one read for every client this harness
    // talks to.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), stream.read(&mut buf)).await;
}

/// Read just the request line (e.g. `GET /ping HTTP/1.1`) so a handler can
/// branch on path, then drain whatever headers follow.
async fn read_request_line(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(std::time::Duration::from_millis(200), stream.read(&mut buf))
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or(0);
    String::from_utf8_lossy(&buf[..n]).lines().next().unwrap_or_default().to_string()
}

/// Accept connections forever, sending headers then immediately closing
/// each one. Simulates a server that drops the stream right after
/// accepting it, forcing the client through its reconnect policy.
pub async fn spawn_drop_on_connect() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            drain_request(&mut stream).await;
            let _ = stream.write_all(SSE_HEADERS.as_bytes()).await;
            drop(stream);
        }
    });

    TestServer { addr }
}

/// Accept connections forever, sending headers and then holding the
/// connection open without ever writing another byte. Used to exercise
/// heartbeat-timeout detection.
pub async fn spawn_silent_after_headers() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            drain_request(&mut stream).await;
            let _ = stream.write_all(SSE_HEADERS.as_bytes()).await;
            // Hold the stream open (move it into a detached task) so the
            // client's read loop blocks on `bytes_stream().next()` rather
            // than observing EOF.
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    TestServer { addr }
}

/// Accept connections forever. A `GET /events/stream` gets SSE headers and
/// is then held open like `spawn_silent_after_headers`; any other path
/// (in particular the heartbeat ping endpoint) gets a 500. Used to exercise
/// the independent heartbeat ticker's failure path without relying on SSE
/// stream silence.
pub async fn spawn_sse_with_failing_ping() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let request_line = read_request_line(&mut stream).await;
            if request_line.starts_with("GET /events/stream") {
                let _ = stream.write_all(SSE_HEADERS.as_bytes()).await;
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                });
            } else {
                let _ = stream
                    .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        }
    });

    TestServer { addr }
}

/// Accept connections and reject every request with a 500, regardless of
/// method or path. Used to force every outbound POST to fail.
pub async fn spawn_always_500() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            drain_request(&mut stream).await;
            let _ = stream
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n")
                .await;
        }
    });

    TestServer { addr }
}
