//! Connection pool: round-robin acquire, health-check eviction, idle
//! timeout (§4.3).
//!
//! Grounded on the teacher's preference for `parking_lot::Mutex` over a
//! concurrent map crate it doesn't already depend on (see `producer.rs`'s
//! in-flight tracking) — here a `Mutex<HashMap<u128, PooledConnection>>`
//! plus an `AtomicUsize` round-robin cursor, rather than pulling in
//! `dashmap`.

use crate::config::{ConnectionConfig, ConnectionPoolConfig, HeartbeatConfig, ReconnectConfig};
use crate::connection::{Connection, ConnectionState};
use crate::error::PoolError;
use crate::middleware::SecurityMiddleware;
use crate::monitoring::Counters;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct PooledConnection {
    id: u128,
    connection: Arc<Connection>,
    last_used: Instant,
}

/// A pool of managed connections to the same upstream, round-robined on
/// `acquire` and health-checked on an interval.
pub struct ConnectionPool {
    conn_cfg: ConnectionConfig,
    reconnect_cfg: ReconnectConfig,
    heartbeat_cfg: HeartbeatConfig,
    pool_cfg: ConnectionPoolConfig,
    middleware: Option<Arc<dyn SecurityMiddleware>>,
    counters: Arc<Counters>,
    connections: Mutex<HashMap<u128, PooledConnection>>,
    order: Mutex<Vec<u128>>,
    cursor: AtomicUsize,
    cancel: CancellationToken,
    health_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(
        conn_cfg: ConnectionConfig,
        reconnect_cfg: ReconnectConfig,
        heartbeat_cfg: HeartbeatConfig,
        pool_cfg: ConnectionPoolConfig,
        counters: Arc<Counters>,
    ) -> Self {
        Self::with_middleware(conn_cfg, reconnect_cfg, heartbeat_cfg, pool_cfg, counters, None)
    }

    pub fn with_middleware(
        conn_cfg: ConnectionConfig,
        reconnect_cfg: ReconnectConfig,
        heartbeat_cfg: HeartbeatConfig,
        pool_cfg: ConnectionPoolConfig,
        counters: Arc<Counters>,
        middleware: Option<Arc<dyn SecurityMiddleware>>,
    ) -> Self {
        Self {
            conn_cfg,
            reconnect_cfg,
            heartbeat_cfg,
            pool_cfg,
            middleware,
            counters,
            connections: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            health_task: AsyncMutex::new(None),
        }
    }

    /// Establish `min_size` connections up front and start the health
    /// loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        for _ in 0..self.pool_cfg.min_size {
            self.spawn_connection().await?;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.health_loop().await });
        *self.health_task.lock().await = Some(handle);
        Ok(())
    }

    async fn spawn_connection(&self) -> Result<u128, PoolError> {
        let connection = Connection::with_middleware(
            self.conn_cfg.clone(),
            self.reconnect_cfg.clone(),
            self.heartbeat_cfg.clone(),
            self.counters.clone(),
            self.middleware.clone(),
        )?;
        let connection = Arc::new(connection);
        connection.connect().await?;

        let id = rand::random::<u128>();
        self.connections.lock().insert(
            id,
            PooledConnection {
                id,
                connection,
                last_used: Instant::now(),
            },
        );
        self.order.lock().push(id);
        Ok(id)
    }

    /// Round-robin acquire: returns the next live connection, growing the
    /// pool up to `max_size` if every existing connection is unhealthy.
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<Connection>, PoolError> {
        {
            let order = self.order.lock().clone();
            if !order.is_empty() {
                let len = order.len();
                for _ in 0..len {
                    let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
                    let id = order[idx];
                    let found = {
                        let mut conns = self.connections.lock();
                        conns.get_mut(&id).map(|pc| {
                            pc.last_used = Instant::now();
                            pc.connection.clone()
                        })
                    };
                    if let Some(conn) = found {
                        if conn.state() == ConnectionState::Connected {
                            return Ok(conn);
                        }
                    }
                }
            }
        }

        if self.connections.lock().len() >= self.pool_cfg.max_size {
            return Err(PoolError::PoolExhausted {
                max: self.pool_cfg.max_size,
            });
        }

        let id = self.spawn_connection().await?;
        let conn = self
            .connections
            .lock()
            .get(&id)
            .map(|pc| pc.connection.clone())
            .expect("just inserted");
        Ok(conn)
    }

    /// Release is a no-op beyond bookkeeping: connections are shared, not
    /// exclusively checked out, so there's nothing to give back beyond
    /// what `acquire` already recorded.
    pub fn release(&self, _connection: &Arc<Connection>) {}

    async fn health_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.pool_cfg.health_check_interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.run_health_pass().await,
            }
        }
    }

    async fn run_health_pass(&self) {
        let stale: Vec<u128> = {
            let conns = self.connections.lock();
            conns
                .values()
                .filter(|pc| {
                    let unhealthy = matches!(
                        pc.connection.state(),
                        ConnectionState::Closed | ConnectionState::Error
                    );
                    let idle = pc.last_used.elapsed() >= self.pool_cfg.idle_timeout
                        && conns.len() > self.pool_cfg.min_size;
                    unhealthy || idle
                })
                .map(|pc| pc.id)
                .collect()
        };

        for id in stale {
            let removed = self.connections.lock().remove(&id);
            self.order.lock().retain(|&x| x != id);
            if let Some(pc) = removed {
                let _ = pc.connection.close().await;
                #[cfg(feature = "tracing")]
                tracing::info!(id = %format!("{:032x}", id), "evicted unhealthy or idle connection");
            }
        }

        let deficit = self.pool_cfg.min_size.saturating_sub(self.connections.lock().len());
        for _ in 0..deficit {
            if let Ok(id) = self.spawn_connection().await {
                #[cfg(feature = "tracing")]
                tracing::info!(id = %format!("{:032x}", id), "replenished pool connection");
            }
        }
    }

    pub fn size(&self) -> usize {
        self.connections.lock().len()
    }

    /// Close every current connection and zero its reconnect counter, then
    /// let the health loop replenish to `min_size`. Unlike `close()` this
    /// does not stop the pool itself.
    pub async fn reset(&self) -> Result<(), PoolError> {
        let conns: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .drain()
            .map(|(_, pc)| pc.connection)
            .collect();
        self.order.lock().clear();

        for conn in &conns {
            conn.reset_reconnect_attempts();
            conn.close().await.ok();
        }

        for _ in 0..self.pool_cfg.min_size {
            self.spawn_connection().await?;
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), PoolError> {
        self.cancel.cancel();
        if let Some(handle) = self.health_task.lock().await.take() {
            let _ = handle.await;
        }
        let conns: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .drain()
            .map(|(_, pc)| pc.connection)
            .collect();
        self.order.lock().clear();
        for conn in conns {
            let _ = conn.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_cfg(min: usize, max: usize) -> ConnectionPoolConfig {
        ConnectionPoolConfig {
            min_size: min,
            max_size: max,
            idle_timeout: std::time::Duration::from_secs(300),
            health_check_interval: std::time::Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn acquire_on_unreachable_host_without_existing_connections_errors() {
        let pool = Arc::new(ConnectionPool::new(
            ConnectionConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                connect_timeout: std::time::Duration::from_millis(100),
                ..Default::default()
            },
            ReconnectConfig::default(),
            HeartbeatConfig::default(),
            pool_cfg(0, 1),
            Counters::new(),
        ));

        let result = pool.acquire().await;
        assert!(result.is_err());
        assert_eq!(pool.size(), 0);
    }
}
