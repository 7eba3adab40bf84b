//! The data channel pool: every tunnel connection after the control
//! channel lands here as an idle, server-assigned-id channel, ready to be
//! checked out by a dispatcher.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use revtun_proto::generate_channel_id;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{TunnelAcceptor, TunnelConn};

/// Poll interval while a dispatcher waits for the pool to report ready.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Holds idle data channels, keyed by server-assigned id, and runs the
/// background accept loop that keeps refilling them.
pub struct DataChannelPool {
    idle: Arc<Mutex<HashMap<String, TunnelConn>>>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl DataChannelPool {
    /// Spawn the pool manager over a tunnel listener that has already had
    /// its first connection (the control channel) consumed by the
    /// handshake. Every later accept becomes an idle data channel.
    pub fn spawn(listener: Arc<TcpListener>, acceptor: TunnelAcceptor) -> Self {
        let idle: Arc<Mutex<HashMap<String, TunnelConn>>> = Arc::new(Mutex::new(HashMap::new()));
        let ready = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task_idle = idle.clone();
        let task_ready = ready.clone();
        let task_cancel = cancel.clone();
        let manager = tokio::spawn(async move {
            Self::run_manager(listener, acceptor, task_idle, task_ready, task_cancel).await;
        });

        Self {
            idle,
            ready,
            cancel,
            manager: Mutex::new(Some(manager)),
        }
    }

    async fn run_manager(
        listener: Arc<TcpListener>,
        acceptor: TunnelAcceptor,
        idle: Arc<Mutex<HashMap<String, TunnelConn>>>,
        ready: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("pool manager cancelled");
                    break;
                }
                result = acceptor.accept(&listener) => {
                    match result {
                        Ok((conn, addr)) => {
                            let id = generate_channel_id();
                            idle.lock().await.insert(id.clone(), conn);
                            ready.store(true, Ordering::Release);
                            debug!(channel_id = %id, peer = %addr, "data channel accepted into pool");
                        }
                        Err(e) => {
                            warn!(error = %e, "pool manager accept failed");
                        }
                    }
                }
            }
        }
    }

    /// True once at least one idle channel exists.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Busy-poll (1ms) until the pool reports ready, or the token cancels.
    pub async fn wait_ready(&self, cancel: &CancellationToken) {
        while !self.ready() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
            }
        }
    }

    /// Atomically remove and return one idle channel, if any exist. Which
    /// channel is chosen is unspecified; any idle channel satisfies the
    /// contract.
    pub async fn get(&self) -> Option<(String, TunnelConn)> {
        let mut idle = self.idle.lock().await;
        let id = idle.keys().next().cloned()?;
        let conn = idle.remove(&id);
        if idle.is_empty() {
            self.ready.store(false, Ordering::Release);
        }
        conn.map(|c| (id, c))
    }

    /// Close every currently idle channel. Checked-out channels are
    /// unaffected because they are no longer tracked here.
    pub async fn flush(&self) {
        let mut idle = self.idle.lock().await;
        let count = idle.len();
        idle.clear();
        self.ready.store(false, Ordering::Release);
        if count > 0 {
            debug!(count, "flushed idle data channels");
        }
    }

    /// Count of currently idle channels (observability only).
    pub async fn active(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Stop the manager task and close every tracked channel. Safe to call
    /// more than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.manager.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut idle = self.idle.lock().await;
        let count = idle.len();
        idle.clear();
        if count > 0 {
            info!(count, "closed idle data channels on pool shutdown");
        }
    }
}

#[allow(dead_code)]
fn _assert_addr_used(_: SocketAddr) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    async fn bind_pool() -> (DataChannelPool, SocketAddr) {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();
        let pool = DataChannelPool::spawn(listener, TunnelAcceptor::Plain);
        (pool, addr)
    }

    #[tokio::test]
    async fn starts_not_ready_and_empty() {
        let (pool, _addr) = bind_pool().await;
        assert!(!pool.ready());
        assert_eq!(pool.active().await, 0);
    }

    #[tokio::test]
    async fn accepted_connection_becomes_idle_and_ready() {
        let (pool, addr) = bind_pool().await;
        let _client = TcpStream::connect(addr).await.unwrap();

        let cancel = CancellationToken::new();
        pool.wait_ready(&cancel).await;

        assert!(pool.ready());
        assert_eq!(pool.active().await, 1);
    }

    #[tokio::test]
    async fn get_removes_and_returns_idle_channel() {
        let (pool, addr) = bind_pool().await;
        let _client = TcpStream::connect(addr).await.unwrap();

        let cancel = CancellationToken::new();
        pool.wait_ready(&cancel).await;

        let (id, _conn) = pool.get().await.unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(pool.active().await, 0);
        assert!(!pool.ready());
    }

    #[tokio::test]
    async fn get_on_empty_pool_returns_none() {
        let (pool, _addr) = bind_pool().await;
        assert!(pool.get().await.is_none());
    }

    #[tokio::test]
    async fn flush_clears_idle_without_affecting_checked_out() {
        let (pool, addr) = bind_pool().await;
        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();

        let cancel = CancellationToken::new();
        pool.wait_ready(&cancel).await;
        // give the manager a moment to accept the second connection too
        tokio::time::sleep(Duration::from_millis(20)).await;

        let checked_out = pool.get().await.unwrap();
        assert_eq!(pool.active().await, 1);

        pool.flush().await;
        assert_eq!(pool.active().await, 0);
        assert!(!pool.ready());

        // the checked-out channel is untouched by flush
        drop(checked_out);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (pool, _addr) = bind_pool().await;
        pool.close().await;
        pool.close().await;
    }
}
