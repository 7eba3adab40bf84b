//! The supervisor: binds listeners, runs the handshake, owns the pool and
//! dispatchers, and restarts the whole attempt on failure.

use std::sync::Arc;

use revtun_proto::TunnelResult;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::{run_tcp_dispatcher, run_udp_dispatcher};
use crate::handshake::perform_handshake;
use crate::health::run_health_loop;
use crate::pool::DataChannelPool;
use crate::stats::{run_stats_reporter, ByteCounters};
use crate::transport::{TunnelAcceptor, TunnelConn};

/// Everything torn down by `Stop`. Absent between attempts and while idle.
struct RunningState {
    cancel: CancellationToken,
    tunnel_listener: Arc<TcpListener>,
    target_tcp_listener: Arc<TcpListener>,
    target_udp_socket: Arc<UdpSocket>,
    control: Arc<Mutex<TunnelConn>>,
    pool: Arc<DataChannelPool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Server {
    config: ServerConfig,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    counters: Arc<ByteCounters>,
    state: Mutex<Option<RunningState>>,
}

impl Server {
    pub fn new(config: ServerConfig, tls_config: Option<Arc<rustls::ServerConfig>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            tls_config,
            counters: Arc::new(ByteCounters::default()),
            state: Mutex::new(None),
        })
    }

    /// Run `Start` in an unconditional restart loop, cooling down between
    /// attempts, until an OS shutdown signal arrives; then tear down within
    /// `shutdown_timeout` and return.
    pub async fn manage(self: Arc<Self>) {
        let shutdown = CancellationToken::new();

        let worker = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.restart_loop(shutdown).await })
        };

        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping");
        shutdown.cancel();

        if tokio::time::timeout(self.config.shutdown_timeout, worker)
            .await
            .is_err()
        {
            warn!("graceful shutdown timed out, abandoning in-flight tasks");
        }
        self.stop().await;
    }

    async fn restart_loop(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            match self.start(shutdown.clone()).await {
                Ok(()) => debug!("start returned cleanly"),
                Err(e) => warn!(error = %e, "server attempt failed"),
            }
            self.stop().await;

            if shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.service_cooldown) => {}
            }
        }
    }

    /// One full attempt: bind, handshake, spawn dispatchers and stats, run
    /// the health loop. Returns when the health loop ends, either from
    /// cancellation (`Ok`) or a dead control channel (`Err`).
    pub async fn start(&self, shutdown: CancellationToken) -> TunnelResult<()> {
        let cancel = shutdown.child_token();

        let tunnel_listener = Arc::new(TcpListener::bind(self.config.tunnel_addr).await?);
        let target_tcp_listener = Arc::new(TcpListener::bind(self.config.target_tcp_addr).await?);
        let target_udp_socket = Arc::new(UdpSocket::bind(self.config.target_udp_addr).await?);
        info!(
            tunnel = %self.config.tunnel_addr,
            target_tcp = %self.config.target_tcp_addr,
            target_udp = %self.config.target_udp_addr,
            "listeners bound"
        );

        let acceptor = TunnelAcceptor::new(self.tls_config.clone());
        let (control_conn, peer) =
            perform_handshake(&tunnel_listener, &acceptor, &self.config.tls_code).await?;
        info!(%peer, "control channel established");

        let control = Arc::new(Mutex::new(control_conn));
        let pool = Arc::new(DataChannelPool::spawn(tunnel_listener.clone(), acceptor));
        let semaphore = Arc::new(Semaphore::new(self.config.semaphore_limit));

        // Dispatchers wait for the pool to report ready before their first
        // accept/recv; the health loop does not, since it owns the restart
        // signal and must keep ticking regardless of pool state.
        let tasks = vec![
            tokio::spawn(wait_then_run_tcp_dispatcher(
                pool.clone(),
                cancel.clone(),
                target_tcp_listener.clone(),
                control.clone(),
                semaphore.clone(),
                self.counters.clone(),
            )),
            tokio::spawn(wait_then_run_udp_dispatcher(
                pool.clone(),
                cancel.clone(),
                target_udp_socket.clone(),
                control.clone(),
                semaphore.clone(),
                self.counters.clone(),
                self.config.udp_buf_size,
            )),
            tokio::spawn(run_stats_reporter(
                self.counters.clone(),
                pool.clone(),
                self.config.report_interval,
                cancel.clone(),
            )),
        ];

        {
            let mut state = self.state.lock().await;
            *state = Some(RunningState {
                cancel: cancel.clone(),
                tunnel_listener,
                target_tcp_listener,
                target_udp_socket,
                control: control.clone(),
                pool: pool.clone(),
                tasks,
            });
        }

        run_health_loop(
            control,
            pool,
            self.config.reload_interval,
            self.config.report_interval,
            cancel,
        )
        .await
    }

    /// Idempotent teardown: cancels the attempt's context, closes the
    /// pool, aborts dispatcher/stats tasks, closes the control connection,
    /// and drops the listeners. Safe to call when nothing is running.
    pub async fn stop(&self) {
        let state = self.state.lock().await.take();
        let Some(state) = state else {
            return;
        };

        state.cancel.cancel();
        let active = state.pool.active().await;
        state.pool.close().await;
        debug!(active_at_close = active, "pool closed");

        for task in state.tasks {
            task.abort();
        }

        {
            use tokio::io::AsyncWriteExt;
            let mut guard = state.control.lock().await;
            let _ = guard.shutdown().await;
        }

        drop(state.target_udp_socket);
        drop(state.target_tcp_listener);
        drop(state.tunnel_listener);
    }
}

#[allow(clippy::too_many_arguments)]
async fn wait_then_run_tcp_dispatcher(
    pool: Arc<DataChannelPool>,
    cancel: CancellationToken,
    listener: Arc<TcpListener>,
    control: Arc<Mutex<TunnelConn>>,
    semaphore: Arc<Semaphore>,
    counters: Arc<ByteCounters>,
) {
    pool.wait_ready(&cancel).await;
    if cancel.is_cancelled() {
        return;
    }
    run_tcp_dispatcher(listener, control, pool, semaphore, counters, cancel).await;
}

#[allow(clippy::too_many_arguments)]
async fn wait_then_run_udp_dispatcher(
    pool: Arc<DataChannelPool>,
    cancel: CancellationToken,
    socket: Arc<UdpSocket>,
    control: Arc<Mutex<TunnelConn>>,
    semaphore: Arc<Semaphore>,
    counters: Arc<ByteCounters>,
    buf_size: usize,
) {
    pool.wait_ready(&cancel).await;
    if cancel.is_cancelled() {
        return;
    }
    run_udp_dispatcher(
        socket, control, pool, semaphore, counters, buf_size, cancel,
    )
    .await;
}

/// Wait for Ctrl-C or, on unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
