//! TCP target dispatcher: pairs each accepted target connection with a
//! pooled data channel and splices bytes between them.

use std::sync::Arc;

use revtun_proto::{ChannelMode, ControlFrame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pool::DataChannelPool;
use crate::stats::ByteCounters;
use crate::transport::TunnelConn;

/// Run the TCP target accept loop until cancelled. Each accepted
/// connection is handed to its own worker task so the loop can keep
/// accepting while a long-lived splice is in progress.
pub async fn run_tcp_dispatcher(
    listener: Arc<TcpListener>,
    control: Arc<Mutex<TunnelConn>>,
    pool: Arc<DataChannelPool>,
    semaphore: Arc<Semaphore>,
    counters: Arc<ByteCounters>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("tcp dispatcher cancelled");
                break;
            }
            accepted = listener.accept() => {
                let (target_conn, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "tcp target accept failed");
                        continue;
                    }
                };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break, // semaphore closed: shutting down
                };

                let control = control.clone();
                let pool = pool.clone();
                let counters = counters.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_tcp_exchange(target_conn, peer, control, pool, counters, cancel).await;
                    drop(permit);
                });
            }
        }
    }
}

async fn run_tcp_exchange(
    mut target_conn: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    control: Arc<Mutex<TunnelConn>>,
    pool: Arc<DataChannelPool>,
    counters: Arc<ByteCounters>,
    cancel: CancellationToken,
) {
    let Some((id, mut data_conn)) = pool.get().await else {
        debug!(%peer, "pool exhausted, dropping tcp target connection");
        let _ = target_conn.shutdown().await;
        return;
    };

    {
        let frame = ControlFrame::Launch {
            id: id.clone(),
            mode: ChannelMode::Tcp,
        }
        .encode_line();
        let mut guard = control.lock().await;
        if let Err(e) = guard.write_all(frame.as_bytes()).await {
            warn!(channel_id = %id, error = %e, "failed to write tcp launch frame");
            let _ = data_conn.shutdown().await;
            let _ = target_conn.shutdown().await;
            return;
        }
        if let Err(e) = guard.flush().await {
            warn!(channel_id = %id, error = %e, "failed to flush tcp launch frame");
            let _ = data_conn.shutdown().await;
            let _ = target_conn.shutdown().await;
            return;
        }
    }

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(channel_id = %id, %peer, "tcp exchange cancelled by shutdown");
        }
        result = tokio::io::copy_bidirectional(&mut target_conn, &mut data_conn) => {
            match result {
                Ok((from_target, from_data)) => {
                    counters.add_tcp_in(from_target);
                    counters.add_tcp_out(from_data);
                    debug!(channel_id = %id, %peer, from_target, from_data, "tcp exchange finished");
                }
                Err(e) => {
                    debug!(channel_id = %id, %peer, error = %e, "tcp splice ended with error");
                }
            }
        }
    }

    let _ = data_conn.shutdown().await;
    let _ = target_conn.shutdown().await;
}
