//! UDP target dispatcher: every inbound datagram is a one-shot
//! request/response RPC through a freshly checked-out data channel.

use std::sync::Arc;

use revtun_proto::{ChannelMode, ControlFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pool::DataChannelPool;
use crate::stats::ByteCounters;
use crate::transport::TunnelConn;

/// Run the UDP target receive loop until cancelled.
pub async fn run_udp_dispatcher(
    socket: Arc<UdpSocket>,
    control: Arc<Mutex<TunnelConn>>,
    pool: Arc<DataChannelPool>,
    semaphore: Arc<Semaphore>,
    counters: Arc<ByteCounters>,
    buf_size: usize,
    cancel: CancellationToken,
) {
    loop {
        let mut buf = vec![0u8; buf_size];
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("udp dispatcher cancelled");
                break;
            }
            received = socket.recv_from(&mut buf) => {
                let (n, peer) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "udp target recv failed");
                        continue;
                    }
                };
                buf.truncate(n);

                let Some((id, data_conn)) = pool.get().await else {
                    debug!(%peer, "pool exhausted, dropping udp datagram");
                    continue;
                };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };

                let control = control.clone();
                let counters = counters.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    run_udp_exchange(id, data_conn, buf, peer, control, socket, counters, buf_size).await;
                    drop(permit);
                });
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_udp_exchange(
    id: String,
    mut data_conn: TunnelConn,
    request: Vec<u8>,
    peer: std::net::SocketAddr,
    control: Arc<Mutex<TunnelConn>>,
    socket: Arc<UdpSocket>,
    counters: Arc<ByteCounters>,
    buf_size: usize,
) {
    {
        let frame = ControlFrame::Launch {
            id: id.clone(),
            mode: ChannelMode::Udp,
        }
        .encode_line();
        let mut guard = control.lock().await;
        if let Err(e) = guard.write_all(frame.as_bytes()).await {
            warn!(channel_id = %id, error = %e, "failed to write udp launch frame");
            let _ = data_conn.shutdown().await;
            return;
        }
        if let Err(e) = guard.flush().await {
            warn!(channel_id = %id, error = %e, "failed to flush udp launch frame");
            let _ = data_conn.shutdown().await;
            return;
        }
    }

    let request_len = request.len() as u64;
    if let Err(e) = data_conn.write_all(&request).await {
        warn!(channel_id = %id, error = %e, "failed to write udp request to data channel");
        let _ = data_conn.shutdown().await;
        return;
    }
    if let Err(e) = data_conn.flush().await {
        warn!(channel_id = %id, error = %e, "failed to flush udp request");
        let _ = data_conn.shutdown().await;
        return;
    }
    counters.add_udp_in(request_len);

    let mut response = vec![0u8; buf_size];
    let n = match data_conn.read(&mut response).await {
        Ok(n) => n,
        Err(e) => {
            debug!(channel_id = %id, error = %e, "udp response read failed");
            let _ = data_conn.shutdown().await;
            return;
        }
    };

    if n > 0 {
        if let Err(e) = socket.send_to(&response[..n], peer).await {
            warn!(channel_id = %id, %peer, error = %e, "failed to send udp response to peer");
        } else {
            counters.add_udp_out(n as u64);
        }
    }

    let _ = data_conn.shutdown().await;
}
