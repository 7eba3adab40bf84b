//! The control-channel handshake: the first tunnel connection accepted
//! becomes the control channel, and the server sends a single handshake
//! frame before anything else happens.

use std::net::SocketAddr;

use revtun_proto::{ControlFrame, TunnelResult};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::info;

use crate::transport::{TunnelAcceptor, TunnelConn};

/// Accept the first tunnel connection and perform the handshake: write the
/// `#<tlsCode>\n` frame and return the connection as the control channel.
/// No reply is read; delivery of the write is the whole handshake.
pub async fn perform_handshake(
    listener: &TcpListener,
    acceptor: &TunnelAcceptor,
    tls_code: &str,
) -> TunnelResult<(TunnelConn, SocketAddr)> {
    let (mut conn, addr) = acceptor.accept(listener).await?;
    info!(peer = %addr, "accepted control channel, sending handshake");

    let frame = ControlFrame::Handshake(tls_code.to_string()).encode_line();
    conn.write_all(frame.as_bytes()).await?;
    conn.flush().await?;

    Ok((conn, addr))
}
