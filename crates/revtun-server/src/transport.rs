//! The tunnel-side duplex stream: plain TCP, or TLS-wrapped TCP.
//!
//! Pool and dispatch code only ever see [`TunnelConn`] — they never branch
//! on whether TLS is configured. The branch happens once, at accept time,
//! in [`TunnelAcceptor::accept`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// A duplex byte stream from the tunnel listener, after any TLS handshake
/// has already completed.
pub enum TunnelConn {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for TunnelConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TunnelConn::Plain(s) => Pin::new(s).poll_read(cx, buf),
            TunnelConn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TunnelConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TunnelConn::Plain(s) => Pin::new(s).poll_write(cx, buf),
            TunnelConn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TunnelConn::Plain(s) => Pin::new(s).poll_flush(cx),
            TunnelConn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TunnelConn::Plain(s) => Pin::new(s).poll_shutdown(cx),
            TunnelConn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Accepts connections on the tunnel listener, wrapping them in TLS when a
/// server config is present.
#[derive(Clone)]
pub enum TunnelAcceptor {
    Plain,
    Tls(TlsAcceptor),
}

impl TunnelAcceptor {
    pub fn new(tls_config: Option<Arc<rustls::ServerConfig>>) -> Self {
        match tls_config {
            Some(cfg) => TunnelAcceptor::Tls(TlsAcceptor::from(cfg)),
            None => TunnelAcceptor::Plain,
        }
    }

    pub async fn accept(
        &self,
        listener: &TcpListener,
    ) -> std::io::Result<(TunnelConn, std::net::SocketAddr)> {
        let (stream, addr) = listener.accept().await?;
        match self {
            TunnelAcceptor::Plain => Ok((TunnelConn::Plain(stream), addr)),
            TunnelAcceptor::Tls(acceptor) => {
                let tls_stream = acceptor.accept(stream).await?;
                Ok((TunnelConn::Tls(Box::new(tls_stream)), addr))
            }
        }
    }
}
