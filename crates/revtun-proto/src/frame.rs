//! Newline-delimited, URL-shaped control frames.
//!
//! Every frame the server writes to the control channel is a single line
//! ending in `\n`. Only two URL components ever carry meaning: the
//! authority (`host`, written as `//<id>`) holds a data-channel id, and the
//! `fragment` (`#<tag>`) holds the mode tag. A bare `\n` is the keepalive.

use std::sync::LazyLock;
use url::Url;

use crate::error::{TunnelError, TunnelResult};

/// Relative references are resolved against this placeholder base; its own
/// host/path never leak into a decoded frame because every real frame either
/// carries no authority (handshake/flush/keepalive) or replaces it outright
/// via a `//` network-path reference (launch frames).
static FRAME_BASE: LazyLock<Url> = LazyLock::new(|| Url::parse("revtun://frame/").unwrap());

/// The mode a launch frame asks the client to bind a data channel to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Tcp,
    Udp,
}

impl ChannelMode {
    fn tag(self) -> &'static str {
        match self {
            ChannelMode::Tcp => "1",
            ChannelMode::Udp => "2",
        }
    }
}

/// A single control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// `#<tlsCode>\n`, sent once at the start of the control channel.
    Handshake(String),
    /// A bare `\n`.
    Keepalive,
    /// `#0\n`: tells the client to drop its idle data channels.
    Flush,
    /// `//<id>#1\n` or `//<id>#2\n`: bind a checked-out channel to a mode.
    Launch { id: String, mode: ChannelMode },
}

impl ControlFrame {
    /// Render the frame as its wire line, including the trailing `\n`.
    pub fn encode_line(&self) -> String {
        match self {
            ControlFrame::Handshake(tls_code) => format!("#{tls_code}\n"),
            ControlFrame::Keepalive => "\n".to_string(),
            ControlFrame::Flush => "#0\n".to_string(),
            ControlFrame::Launch { id, mode } => format!("//{id}#{}\n", mode.tag()),
        }
    }

    /// Parse a single line (without its trailing `\n`) back into a frame.
    ///
    /// The server never needs this in production — it only writes frames —
    /// but the client side of the protocol, and every test that asserts on
    /// what the server wrote, does.
    pub fn decode_line(line: &str) -> TunnelResult<ControlFrame> {
        if line.trim().is_empty() {
            return Ok(ControlFrame::Keepalive);
        }

        let url = FRAME_BASE
            .join(line)
            .map_err(|e| TunnelError::Frame(format!("malformed frame {line:?}: {e}")))?;

        let fragment = url.fragment().unwrap_or("");
        let has_authority = line.starts_with("//");

        if has_authority {
            let id = url
                .host_str()
                .ok_or_else(|| TunnelError::Frame(format!("launch frame missing id: {line:?}")))?
                .to_string();
            return match fragment {
                "1" => Ok(ControlFrame::Launch {
                    id,
                    mode: ChannelMode::Tcp,
                }),
                "2" => Ok(ControlFrame::Launch {
                    id,
                    mode: ChannelMode::Udp,
                }),
                other => Err(TunnelError::Frame(format!(
                    "unknown launch mode {other:?} in {line:?}"
                ))),
            };
        }

        if fragment == "0" {
            Ok(ControlFrame::Flush)
        } else {
            Ok(ControlFrame::Handshake(fragment.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_handshake() {
        let frame = ControlFrame::Handshake("AES".to_string());
        assert_eq!(frame.encode_line(), "#AES\n");
    }

    #[test]
    fn encodes_keepalive() {
        assert_eq!(ControlFrame::Keepalive.encode_line(), "\n");
    }

    #[test]
    fn encodes_flush() {
        assert_eq!(ControlFrame::Flush.encode_line(), "#0\n");
    }

    #[test]
    fn encodes_tcp_launch() {
        let frame = ControlFrame::Launch {
            id: "abc123".to_string(),
            mode: ChannelMode::Tcp,
        };
        assert_eq!(frame.encode_line(), "//abc123#1\n");
    }

    #[test]
    fn encodes_udp_launch() {
        let frame = ControlFrame::Launch {
            id: "abc123".to_string(),
            mode: ChannelMode::Udp,
        };
        assert_eq!(frame.encode_line(), "//abc123#2\n");
    }

    #[test]
    fn round_trips_every_variant() {
        let frames = vec![
            ControlFrame::Handshake("AES".to_string()),
            ControlFrame::Keepalive,
            ControlFrame::Flush,
            ControlFrame::Launch {
                id: "deadbeef".to_string(),
                mode: ChannelMode::Tcp,
            },
            ControlFrame::Launch {
                id: "deadbeef".to_string(),
                mode: ChannelMode::Udp,
            },
        ];

        for frame in frames {
            let line = frame.encode_line();
            let trimmed = line.trim_end_matches('\n');
            let decoded = ControlFrame::decode_line(trimmed).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn rejects_unknown_launch_mode() {
        let err = ControlFrame::decode_line("//abc123#9").unwrap_err();
        assert!(matches!(err, TunnelError::Frame(_)));
    }
}
