//! Target-facing dispatchers: accept/receive on the target listeners and
//! pair each exchange with a pooled data channel.

mod tcp;
mod udp;

pub use tcp::run_tcp_dispatcher;
pub use udp::run_udp_dispatcher;
