//! Byte counters and the background stats reporter. Not part of the wire
//! protocol — purely ambient observability for a long-running service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pool::DataChannelPool;

/// Monotonic byte counters for the two target protocols. Cheap to share:
/// every field is an independent atomic, so no lock is ever held across an
/// await on the data path.
#[derive(Default)]
pub struct ByteCounters {
    tcp_in: AtomicU64,
    tcp_out: AtomicU64,
    udp_in: AtomicU64,
    udp_out: AtomicU64,
}

impl ByteCounters {
    pub fn add_tcp_in(&self, n: u64) {
        self.tcp_in.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_tcp_out(&self, n: u64) {
        self.tcp_out.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_udp_in(&self, n: u64) {
        self.udp_in.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_udp_out(&self, n: u64) {
        self.udp_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tcp_in(&self) -> u64 {
        self.tcp_in.load(Ordering::Relaxed)
    }
    pub fn tcp_out(&self) -> u64 {
        self.tcp_out.load(Ordering::Relaxed)
    }
    pub fn udp_in(&self) -> u64 {
        self.udp_in.load(Ordering::Relaxed)
    }
    pub fn udp_out(&self) -> u64 {
        self.udp_out.load(Ordering::Relaxed)
    }
}

/// Log the four counters plus the pool's idle count on a fixed interval,
/// until cancelled. Ticks independently of the health loop so a slow
/// reporter can never perturb keepalive timing.
pub async fn run_stats_reporter(
    counters: Arc<ByteCounters>,
    pool: Arc<DataChannelPool>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let pool_active = pool.active().await;
        info!(
            tcp_in = counters.tcp_in(),
            tcp_out = counters.tcp_out(),
            udp_in = counters.udp_in(),
            udp_out = counters.udp_out(),
            pool_active,
            "stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let counters = ByteCounters::default();
        assert_eq!(counters.tcp_in(), 0);
        counters.add_tcp_in(4);
        counters.add_tcp_in(6);
        assert_eq!(counters.tcp_in(), 10);
        counters.add_udp_out(5);
        assert_eq!(counters.udp_out(), 5);
    }
}
