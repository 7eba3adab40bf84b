//! Health / keepalive loop: the sole mechanism for detecting a broken
//! control channel. Runs on the `Start` task so its return value becomes
//! the restart trigger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use revtun_proto::{ControlFrame, TunnelResult};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pool::DataChannelPool;
use crate::transport::TunnelConn;

/// Runs until cancelled (returns `Ok`) or a control-channel write fails
/// (returns `Err`, which ends `Start` and triggers a restart).
pub async fn run_health_loop(
    control: Arc<Mutex<TunnelConn>>,
    pool: Arc<DataChannelPool>,
    reload_interval: Duration,
    report_interval: Duration,
    cancel: CancellationToken,
) -> TunnelResult<()> {
    let mut last_flushed = Instant::now();

    loop {
        if cancel.is_cancelled() {
            debug!("health loop cancelled");
            return Ok(());
        }

        let mut guard = match control.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // A dispatcher is mid-write. Those are short; just retry.
                tokio::task::yield_now().await;
                continue;
            }
        };

        if last_flushed.elapsed() >= reload_interval {
            write_frame(&mut guard, ControlFrame::Flush).await?;
            pool.flush().await;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(report_interval) => {}
            }
            drop(guard);
            last_flushed = Instant::now();
            debug!("emitted flush frame");
        } else {
            write_frame(&mut guard, ControlFrame::Keepalive).await?;
            drop(guard);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(report_interval) => {}
        }
    }
}

async fn write_frame(conn: &mut TunnelConn, frame: ControlFrame) -> TunnelResult<()> {
    conn.write_all(frame.encode_line().as_bytes()).await?;
    conn.flush().await?;
    Ok(())
}
