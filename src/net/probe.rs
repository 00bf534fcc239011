/// Reachability probe feeding the connectivity monitor
///
/// Desktop and CLI hosts have no browser-style online/offline events, so
/// the signal is derived from whether a TCP connection to a well-known
/// address can be opened.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::debug;

use super::monitor::ConnectivityMonitor;

/// Try once to open a connection to `addr` within `limit`
pub async fn probe_once(addr: &str, limit: Duration) -> bool {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%addr, "Probe failed: {e}");
            false
        }
        Err(_) => {
            debug!(%addr, "Probe timed out");
            false
        }
    }
}

/// Probe `addr` every `interval` and report the result to `monitor`
/// for as long as the returned task lives
pub fn spawn_probe(
    monitor: ConnectivityMonitor,
    addr: String,
    interval: Duration,
    limit: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let reachable = probe_once(&addr, limit).await;
            monitor.set_online(reachable);
            sleep(interval).await;
        }
    })
}
