//! Dev server readiness probe.

use crate::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tracing::debug;

const INITIAL_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_millis(500);

/// Wait until `addr` accepts TCP connections, retrying with exponential
/// backoff for at most `budget`.
pub async fn wait_until_ready(addr: SocketAddr, budget: Duration) -> Result<(), Error> {
    let start = Instant::now();
    let deadline = start + budget;
    let mut delay = INITIAL_DELAY;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match TcpStream::connect(addr).await {
            Ok(_) => {
                debug!(%addr, attempts, "server ready");
                return Ok(());
            }
            Err(err) => debug!(%addr, attempts, error = %err, "server not ready"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::NotReady {
                addr,
                waited_ms: start.elapsed().as_millis(),
            });
        }
        sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}
