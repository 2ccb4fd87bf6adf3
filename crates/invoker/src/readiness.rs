use std::time::Duration;
use svcboot_models::BootstrapError;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

const POLL_INTERVAL_MS: u64 = 250;

/// Polls a TCP connect against `addr` until something accepts or the
/// startup window closes. This is the only readiness signal the bootstrap
/// contract defines; anything beyond "a process is listening" belongs to
/// the application.
#[instrument]
pub async fn wait_for_listener(addr: &str, timeout_ms: u64) -> Result<(), BootstrapError> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    loop {
        match TcpStream::connect(addr).await {
            Ok(_) => {
                info!(addr = %addr, "Service is accepting connections");
                return Ok(());
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Not listening yet");
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BootstrapError::LaunchTimeout { timeout_ms });
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}
