use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

pub const RECLAIM_PERIOD: Duration = Duration::from_secs(60);

/// Periodically hands freed heap memory back to the OS until cancelled.
pub async fn run(period: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => reclaim(),
        }
    }
}

pub fn reclaim() {
    log::info!("memory reclamation starts");
    let released = release_free_memory();
    log::info!("memory reclamation finishes (released: {released})");
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn release_free_memory() -> bool {
    // SAFETY: malloc_trim only walks the allocator's own free lists.
    unsafe { libc::malloc_trim(0) == 1 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn release_free_memory() -> bool {
    false
}
