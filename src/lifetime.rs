//! Self-termination after a configured lifetime, to simulate pod churn.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::LifetimeError;

/// Upper bound (exclusive) of the random jitter added to the lifetime, in seconds.
pub const MAX_JITTER_SECS: u64 = 30;

/// Parses a lifetime such as `"10s"`, `"5m"` or `"1h 30m"`.
pub fn parse_lifetime(raw: &str) -> Result<Duration, LifetimeError> {
    humantime::parse_duration(raw.trim()).map_err(|source| LifetimeError {
        value: raw.to_owned(),
        source,
    })
}

/// Total time this process should live, or `None` if it should live forever.
///
/// Jitter keeps replicas sharing one lifetime from restarting together.
pub fn lifespan(lifetime: Option<&str>) -> Option<Duration> {
    lifespan_with(lifetime, &mut rand::thread_rng())
}

pub fn lifespan_with<R: Rng + ?Sized>(lifetime: Option<&str>, rng: &mut R) -> Option<Duration> {
    let raw = lifetime.filter(|raw| !raw.trim().is_empty())?;
    match parse_lifetime(raw) {
        Ok(base) => {
            let jitter = rng.gen_range(0..MAX_JITTER_SECS);
            Some(Duration::from_secs(base.as_secs() + jitter))
        }
        Err(err) => {
            log::warn!("Lifetime is ignored: {err}");
            None
        }
    }
}

/// Sleeps for `lifespan`. Returns `true` when time is up, `false` when
/// cancelled first.
pub async fn expire(lifespan: Duration, cancel: CancellationToken) -> bool {
    log::info!("Pod will live for a total of {} seconds", lifespan.as_secs());
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(lifespan) => {
            log::info!("Pod time is up. Total time is {} seconds", lifespan.as_secs());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn lifespan_adds_bounded_jitter() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let total = lifespan_with(Some("10s"), &mut rng).unwrap();
            assert!(total >= Duration::from_secs(10));
            assert!(total < Duration::from_secs(40));
        }
    }

    #[test]
    fn lifespan_uses_whole_base_seconds() {
        let mut rng = StdRng::seed_from_u64(1);
        let total = lifespan_with(Some("1500ms"), &mut rng).unwrap();
        assert_eq!(total.subsec_nanos(), 0);
        assert!(total >= Duration::from_secs(1));
    }

    #[test]
    fn unset_or_invalid_lifetime_disables_expiry() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(lifespan_with(None, &mut rng), None);
        assert_eq!(lifespan_with(Some(""), &mut rng), None);
        assert_eq!(lifespan_with(Some("bogus"), &mut rng), None);
        assert_eq!(lifespan_with(Some("-5m"), &mut rng), None);
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_lifetime("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_lifetime("1h 30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_lifetime("soon").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_lifespan() {
        let start = tokio::time::Instant::now();
        assert!(expire(Duration::from_secs(12), CancellationToken::new()).await);
        assert!(start.elapsed() >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_over_expiry() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(expire(Duration::from_secs(60), cancel.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        assert!(!handle.await.unwrap());
    }
}
