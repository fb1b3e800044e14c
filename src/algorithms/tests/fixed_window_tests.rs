#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    use crate::algorithms::{FixedWindow, Limiter};
    use crate::config::Algorithm;
    use crate::test_utils::{memory_store, settings, start_time, virtual_clock};

    #[tokio::test]
    async fn test_window_limit_and_reset() {
        let clock = virtual_clock();
        let limiter = FixedWindow::new(
            memory_store(&clock),
            &settings(Algorithm::FixedWindow, 2, Duration::from_secs(60), 1),
            clock.clone(),
        );

        let first = limiter.check("k1").await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.limit, 2);
        assert_eq!(first.reset_at, start_time() + ChronoDuration::seconds(60));
        assert_eq!(first.retry_at, None);

        clock.advance(Duration::from_secs(30));
        assert!(limiter.check("k1").await.unwrap().allowed);

        let denied = limiter.check("k1").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_at, Some(start_time() + ChronoDuration::seconds(60)));

        // Other keys have their own counters
        assert!(limiter.check("k2").await.unwrap().allowed);

        // A new window starts on the minute boundary
        clock.advance(Duration::from_secs(30));
        let renewed = limiter.check("k1").await.unwrap();
        assert!(renewed.allowed, "window boundary resets the counter");
        assert_eq!(renewed.remaining, 1);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_rate() {
        let clock = virtual_clock();
        let limiter = std::sync::Arc::new(FixedWindow::new(
            memory_store(&clock),
            &settings(Algorithm::FixedWindow, 5, Duration::from_secs(60), 1),
            clock.clone(),
        ));

        let checks = (0..20).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.check("burst").await.unwrap().allowed })
        });
        let allowed = futures::future::join_all(checks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(allowed, 5);
    }
}
