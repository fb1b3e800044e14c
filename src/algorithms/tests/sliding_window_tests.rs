#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    use crate::algorithms::{Limiter, SlidingWindow};
    use crate::config::Algorithm;
    use crate::test_utils::{memory_store, settings, start_time, virtual_clock};

    #[tokio::test]
    async fn test_capacity_returns_as_buckets_slide_out() {
        let clock = virtual_clock();
        let limiter = SlidingWindow::new(
            memory_store(&clock),
            &settings(Algorithm::SlidingWindow, 3, Duration::from_secs(60), 1),
            clock.clone(),
        );

        assert!(limiter.check("user").await.unwrap().allowed);
        clock.advance(Duration::from_secs(20));
        assert!(limiter.check("user").await.unwrap().allowed);
        let third = limiter.check("user").await.unwrap();
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);

        let denied = limiter.check("user").await.unwrap();
        assert!(!denied.allowed);
        // The first hit sits in the bucket starting at 10:00:00
        let expected = start_time() + ChronoDuration::seconds(60);
        assert_eq!(denied.retry_at, Some(expected));
        assert_eq!(denied.reset_at, expected);

        // Unlike a fixed window, hits from 10:00:20 still count at 10:01:00
        clock.advance(Duration::from_secs(40));
        let after = limiter.check("user").await.unwrap();
        assert!(after.allowed, "the oldest hit left the window");
        assert_eq!(after.remaining, 0);
        assert!(!limiter.check("user").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_precision_and_namespace() {
        let clock = virtual_clock();
        let store = memory_store(&clock);
        let limiter = SlidingWindow::new(
            store.clone(),
            &settings(Algorithm::SlidingWindow, 1, Duration::from_secs(10), 1),
            clock.clone(),
        )
        .with_precision(1)
        .with_namespace("custom");

        assert!(limiter.check("a").await.unwrap().allowed);
        assert!(!limiter.check("a").await.unwrap().allowed);

        let bucket = start_time().timestamp_millis() / 10_000;
        let raw = crate::storage::StorageBackend::get(&store, &format!("custom:a:{}", bucket))
            .await
            .unwrap();
        assert_eq!(raw, Some(b"1".to_vec()));

        clock.advance(Duration::from_secs(10));
        assert!(limiter.check("a").await.unwrap().allowed);
    }
}
