#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    use crate::algorithms::{Limiter, TokenBucket};
    use crate::config::Algorithm;
    use crate::test_utils::{memory_store, settings, start_time, virtual_clock};

    #[tokio::test]
    async fn test_burst_then_refill() {
        let clock = virtual_clock();
        // 2 tokens per minute: one token every 30s, bucket of 3
        let limiter = TokenBucket::new(
            memory_store(&clock),
            &settings(Algorithm::TokenBucket, 2, Duration::from_secs(60), 3),
            clock.clone(),
        );

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("client").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }

        let denied = limiter.check("client").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_at, Some(start_time() + ChronoDuration::seconds(30)));
        assert_eq!(denied.reset_at, start_time() + ChronoDuration::seconds(90));

        clock.advance(Duration::from_secs(15));
        assert!(!limiter.check("client").await.unwrap().allowed, "half a token only");

        clock.advance(Duration::from_secs(15));
        let refilled = limiter.check("client").await.unwrap();
        assert!(refilled.allowed, "fractional refill accumulates");
        assert_eq!(refilled.remaining, 0);
    }

    #[tokio::test]
    async fn test_refill_caps_at_capacity() {
        let clock = virtual_clock();
        let limiter = TokenBucket::new(
            memory_store(&clock),
            &settings(Algorithm::TokenBucket, 10, Duration::from_secs(1), 2),
            clock.clone(),
        );

        assert!(limiter.check("k").await.unwrap().allowed);
        clock.advance(Duration::from_secs(3600));

        let decision = limiter.check("k").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1, "never more than the burst");
    }
}
