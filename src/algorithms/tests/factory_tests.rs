#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::algorithms::build_limiter;
    use crate::config::{Algorithm, LimiterSettings};
    use crate::error::GatewayError;
    use crate::test_utils::{memory_config, settings, virtual_clock};

    #[tokio::test]
    async fn test_dispatches_on_algorithm() {
        for algorithm in Algorithm::ALL {
            let limiter = build_limiter(
                &settings(algorithm, 2, Duration::from_secs(60), 2),
                &memory_config(),
                virtual_clock(),
            )
            .unwrap();
            assert_eq!(limiter.name(), algorithm.as_str());

            assert!(limiter.check("k").await.unwrap().allowed);
            assert!(limiter.check("k").await.unwrap().allowed);
            assert!(!limiter.check("k").await.unwrap().allowed, "{}", algorithm);
        }
    }

    #[test]
    fn test_rejects_unvalidated_settings() {
        let bad = LimiterSettings {
            rate: 0,
            ..Default::default()
        };
        let err = build_limiter(&bad, &memory_config(), virtual_clock()).unwrap_err();
        assert!(matches!(err, GatewayError::Config { field: "rate", .. }));

        let err = "leaky_bucket".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedAlgorithm(ref name) if name == "leaky_bucket"));
    }
}
