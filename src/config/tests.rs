use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use tokio_test::assert_ok;

use super::*;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

fn field_of(err: GatewayError) -> &'static str {
    match err {
        GatewayError::Config { field, .. } => field,
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_defaults_are_valid() {
    let config = GatewayConfig::default();
    assert_ok!(config.validate());
    assert_eq!(config.limiter.algorithm, Algorithm::SlidingWindow);
    assert_eq!(config.storage.backend, BackendKind::Memory);
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(5));
}

#[test]
fn test_env_overrides_defaults() {
    let env = ConfigOverrides::from_lookup(lookup(&[
        ("ADDR", ":9090"),
        ("ALGORITHM", "token_bucket"),
        ("RATE", "7"),
        ("WINDOW", "30s"),
        ("BURST", "3"),
    ]))
    .unwrap();

    let config = GatewayConfig::resolve(None, &env, &ConfigOverrides::default()).unwrap();
    assert_eq!(config.server.addr, ":9090");
    assert_eq!(config.bind_addr(), "0.0.0.0:9090");
    assert_eq!(config.limiter.algorithm, Algorithm::TokenBucket);
    assert_eq!(config.limiter.rate, 7);
    assert_eq!(config.limiter.window, Duration::from_secs(30));
    assert_eq!(config.limiter.burst, 3);
}

#[test]
fn test_flags_win_over_env_and_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"limiter": {{"algorithm": "fixed_window", "rate": 5, "window": "2m"}},
            "storage": {{"redis": {{"host": "cache.internal", "port": 6380}}}}}}"#
    )
    .unwrap();

    let env = ConfigOverrides::from_lookup(lookup(&[("RATE", "6")])).unwrap();
    let flags = ConfigOverrides {
        rate: Some(8),
        ..Default::default()
    };

    let config = GatewayConfig::resolve(Some(file.path()), &env, &flags).unwrap();
    assert_eq!(config.limiter.algorithm, Algorithm::FixedWindow, "file value kept");
    assert_eq!(config.limiter.window, Duration::from_secs(120));
    assert_eq!(config.limiter.rate, 8, "flag beats env beats file");
    assert_eq!(config.storage.redis.url(), "redis://cache.internal:6380/0");
}

#[test]
fn test_rejections_name_the_field() {
    let cases: Vec<(ConfigOverrides, &str)> = vec![
        (
            ConfigOverrides {
                algorithm: Some("leaky_bucket".into()),
                ..Default::default()
            },
            "algorithm",
        ),
        (
            ConfigOverrides {
                rate: Some(0),
                ..Default::default()
            },
            "rate",
        ),
        (
            ConfigOverrides {
                burst: Some(-1),
                ..Default::default()
            },
            "burst",
        ),
        (
            ConfigOverrides {
                window: Some("soon".into()),
                ..Default::default()
            },
            "window",
        ),
        (
            ConfigOverrides {
                window: Some("0s".into()),
                ..Default::default()
            },
            "window",
        ),
        (
            ConfigOverrides {
                addr: Some("  ".into()),
                ..Default::default()
            },
            "addr",
        ),
        (
            ConfigOverrides {
                storage_backend: Some("etcd".into()),
                ..Default::default()
            },
            "storage_backend",
        ),
    ];

    for (flags, expected) in cases {
        let err = GatewayConfig::resolve(None, &ConfigOverrides::default(), &flags).unwrap_err();
        assert_eq!(field_of(err), expected, "overrides: {:?}", flags);
    }
}

#[test]
fn test_window_upper_bound() {
    let mut settings = LimiterSettings {
        window: MAX_WINDOW,
        ..Default::default()
    };
    assert_ok!(settings.validate());

    for window in [MAX_WINDOW + Duration::from_millis(1), Duration::from_secs(u64::MAX)] {
        settings.window = window;
        assert_eq!(field_of(settings.validate().unwrap_err()), "window");
    }

    let flags = ConfigOverrides {
        window: Some("5000years".into()),
        ..Default::default()
    };
    let err = GatewayConfig::resolve(None, &ConfigOverrides::default(), &flags).unwrap_err();
    assert_eq!(field_of(err), "window");
}

#[test]
fn test_shared_backends_require_sliding_window() {
    for backend in ["redis", "crdt"] {
        let flags = ConfigOverrides {
            algorithm: Some("token_bucket".into()),
            storage_backend: Some(backend.into()),
            ..Default::default()
        };
        let err = GatewayConfig::resolve(None, &ConfigOverrides::default(), &flags).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "invalid algorithm: algorithm \"token_bucket\" is unsupported with {} backend; use \"sliding_window\"",
                backend
            )
        );

        let flags = ConfigOverrides {
            algorithm: Some("sliding_window".into()),
            storage_backend: Some(backend.into()),
            ..Default::default()
        };
        GatewayConfig::resolve(None, &ConfigOverrides::default(), &flags).unwrap();
    }
}

#[test]
fn test_env_parse_failures() {
    let err = ConfigOverrides::from_lookup(lookup(&[("RATE", "ten")])).unwrap_err();
    assert_eq!(field_of(err), "rate");

    let env = ConfigOverrides::from_lookup(lookup(&[("RATE", "  "), ("CRDT_PEERS", "a:1, ,b:2")]))
        .unwrap();
    assert!(env.rate.is_none(), "blank values are ignored");
    assert_eq!(env.crdt_peers, Some(vec!["a:1".to_string(), "b:2".to_string()]));
}

#[test]
fn test_redis_url_includes_password() {
    let redis = RedisConfig {
        password: Some("s3cret".into()),
        db: 2,
        ..Default::default()
    };
    assert_eq!(redis.url(), "redis://:s3cret@127.0.0.1:6379/2");
    assert_eq!(redis.redacted_url(), "redis://127.0.0.1:6379/2");
}
