#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::common;
    use crate::config::RedisConfig;
    use crate::error::{GatewayError, StorageError};
    use crate::storage::{RedisStorage, StorageBackend};
    use crate::test_utils;

    fn local_config() -> RedisConfig {
        RedisConfig {
            dial_timeout: Duration::from_millis(500),
            max_retries: 0,
            ..Default::default()
        }
    }

    // Returns a connected store, or None when no Redis is running locally
    async fn create_test_redis() -> Option<RedisStorage> {
        match RedisStorage::open(local_config(), test_utils::shared_clock()).await {
            Ok(storage) => Some(storage),
            Err(err) => {
                println!("Redis not available, skipping: {}", err);
                None
            }
        }
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_a_connection_error() {
        let config = RedisConfig {
            port: 1,
            dial_timeout: Duration::from_millis(200),
            max_retries: 1,
            ..Default::default()
        };

        let err = RedisStorage::open(config, test_utils::shared_clock())
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                GatewayError::Storage(StorageError::RedisConnection(_))
                    | GatewayError::Storage(StorageError::RedisCommand(_))
            ),
            "unexpected error: {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_redis_basic_operations() {
        let Some(redis) = create_test_redis().await else {
            return;
        };
        redis.delete("test_counter").await.unwrap();
        common::test_basic_operations(&redis).await.unwrap();
        redis.delete("test_basic_key").await.unwrap();
        redis.delete("test_counter").await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_pipeline_operations() {
        let Some(redis) = create_test_redis().await else {
            return;
        };
        redis.delete("pipe_counter").await.unwrap();
        common::test_pipeline_operations(&redis).await.unwrap();
        redis.delete("pipe_key1").await.unwrap();
        redis.delete("pipe_counter").await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_millisecond_ttl() {
        let Some(redis) = create_test_redis().await else {
            return;
        };

        redis
            .set("test_redis_ms_ttl", b"v", Some(Duration::from_millis(150)))
            .await
            .unwrap();
        assert!(redis.exists("test_redis_ms_ttl").await.unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!redis.exists("test_redis_ms_ttl").await.unwrap());
    }

    #[test]
    fn test_debug_hides_password() {
        let config = RedisConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!config.redacted_url().contains("hunter2"));
    }
}
