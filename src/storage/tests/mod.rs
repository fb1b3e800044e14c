// src/storage/tests/mod.rs

mod crdt_tests;
mod redis_tests;

// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::{decode_counter, StorageBackend, StoragePipeline as _};

    // Set/get and counters; works on every backend
    pub async fn test_basic_operations<S: StorageBackend>(storage: &S) -> Result<()> {
        let key = "test_basic_key";
        let value: &[u8] = b"test_value";

        storage.set(key, value, None).await?;
        assert_eq!(storage.get(key).await?.as_deref(), Some(value));

        let counter_key = "test_counter";
        assert_eq!(storage.increment(counter_key, 1).await?, 1);
        assert_eq!(storage.increment(counter_key, 3).await?, 4);

        // Counters read back as decimal strings on every backend
        let raw = storage.get(counter_key).await?.unwrap_or_default();
        assert_eq!(decode_counter(&raw)?, 4);

        assert!(storage.exists(key).await?);
        assert!(storage.exists(counter_key).await?);
        assert!(!storage.exists("non_existent_key").await?);

        Ok(())
    }

    // Batched operations come back in insertion order
    pub async fn test_pipeline_operations<S: StorageBackend>(storage: &S) -> Result<()> {
        let mut pipeline = storage.pipeline();
        pipeline
            .set("pipe_key1", b"value1", None)
            .get("pipe_key1")
            .get("pipe_missing")
            .increment("pipe_counter", 5)
            .expire("pipe_key1", Duration::from_secs(60));

        let results = storage.execute_pipeline(pipeline).await?;
        assert_eq!(results.len(), 5);

        let values: Vec<Vec<u8>> = results.into_iter().collect::<Result<_>>()?;
        assert_eq!(values[1], b"value1".to_vec());
        assert!(values[2].is_empty(), "missing keys yield empty values");
        assert_eq!(decode_counter(&values[3])?, 5);
        assert_eq!(decode_counter(&values[4])?, 1, "expire applied");

        Ok(())
    }
}
