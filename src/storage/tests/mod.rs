// src/storage/tests/mod.rs

mod mock_tests;

// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::{ScoreRange, SetOptions, StoreDriver};

    // Test basic string operations that should work on any driver
    pub async fn test_basic_operations<D: StoreDriver + ?Sized>(driver: &D) -> Result<()> {
        let key = "test_basic_key";

        // Set and read back
        assert!(driver.set(key, "test_value", SetOptions::default()).await?);
        assert_eq!(driver.get(key).await?.as_deref(), Some("test_value"));

        // NX refuses to overwrite, XX refuses to create
        assert!(!driver
            .set(key, "other", SetOptions::default().only_if_absent())
            .await?);
        assert!(!driver
            .set("test_basic_absent", "v", SetOptions::default().only_if_present())
            .await?);
        assert_eq!(driver.get("test_basic_absent").await?, None);

        // Counters
        let counter_key = "test_counter";
        assert_eq!(driver.incr(counter_key, 1).await?, 1);
        assert_eq!(driver.incr(counter_key, 3).await?, 4);

        // Multi-key delete counts only keys that existed
        let removed = driver.del(&[key, counter_key, "test_never_set"]).await?;
        assert_eq!(removed, 2);
        assert_eq!(driver.get(key).await?, None);

        Ok(())
    }

    // Test sorted-set operations used by the sliding window
    pub async fn test_sorted_set_operations<D: StoreDriver + ?Sized>(driver: &D) -> Result<()> {
        let key = "test_zset_key";
        let _ = driver.del(&[key]).await?;

        assert_eq!(driver.zadd(key, "a", 100.0).await?, 1);
        assert_eq!(driver.zadd(key, "b", 101.5).await?, 1);
        assert_eq!(driver.zadd(key, "c", 103.0).await?, 1);
        // Re-scoring an existing member adds nothing
        assert_eq!(driver.zadd(key, "c", 102.0).await?, 0);
        assert_eq!(driver.zcard(key).await?, 3);

        let oldest = driver.zrange_withscores(key, 0, 0).await?;
        assert_eq!(oldest, vec![("a".to_string(), 100.0)]);

        // Strictly below 101.5 removes only "a"
        assert_eq!(driver.zremrangebyscore(key, ScoreRange::below(101.5)).await?, 1);
        assert_eq!(driver.zcard(key).await?, 2);

        assert!(driver.expire(key, Duration::from_secs(60)).await?);
        assert!(!driver.expire("test_zset_missing", Duration::from_secs(60)).await?);

        driver.del(&[key]).await?;
        Ok(())
    }
}
