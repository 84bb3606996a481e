#[cfg(test)]
mod tests {
    use crate::test_utils::MockDriver;

    use super::super::common;

    // The mock must behave like Redis for the commands the client relies on
    #[tokio::test]
    async fn test_mock_basic_operations() {
        let driver = MockDriver::new();
        let result = common::test_basic_operations(&driver).await;
        assert!(result.is_ok(), "Mock basic operations failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_mock_sorted_set_operations() {
        let driver = MockDriver::new();
        let result = common::test_sorted_set_operations(&driver).await;
        assert!(result.is_ok(), "Mock sorted set operations failed: {:?}", result);
        assert_eq!(driver.members("test_zset_key"), Vec::new());
    }
}
