// src/client/tests/health_check_tests.rs

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time;
    use tracing_test::traced_test;

    use crate::client::{KvClient, MAX_CONSECUTIVE_FAILURES};
    use crate::storage::DriverConnector;
    use crate::test_utils::{create_test_client, test_client_config, MockConnector, MockDriver};

    const INTERVAL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_health_check_is_throttled() {
        let (client, driver, _) = create_test_client().await;
        let after_connect = driver.ping_count();

        assert!(client.is_connected().await);
        assert_eq!(driver.ping_count(), after_connect + 1);

        // Within the interval the cached flag answers
        assert!(client.is_connected().await);
        time::advance(INTERVAL - Duration::from_secs(1)).await;
        assert!(client.is_connected().await);
        assert_eq!(driver.ping_count(), after_connect + 1);

        // Once the interval has passed the store is probed again
        time::advance(Duration::from_secs(1)).await;
        assert!(client.is_connected().await);
        assert_eq!(driver.ping_count(), after_connect + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_value_survives_store_outage_until_next_probe() {
        let (client, driver, _) = create_test_client().await;
        assert!(client.is_connected().await);

        driver.set_ping_failure(true);
        assert!(client.is_connected().await, "cached flag should still be true");

        time::advance(INTERVAL).await;
        assert!(!client.is_connected().await);
        assert_eq!(client.consecutive_failures().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_trigger_exactly_one_reconnect() {
        let (client, driver, connector) = create_test_client().await;
        assert!(client.is_connected().await);
        assert_eq!(connector.connect_attempts(), 1);

        driver.set_ping_failure(true);
        for failures in 1..MAX_CONSECUTIVE_FAILURES {
            time::advance(INTERVAL).await;
            assert!(!client.is_connected().await);
            assert_eq!(client.consecutive_failures().await, failures);
            assert_eq!(connector.connect_attempts(), 1, "no reconnect yet");
        }

        time::advance(INTERVAL).await;
        assert!(!client.is_connected().await);
        assert_eq!(connector.connect_attempts(), 2);
        assert_eq!(client.consecutive_failures().await, MAX_CONSECUTIVE_FAILURES);
        // The old pool was torn down
        assert!(driver.disconnect_count() >= 1);

        // Store comes back: the next probe reconnects and resets the counter
        driver.set_ping_failure(false);
        time::advance(INTERVAL).await;
        assert!(client.is_connected().await);
        assert_eq!(client.consecutive_failures().await, 0);
        assert_eq!(connector.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_resets_failure_count() {
        let (client, driver, connector) = create_test_client().await;

        driver.set_ping_failure(true);
        assert!(!client.is_connected().await);
        time::advance(INTERVAL).await;
        assert!(!client.is_connected().await);
        assert_eq!(client.consecutive_failures().await, 2);

        driver.set_ping_failure(false);
        time::advance(INTERVAL).await;
        assert!(client.is_connected().await);
        assert_eq!(client.consecutive_failures().await, 0);
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_recovers_when_store_starts_late() {
        let driver = Arc::new(MockDriver::new());
        let connector = Arc::new(MockConnector::new(Arc::clone(&driver)));
        connector.set_connect_failure(true);

        let client = KvClient::connect(
            test_client_config(),
            Arc::clone(&connector) as Arc<dyn DriverConnector>,
        )
        .await
        .unwrap();

        // The failed initial connect counts as the first failure
        assert_eq!(client.consecutive_failures().await, 1);
        assert!(!client.is_connected().await);
        assert_eq!(client.consecutive_failures().await, 2);

        connector.set_connect_failure(false);
        time::advance(INTERVAL).await;
        assert!(client.is_connected().await);
        assert_eq!(connector.connect_attempts(), 2);

        let snapshot = client.health_snapshot().await;
        assert!(snapshot.connected);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.seconds_since_check, Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_client_never_reconnects() {
        let (client, driver, connector) = create_test_client().await;
        client.close().await;

        driver.set_ping_failure(true);
        for _ in 0..5 {
            time::advance(INTERVAL).await;
            assert!(!client.is_connected().await);
        }
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(driver.ping_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_reconnect_is_logged() {
        let (client, driver, _) = create_test_client().await;

        driver.set_ping_failure(true);
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            time::advance(INTERVAL).await;
            client.is_connected().await;
        }

        assert!(logs_contain("Store health check failed"));
        assert!(logs_contain("Attempting to reconnect to store"));
        assert!(logs_contain("Reconnection attempt failed"));
    }
}
