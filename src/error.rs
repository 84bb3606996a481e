// for error definitions
use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    /// Errors related to the backing store
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors (refused, dropped, I/O)
    #[error("Redis connection error: {0}")]
    Connection(String),

    /// A command or connection attempt exceeded its deadline
    #[error("Redis timeout: {0}")]
    Timeout(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    Auth(String),

    /// Redis command errors, including malformed or unexpected replies
    #[error("Redis command error: {0}")]
    Command(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The connection pool was shut down
    #[error("Connection pool is closed")]
    PoolClosed,

    /// No pool is currently installed
    #[error("Not connected to Redis")]
    NotConnected,
}

impl MonitorError {
    /// Whether this error means the store is unreachable rather than that it
    /// rejected a single command.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MonitorError::Storage(
                StorageError::Connection(_)
                    | StorageError::Timeout(_)
                    | StorageError::Auth(_)
                    | StorageError::PoolClosed
                    | StorageError::NotConnected
            )
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MonitorError::Storage(StorageError::Timeout(_)))
    }
}

impl From<StorageError> for MonitorError {
    fn from(err: StorageError) -> Self {
        MonitorError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for MonitorError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::AuthenticationFailed {
            return MonitorError::Storage(StorageError::Auth(err.to_string()));
        }

        if err.is_timeout() {
            return MonitorError::Storage(StorageError::Timeout(err.to_string()));
        }

        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            return MonitorError::Storage(StorageError::Connection(err.to_string()));
        }

        match err.kind() {
            redis::ErrorKind::TypeError => {
                MonitorError::Storage(StorageError::Serialization(err.to_string()))
            }
            _ => MonitorError::Storage(StorageError::Command(err.to_string())),
        }
    }
}

// implement conversions from serde_json::Error to MonitorError
impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Storage(StorageError::Serialization(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        let timeout = MonitorError::Storage(StorageError::Timeout("PING".into()));
        assert!(timeout.is_connectivity());
        assert!(timeout.is_timeout());

        assert!(MonitorError::from(StorageError::PoolClosed).is_connectivity());
        assert!(MonitorError::from(StorageError::NotConnected).is_connectivity());

        let command = MonitorError::Storage(StorageError::Command("WRONGTYPE".into()));
        assert!(!command.is_connectivity());
        assert!(!MonitorError::Config("bad".into()).is_connectivity());
    }

    #[test]
    fn test_redis_error_conversion() {
        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(MonitorError::from(io).is_connectivity());

        let response = redis::RedisError::from((redis::ErrorKind::ResponseError, "WRONGTYPE"));
        let converted = MonitorError::from(response);
        assert!(matches!(
            converted,
            MonitorError::Storage(StorageError::Command(_))
        ));
        assert!(!converted.is_connectivity());

        let auth = redis::RedisError::from((redis::ErrorKind::AuthenticationFailed, "bad pass"));
        assert!(matches!(
            MonitorError::from(auth),
            MonitorError::Storage(StorageError::Auth(_))
        ));
    }
}
