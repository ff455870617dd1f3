use parley_store::StoreError;
use thiserror::Error;

/// Failures of a single request-protocol call.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid params: {0}")]
    BadParams(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Log store error: {0}")]
    Store(#[from] StoreError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl HostError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            HostError::Cancelled => true,
            HostError::Store(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Message sent back to the UI. Internal details stay in the log.
    pub fn client_message(&self) -> String {
        match self {
            HostError::Store(StoreError::Sqlite(_)) | HostError::Store(StoreError::Io(_)) => {
                "Log store error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_recognised() {
        assert!(HostError::Store(StoreError::Cancelled).is_cancelled());
        assert!(HostError::Cancelled.is_cancelled());
        assert!(!HostError::UnknownMethod("x".into()).is_cancelled());
    }

    #[test]
    fn test_client_message() {
        assert_eq!(
            HostError::UnknownMethod("logs.nope".into()).client_message(),
            "Unknown method: logs.nope"
        );
        let io = StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "/secret/path"));
        assert_eq!(HostError::Store(io).client_message(), "Log store error");
    }
}
