// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Wait error: {0}")]
    Wait(#[from] crate::application::queue::WaitError),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// A failed put carries the rejected item; only the reason crosses into AppError
impl<T> From<crate::application::queue::PutError<T>> for AppError {
    fn from(err: crate::application::queue::PutError<T>) -> Self {
        AppError::Wait(err.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::{PutError, WaitError};
    use crate::domain::DomainError;

    fn put_then_fail() -> Result<()> {
        let put: std::result::Result<(), PutError<String>> =
            Err(PutError::new(String::from("dropped"), WaitError::Cancelled));
        put?;
        Ok(())
    }

    #[test]
    fn test_put_error_keeps_only_reason() {
        let err = put_then_fail().unwrap_err();
        assert!(matches!(err, AppError::Wait(WaitError::Cancelled)));
        assert_eq!(err.to_string(), "Wait error: wait cancelled");
    }

    #[test]
    fn test_domain_error_converts() {
        let err: AppError = DomainError::InvalidCapacity(0).into();
        assert!(err.to_string().starts_with("Domain error: Invalid capacity: 0"));
    }
}
