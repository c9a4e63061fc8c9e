//! Error types for MarrowDB.

use thiserror::Error;

/// Result type alias using MarrowError.
pub type Result<T> = std::result::Result<T, MarrowError>;

/// Errors that can occur in MarrowDB storage operations.
///
/// Variants fall into four families with distinct handling contracts:
/// corruption (fatal for the affected file), constraint violations
/// (recoverable, mutation rolled back before the error is raised),
/// capacity limits (recoverable, no partial write), and not-found
/// results (normal negative outcomes).
#[derive(Debug, Error)]
pub enum MarrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Corruption (fatal for the file)
    #[error("File corrupted: {file}, reason: {reason}")]
    Corrupted { file: String, reason: String },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u64, reason: String },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    // Constraint violations (recoverable)
    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Null value not allowed in column '{0}'")]
    NullNotAllowed(String),

    // Capacity limits (recoverable)
    #[error("Tuple too large: {size} bytes (max {max})")]
    TupleTooLarge { size: usize, max: usize },

    #[error("Index node overflow: {size} bytes (max {max})")]
    NodeOverflow { size: usize, max: usize },

    #[error("Page full, unable to insert tuple")]
    PageFull,

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Not-found results
    #[error("Tuple not found at page {page_num}, slot {slot}")]
    TupleNotFound { page_num: u32, slot: u16 },

    #[error("Key not found")]
    KeyNotFound,

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    // Type errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarrowError {
    /// Returns true if this error indicates structural corruption.
    ///
    /// Corruption is fatal for the affected file: callers must not retry
    /// and should take the file out of service.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            MarrowError::Corrupted { .. }
                | MarrowError::PageCorrupted { .. }
                | MarrowError::IndexCorrupted(_)
        )
    }

    /// Returns true if the failed operation left prior state untouched
    /// and the caller may continue using the file.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MarrowError::DuplicateKey(_)
                | MarrowError::NullNotAllowed(_)
                | MarrowError::TupleTooLarge { .. }
                | MarrowError::NodeOverflow { .. }
                | MarrowError::PageFull
                | MarrowError::BufferPoolFull
        ) || self.is_not_found()
    }

    /// Returns true if this is a normal negative result rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MarrowError::TupleNotFound { .. }
                | MarrowError::KeyNotFound
                | MarrowError::PageNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: MarrowError = io_err.into();
        assert!(matches!(err, MarrowError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_corrupted_display() {
        let err = MarrowError::Corrupted {
            file: "users.dat".to_string(),
            reason: "bad magic".to_string(),
        };
        assert_eq!(err.to_string(), "File corrupted: users.dat, reason: bad magic");
    }

    #[test]
    fn test_page_corrupted_display() {
        let err = MarrowError::PageCorrupted {
            page_id: 100,
            reason: "slot offset out of bounds".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Page corrupted: 100, reason: slot offset out of bounds"
        );
    }

    #[test]
    fn test_duplicate_key_display() {
        let err = MarrowError::DuplicateKey("(42)".to_string());
        assert_eq!(err.to_string(), "Duplicate key violation: (42)");
    }

    #[test]
    fn test_null_not_allowed_display() {
        let err = MarrowError::NullNotAllowed("email".to_string());
        assert_eq!(err.to_string(), "Null value not allowed in column 'email'");
    }

    #[test]
    fn test_tuple_too_large_display() {
        let err = MarrowError::TupleTooLarge { size: 4096, max: 2048 };
        assert_eq!(err.to_string(), "Tuple too large: 4096 bytes (max 2048)");
    }

    #[test]
    fn test_node_overflow_display() {
        let err = MarrowError::NodeOverflow { size: 5000, max: 4096 };
        assert_eq!(err.to_string(), "Index node overflow: 5000 bytes (max 4096)");
    }

    #[test]
    fn test_tuple_not_found_display() {
        let err = MarrowError::TupleNotFound { page_num: 3, slot: 7 };
        assert_eq!(err.to_string(), "Tuple not found at page 3, slot 7");
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = MarrowError::TypeMismatch {
            expected: "INT".to_string(),
            actual: "TEXT".to_string(),
        };
        assert_eq!(err.to_string(), "Type mismatch: expected INT, got TEXT");
    }

    #[test]
    fn test_is_corruption() {
        assert!(MarrowError::Corrupted {
            file: "t.dat".to_string(),
            reason: "x".to_string()
        }
        .is_corruption());
        assert!(MarrowError::PageCorrupted {
            page_id: 1,
            reason: "x".to_string()
        }
        .is_corruption());
        assert!(MarrowError::IndexCorrupted("x".to_string()).is_corruption());

        assert!(!MarrowError::KeyNotFound.is_corruption());
        assert!(!MarrowError::PageFull.is_corruption());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MarrowError::DuplicateKey("k".to_string()).is_recoverable());
        assert!(MarrowError::TupleTooLarge { size: 1, max: 0 }.is_recoverable());
        assert!(MarrowError::KeyNotFound.is_recoverable());

        assert!(!MarrowError::IndexCorrupted("x".to_string()).is_recoverable());
        assert!(!MarrowError::Internal("x".to_string()).is_recoverable());
    }

    #[test]
    fn test_is_not_found() {
        assert!(MarrowError::KeyNotFound.is_not_found());
        assert!(MarrowError::TupleNotFound { page_num: 0, slot: 0 }.is_not_found());
        assert!(MarrowError::PageNotFound { page_id: 9 }.is_not_found());

        assert!(!MarrowError::DuplicateKey("k".to_string()).is_not_found());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(MarrowError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MarrowError>();
    }
}
