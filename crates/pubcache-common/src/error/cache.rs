//! Cache error types.

use std::fmt;
use thiserror::Error;

use crate::types::{DictionaryId, ScopeId, WriterId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid configuration.
    InvalidConfig = 0x0002,

    // Lock errors (0x0100 - 0x01FF)
    /// The write lock is held by another writer.
    LockConflict = 0x0100,
    /// A mutation was attempted without holding the write lock.
    NotWriteLocked = 0x0101,

    // Lifecycle errors (0x0200 - 0x02FF)
    /// The dictionary has been disposed.
    Disposed = 0x0200,
    /// The scope has already exited.
    ScopeExited = 0x0201,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Lock",
            0x02 => "Lifecycle",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The main error type for the cache.
///
/// Missing keys are not errors; lookups return `Ok(None)`. Rolling back a
/// write lock is not an error either.
///
/// # Example
///
/// ```rust
/// use pubcache_common::error::{CacheError, CacheResult};
/// use pubcache_common::types::DictionaryId;
///
/// fn write(dictionary: DictionaryId, locked: bool) -> CacheResult<()> {
///     if !locked {
///         return Err(CacheError::NotWriteLocked { dictionary });
///     }
///     Ok(())
/// }
///
/// assert!(write(DictionaryId::new(1), false).is_err());
/// ```
#[derive(Debug, Error)]
pub enum CacheError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Lock Errors
    // ==========================================================================
    /// The write lock is held by a different writer.
    #[error("{dictionary} is write-locked by {holder}, cannot lock for {requester}")]
    LockConflict {
        /// The locked dictionary.
        dictionary: DictionaryId,
        /// The writer currently holding the lock.
        holder: WriterId,
        /// The writer that asked for the lock.
        requester: WriterId,
    },

    /// A mutation was attempted without holding the write lock.
    #[error("{dictionary} is not write-locked")]
    NotWriteLocked {
        /// The dictionary.
        dictionary: DictionaryId,
    },

    // ==========================================================================
    // Lifecycle Errors
    // ==========================================================================
    /// The dictionary has been disposed.
    #[error("{dictionary} has been disposed")]
    Disposed {
        /// The disposed dictionary.
        dictionary: DictionaryId,
    },

    /// The scope has already exited and accepts no new participants.
    #[error("{scope} has already exited")]
    ScopeExited {
        /// The exited scope.
        scope: ScopeId,
    },
}

impl CacheError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::LockConflict { .. } => ErrorCode::LockConflict,
            Self::NotWriteLocked { .. } => ErrorCode::NotWriteLocked,
            Self::Disposed { .. } => ErrorCode::Disposed,
            Self::ScopeExited { .. } => ErrorCode::ScopeExited,
        }
    }

    /// Returns true if this error is retryable.
    ///
    /// A lock conflict clears once the holder releases the lock.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = CacheError::Disposed {
            dictionary: DictionaryId::new(3),
        };
        assert_eq!(err.code(), ErrorCode::Disposed);
        assert_eq!(err.code().category(), "Lifecycle");
        assert_eq!(ErrorCode::LockConflict.as_u16(), 0x0100);
        assert_eq!(ErrorCode::LockConflict.category(), "Lock");
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::NotWriteLocked {
            dictionary: DictionaryId::new(42),
        };
        assert_eq!(err.to_string(), "snapdict#42 is not write-locked");

        let err = CacheError::LockConflict {
            dictionary: DictionaryId::new(1),
            holder: WriterId::Scope(ScopeId::new(2)),
            requester: WriterId::Scope(ScopeId::new(3)),
        };
        assert_eq!(
            err.to_string(),
            "snapdict#1 is write-locked by scope#2, cannot lock for scope#3"
        );
    }

    #[test]
    fn test_retryable() {
        let conflict = CacheError::LockConflict {
            dictionary: DictionaryId::new(1),
            holder: WriterId::current_thread(),
            requester: WriterId::Scope(ScopeId::new(1)),
        };
        assert!(conflict.is_retryable());
        assert!(!CacheError::internal("boom").is_retryable());
        assert!(!CacheError::ScopeExited {
            scope: ScopeId::new(1)
        }
        .is_retryable());
    }

    #[test]
    fn test_helpers() {
        let err = CacheError::invalid_config("delta must be positive");
        assert_eq!(err.code(), ErrorCode::InvalidConfig);
        assert_eq!(
            err.to_string(),
            "invalid configuration: delta must be positive"
        );
    }
}
