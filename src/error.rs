//! Error types for the phrasecast delivery pipeline.

use std::time::Duration;

use crate::surface::SurfaceKey;

/// Top-level error type for the delivery scheduler.
#[derive(Debug, thiserror::Error)]
pub enum PhrasecastError {
    /// Input rejected before any work started (empty criteria, bad config value).
    #[error("validation error: {0}")]
    Validation(String),

    /// Durable key-value store read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The rendering boundary rejected or failed an update.
    #[error("dispatch to surface '{surface}' failed: {reason}")]
    Dispatch {
        /// Surface the update was addressed to.
        surface: SurfaceKey,
        /// Boundary-provided failure reason.
        reason: String,
    },

    /// The rendering boundary did not acknowledge in time.
    #[error("dispatch to surface '{surface}' timed out after {timeout:?}")]
    DispatchTimeout {
        /// Surface the update was addressed to.
        surface: SurfaceKey,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A whole tick exceeded its wall-clock budget.
    #[error("tick timed out after {0:?}")]
    TickTimeout(Duration),

    /// Some surfaces were updated during a tick, others failed.
    #[error("partial dispatch failure: failed {failed:?}, updated {updated:?}")]
    PartialDispatch {
        /// Surfaces whose dispatch failed.
        failed: Vec<SurfaceKey>,
        /// Surfaces updated successfully before the tick gave up.
        updated: Vec<SurfaceKey>,
    },

    /// The content catalog could not be loaded.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// No surface is registered under the given key.
    #[error("unknown surface: {0}")]
    UnknownSurface(SurfaceKey),

    /// Internal invariant violated; indicates a programming error.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retry classification of a [`PhrasecastError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Terminal; never retried.
    Validation,
    /// Network-like or I/O failure; retried with backoff.
    Transient,
    /// Programming error; never retried.
    Invariant,
}

impl PhrasecastError {
    /// Classify this error for the work-execution retry loop.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::UnknownSurface(_) => {
                ErrorClass::Validation
            }
            Self::Storage(_)
            | Self::Dispatch { .. }
            | Self::DispatchTimeout { .. }
            | Self::TickTimeout(_)
            | Self::PartialDispatch { .. }
            | Self::Io(_) => ErrorClass::Transient,
            Self::Catalog(_) | Self::Invariant(_) => ErrorClass::Invariant,
        }
    }

    /// Returns `true` when the work facility should retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<rusqlite::Error> for PhrasecastError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PhrasecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_terminal() {
        let err = PhrasecastError::Validation("no tiers selected".to_owned());
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn io_and_dispatch_errors_are_retryable() {
        let io = PhrasecastError::Io(std::io::Error::other("disk"));
        assert!(io.is_retryable());

        let timeout = PhrasecastError::DispatchTimeout {
            surface: SurfaceKey::main(),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_retryable());
        assert!(PhrasecastError::TickTimeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn invariant_errors_are_not_retried() {
        let err = PhrasecastError::Invariant("primary tier missing".to_owned());
        assert_eq!(err.class(), ErrorClass::Invariant);
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_names_the_surface() {
        let err = PhrasecastError::Dispatch {
            surface: SurfaceKey::hero(),
            reason: "renderer offline".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "dispatch to surface 'hero' failed: renderer offline"
        );
    }
}
