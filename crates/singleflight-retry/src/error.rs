//! Error types for the retry controller
//!
//! Every failure a caller can observe is a [`RetryError`]. Failures of the
//! attempted operation itself are retried internally and only surface once they
//! turn into one of the terminal variants below.

use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by caller-supplied collaborators (`setup`, `attempt`).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for retry controller operations.
pub type Result<T> = std::result::Result<T, RetryError>;

/// Errors surfaced by a [`RetryController`](crate::RetryController).
///
/// The type is `Clone` because a single request cycle is shared by every
/// concurrent caller, and each of them receives the same outcome.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// The controller was built without a required collaborator.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The delay policy asked to stop retrying.
    #[error("Retries aborted after {failures} attempts")]
    Aborted {
        /// Failed attempts recorded when the policy gave up
        failures: u32,
    },

    /// A wait or attempt was entered after `end()` was called.
    #[error("{name} has been stopped")]
    Stopped {
        /// Controller name
        name: String,
    },

    /// An armed backoff wait was cancelled by `end()`.
    #[error("Retries of {name} ended")]
    Ended {
        /// Controller name
        name: String,
    },

    /// More failures were recorded than the configured limit allows.
    #[error("Retry limit reached")]
    RetryLimit {
        /// The configured limit
        limit: u32,
    },

    /// Nothing is pending and no new cycle may be started.
    #[error("No available instance")]
    NoInstance,

    /// The setup step of a cycle failed.
    #[error("Setup of {name} failed: {source}")]
    Setup {
        /// Controller name
        name: String,
        /// Error returned by the setup step
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The task driving a cycle panicked or was cancelled by the runtime.
    #[error("Retry cycle interrupted: {0}")]
    Interrupted(String),
}

impl RetryError {
    pub(crate) fn setup(name: &str, source: BoxError) -> Self {
        Self::Setup {
            name: name.to_string(),
            source: Arc::from(source),
        }
    }

    pub(crate) fn stopped(name: &str) -> Self {
        Self::Stopped {
            name: name.to_string(),
        }
    }

    pub(crate) fn ended(name: &str) -> Self {
        Self::Ended {
            name: name.to_string(),
        }
    }

    /// Whether this error came from shutting the controller down.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            Self::Stopped { .. } | Self::Ended { .. } | Self::NoInstance
        )
    }
}

/// Outcome of one pass through the attempt loop.
///
/// Transient failures are eligible for another attempt; terminal ones end the
/// cycle as they are.
#[derive(Debug)]
pub(crate) enum Failure {
    Transient(BoxError),
    Terminal(RetryError),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(err) => write!(f, "{}", err),
            Self::Terminal(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RetryError::Aborted { failures: 3 }.to_string(),
            "Retries aborted after 3 attempts"
        );
        assert_eq!(
            RetryError::stopped("db").to_string(),
            "db has been stopped"
        );
        assert_eq!(RetryError::ended("db").to_string(), "Retries of db ended");
        assert_eq!(
            RetryError::RetryLimit { limit: 1 }.to_string(),
            "Retry limit reached"
        );
        assert_eq!(RetryError::NoInstance.to_string(), "No available instance");
    }

    #[test]
    fn test_setup_error_keeps_source() {
        let err = RetryError::setup("db", Box::new(std::io::Error::other("disk gone")));

        assert_eq!(err.to_string(), "Setup of db failed: disk gone");
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert_eq!(source.to_string(), "disk gone");

        // Clones share the same source
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), err.to_string());
    }

    #[test]
    fn test_is_shutdown() {
        assert!(RetryError::stopped("x").is_shutdown());
        assert!(RetryError::ended("x").is_shutdown());
        assert!(RetryError::NoInstance.is_shutdown());
        assert!(!RetryError::Aborted { failures: 1 }.is_shutdown());
        assert!(!RetryError::RetryLimit { limit: 2 }.is_shutdown());
    }
}
