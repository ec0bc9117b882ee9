//! Error types for nodegroup

use thiserror::Error;

/// Result type for node discovery and cooperative allocation
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for node discovery and cooperative allocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null, out-of-range or otherwise unusable input, including protocol misuse
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation of local bookkeeping structures failed
    #[error("Out of resources: {0}")]
    OutOfResources(String),

    /// The communication collaborator reported an error on a collective call
    #[error("Collective {op} failed (code {code})")]
    CollectiveFailure {
        /// Name of the failing collective operation
        op: &'static str,
        /// Return code reported by the collaborator
        code: i32,
    },

    /// A host name could not be folded into a network identifier
    #[error("Cannot resolve host '{host}': {reason}")]
    Resolution {
        /// Host name that failed to resolve
        host: String,
        /// Resolver diagnostic
        reason: String,
    },

    /// No pid is recorded for the given node-local rank
    #[error("No pid recorded for node rank {0}")]
    NotFound(i32),

    /// Shared segment creation or attachment failed
    #[error("System error: {0}")]
    System(String),

    /// MPI has already been initialized
    #[error("MPI has already been initialized")]
    AlreadyInitialized,
}

impl Error {
    /// Create a collective failure from a non-zero collaborator return code.
    pub fn from_code(code: i32, op: &'static str) -> Self {
        debug_assert!(code != 0, "from_code called with success code");
        Error::CollectiveFailure { op, code }
    }

    /// Check a collaborator return code, returning Ok(()) for success.
    pub fn check(code: i32, op: &'static str) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(Error::from_code(code, op))
        }
    }

    /// Whether this error came out of a collective exchange.
    pub fn is_collective(&self) -> bool {
        matches!(self, Error::CollectiveFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_success_and_failure() {
        assert!(Error::check(0, "allgather").is_ok());
        let err = Error::check(15, "allgather").unwrap_err();
        assert_eq!(
            err,
            Error::CollectiveFailure {
                op: "allgather",
                code: 15
            }
        );
        assert!(err.is_collective());
    }

    #[test]
    fn display_messages() {
        let err = Error::Resolution {
            host: "n001".into(),
            reason: "no address".into(),
        };
        assert_eq!(err.to_string(), "Cannot resolve host 'n001': no address");
        assert_eq!(
            Error::NotFound(3).to_string(),
            "No pid recorded for node rank 3"
        );
        assert!(!Error::System("shm".into()).is_collective());
    }

    #[test]
    fn lifecycle_error_is_not_collective() {
        let err = Error::AlreadyInitialized;
        assert_eq!(err.to_string(), "MPI has already been initialized");
        assert!(!err.is_collective());
    }
}
