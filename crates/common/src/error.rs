use thiserror::Error;

use crate::ids::JobId;

/// Canonical DQE error taxonomy used across crates.
///
/// Classification guidance:
/// - [`DqeError::IllegalState`]: lifecycle/structural violations by the caller
/// - [`DqeError::InvalidArgument`]: inconsistent constructor arguments
/// - [`DqeError::Codec`]: stream encode/decode failures
/// - [`DqeError::Execution`]: runtime failures of owned resources
/// - [`DqeError::JobClosed`]: work abandoned because its job was closed
/// - [`DqeError::InvalidConfig`]: config/environment contract violations
/// - [`DqeError::Io`]: raw filesystem/network IO failures from std APIs
#[derive(Debug, Error)]
pub enum DqeError {
    /// An operation is not valid in the current state of the receiver.
    ///
    /// Examples:
    /// - a second page downstream registration for the same execution node
    /// - registering into a job execution context that was already closed
    /// - creating a job context for a job id that is already tracked
    ///
    /// These indicate planner/executor misbehavior and must not be retried.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Constructor arguments do not agree with each other.
    ///
    /// Examples:
    /// - order-by item count differs from the reverse flag count
    /// - a bounded limit that collides with the unbounded sentinel
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stream encoding/decoding failures.
    #[error("codec error: {0}")]
    Codec(String),

    /// Runtime execution failures, e.g. a collect operation that fails to release.
    #[error("execution error: {0}")]
    Execution(String),

    /// A pending lookup was abandoned because the owning job was closed.
    #[error("job {0} was closed")]
    JobClosed(JobId),

    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard DQE result alias.
pub type Result<T> = std::result::Result<T, DqeError>;
