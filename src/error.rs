use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Job not found: {0}")]
    UnknownJob(Uuid),

    #[error("Job table at capacity ({0} jobs)")]
    AtCapacity(usize),

    #[error("Insufficient capacity: {needed} tasks but only {live} live candidate nodes")]
    InsufficientCapacity { needed: usize, live: usize },

    #[error("Session deadline expired with {replies} of {needed} required probe replies")]
    SessionTimeout { replies: usize, needed: usize },

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// True for failures the frontend should retry (capacity and timeout
    /// conditions that may clear as load shifts or nodes recover).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::InsufficientCapacity { .. } | SchedulerError::SessionTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Terminal failure of a probe session.
///
/// Kept separate from [`SchedulerError`] because every waiter attached to a
/// session observes the same outcome through a `watch` channel, so it must
/// be cheap to clone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementFailure {
    #[error("insufficient capacity: {needed} tasks, {live} live candidates")]
    InsufficientCapacity { needed: usize, live: usize },

    #[error("session deadline expired with {replies} of {needed} replies")]
    SessionTimeout { replies: usize, needed: usize },
}

impl From<PlacementFailure> for SchedulerError {
    fn from(failure: PlacementFailure) -> Self {
        match failure {
            PlacementFailure::InsufficientCapacity { needed, live } => {
                SchedulerError::InsufficientCapacity { needed, live }
            }
            PlacementFailure::SessionTimeout { replies, needed } => {
                SchedulerError::SessionTimeout { replies, needed }
            }
        }
    }
}
