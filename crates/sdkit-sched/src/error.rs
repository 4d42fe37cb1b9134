//! Error types for the sdkit-sched subsystem

use crate::cancel::CancelReason;

/// Error produced by a DAG task body.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for scheduling operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// All errors that can occur in balancers, the ring buffer, the DAG executor
/// and the timer.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// Malformed input: bad config, unknown dependency, cyclic graph.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Duplicate registration (for example two DAG tasks with one id).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A balancer was asked for a node while its membership is empty.
    #[error("No nodes available")]
    NoNodes,
    /// The caller's cancellation token fired.
    #[error("Operation cancelled: {0}")]
    Cancelled(CancelReason),
    /// A DAG task returned an error; it is the first failure of the run.
    #[error("Task {id} failed: {source}")]
    Task {
        /// Id of the failing task.
        id: String,
        /// The error the task returned.
        #[source]
        source: TaskError,
    },
    /// The other half of a ring buffer has been dropped.
    #[error("Ring buffer peer disconnected")]
    Disconnected,
    /// The timer has been stopped and accepts no more work.
    #[error("Timer stopped")]
    Stopped,
    /// Broken invariant or runtime failure (task panic, thread spawn failure).
    #[error("Internal error: {0}")]
    Internal(String),
}
