use thiserror::Error;

/// Error types for pipeline lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The pipeline is already running; workers cannot be added and `start`
    /// cannot be called again until it is stopped.
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// `stop` was called on a pipeline that has workers registered but was
    /// never started.
    #[error("pipeline has not been started")]
    NotStarted,
}
