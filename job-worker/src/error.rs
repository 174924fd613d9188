use thiserror::Error;

/// Startup/fatal errors, mapped to the process exit codes by the
/// `calyx-server` binary (1 = startup failure, 2 = fatal runtime error).
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to connect to the job store database")]
    DatabaseError(#[from] job_common::QueueError),

    #[error("failed to initialize object storage client: {0}")]
    ObjectStoreInitError(String),

    #[error("the dispatcher loop exited unexpectedly: {0}")]
    DispatcherError(String),
}
