use thiserror::Error;

use crate::types::JobId;

/// Errors raised by the job store.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("job {job_id} is not held by worker {worker_id}, or is no longer locked")]
    LockLost { job_id: JobId, worker_id: String },
    #[error("job {0} was not found")]
    NotFound(JobId),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
