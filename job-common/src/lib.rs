pub mod error;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod store;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use progress::ProgressTracker;
pub use retry::RetryPolicy;
pub use store::JobStore;
pub use types::{EnqueueOptions, JobId, JobRow, JobStatus, ListFilter, RetryDecision};
