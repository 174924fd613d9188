//! The Job Status API: the one HTTP surface the job subsystem
//! owns. `serve-api` and `serve-all` both mount this router; `serve-worker`
//! never depends on this crate.

pub mod config;
pub mod facade;
pub mod handlers;

pub use config::Config;
pub use facade::{FacadeError, JobStatusFacade, JobStatusView};
