//! Priority thread pool with cooperative cancellation, and a job manager
//! that runs jobs on it and reports finished ones to listeners.
//!
//! ```
//! use jobpool::jobs::{Job, JobManager};
//! use jobpool::config::PoolConfig;
//!
//! let manager = JobManager::new(PoolConfig::new("docs", 2)).unwrap();
//! let job = manager.add_job(Job::new("hello").on_finish(|_| Ok(()))).unwrap();
//! manager.wait();
//! assert!(job.is_done());
//! ```

pub mod common;
pub mod config;
pub mod error;
pub mod jobs;
pub mod log;
pub mod pool;
pub mod task;
pub mod thread;

pub use common::{Handle, Priority, TaskId};
pub use error::{Error, ErrorKind, Result};
