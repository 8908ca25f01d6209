mod job;
mod manager;

pub use job::{FinishedJob, Job, JobContext, JobHandle, JobOutcome};
pub use manager::{JobFinishedListener, JobManager};
