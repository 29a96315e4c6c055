pub mod job;

pub use job::{Job, JobPriority, JobStatus};
