//! Job: lifecycle record for one ingested file.

pub mod model;

pub use model::{parse_log_timestamp, JobError, JobRecord, JobStatus};
