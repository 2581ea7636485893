mod job;
mod stage;

pub use job::{Job, JobRequest, JobSnapshot, JobWarning};
pub use stage::Stage;
