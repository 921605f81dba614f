pub mod cluster;
pub mod failure;
pub mod timeline;

pub use cluster::ClusterDescriptor;
pub use failure::{EmbeddedJobFailure, FailedJob, JobRef};
pub use timeline::{
    BuildSummary, Issue, IssueType, LogReference, TaskResult, Timeline, TimelineRecord,
    TimelineState,
};
