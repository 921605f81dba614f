use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a timeline record as reported by the build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskResult {
    Succeeded,
    SucceededWithIssues,
    Failed,
    Canceled,
    Skipped,
    Abandoned,
    None,
    #[serde(other)]
    Other,
}

/// Lifecycle state of a timeline record. Classification ignores it; a record
/// still in progress has no `result` yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimelineState {
    Pending,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueType {
    Error,
    Warning,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogReference {
    pub id: u64,
}

/// One stage, phase, job, task or checkpoint of a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<TimelineState>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub log: Option<LogReference>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
}

impl TimelineRecord {
    /// Messages of this record's own `Error` issues, in order.
    pub fn error_messages(&self) -> impl Iterator<Item = &str> {
        self.issues
            .iter()
            .filter(|issue| issue.issue_type == IssueType::Error)
            .map(|issue| issue.message.as_str())
    }
}

/// A build's timeline. `records` is absent on malformed payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub records: Option<Vec<TimelineRecord>>,
}

impl Timeline {
    pub fn records(&self) -> &[TimelineRecord] {
        self.records.as_deref().unwrap_or(&[])
    }
}

/// Build metadata kept alongside the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub id: u64,
    #[serde(default)]
    pub build_number: Option<String>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub source_branch: Option<String>,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
}
