use serde::{Deserialize, Serialize};

use crate::similarity::EmbeddingVector;

/// A root-cause leaf record found by the localizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Position of the record in the timeline's `records`.
    pub index: usize,
    pub record_id: Option<String>,
    pub name: Option<String>,
    /// Error messages from the leaf up to the root, most specific first.
    pub issues: Vec<String>,
    pub log_id: Option<u64>,
}

impl FailedJob {
    /// Store key of the job: its record id, or `record-<index>` for
    /// records the build service sent without one.
    pub fn job_id(&self) -> String {
        self.record_id
            .clone()
            .unwrap_or_else(|| format!("record-{}", self.index))
    }

    pub fn job_ref(&self, build_id: u64) -> JobRef {
        JobRef {
            build_id,
            job_id: self.job_id(),
        }
    }
}

/// Identifies one failed job across builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobRef {
    pub build_id: u64,
    pub job_id: String,
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.build_id, self.job_id)
    }
}

/// Embeddings of one failed job: one vector per issue message plus an
/// optional vector for its cleaned log text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedJobFailure {
    pub build_id: u64,
    pub job_id: String,
    pub issues: Vec<EmbeddingVector>,
    #[serde(default)]
    pub log: Option<EmbeddingVector>,
}

impl EmbeddedJobFailure {
    pub fn job_ref(&self) -> JobRef {
        JobRef {
            build_id: self.build_id,
            job_id: self.job_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_falls_back_to_index() {
        let mut job = FailedJob {
            index: 4,
            record_id: None,
            name: None,
            issues: vec![],
            log_id: None,
        };
        assert_eq!(job.job_ref(9).to_string(), "9/record-4");

        job.record_id = Some("a1".to_string());
        assert_eq!(job.job_id(), "a1");
    }

    #[test]
    fn test_job_ref_rejects_unknown_fields() {
        let parsed: Result<JobRef, _> =
            serde_json::from_str(r#"{"buildId":1,"jobId":"a","extra":true}"#);
        assert!(parsed.is_err());
    }
}
