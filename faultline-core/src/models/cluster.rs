use serde::{Deserialize, Serialize};

use super::failure::JobRef;

/// Persisted form of a cluster: its name and pointers to the reference
/// jobs whose embeddings define it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterDescriptor {
    pub name: String,
    pub reference_jobs: Vec<JobRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_round_trips_camel_case() {
        let json = r#"{"name":"npm-timeout","referenceJobs":[{"buildId":7,"jobId":"abc"}]}"#;
        let descriptor: ClusterDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.name, "npm-timeout");
        assert_eq!(
            descriptor.reference_jobs,
            vec![JobRef { build_id: 7, job_id: "abc".to_string() }]
        );
        assert_eq!(serde_json::to_string(&descriptor).unwrap(), json);
    }

    #[test]
    fn test_descriptor_rejects_unknown_fields() {
        let json = r#"{"name":"x","referenceJobs":[],"embeddings":[]}"#;
        assert!(serde_json::from_str::<ClusterDescriptor>(json).is_err());
    }

    #[test]
    fn test_descriptor_rejects_missing_reference_jobs() {
        assert!(serde_json::from_str::<ClusterDescriptor>(r#"{"name":"x"}"#).is_err());
    }
}
