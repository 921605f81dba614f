//! Hierarchical file store for builds, timelines, logs and embeddings
//!
//! ```text
//! <root>/builds/<buildId>/build.json
//! <root>/builds/<buildId>/timeline.json
//! <root>/builds/<buildId>/logs/<logId>.log
//! <root>/builds/<buildId>/jobs/<jobId>/embedding.json
//! <root>/clusters/<name>.json
//! ```
//!
//! Missing files load as `None`. Writes go through a temp file and a rename
//! so a crash never leaves a half-written JSON document behind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::FaultlineError;
use crate::fanout::{fan_out, FanOutError};
use crate::models::{BuildSummary, EmbeddedJobFailure, JobRef, Timeline};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn builds_dir(&self) -> PathBuf {
        self.root.join("builds")
    }

    fn build_dir(&self, build_id: u64) -> PathBuf {
        self.builds_dir().join(build_id.to_string())
    }

    fn job_dir(&self, job: &JobRef) -> Result<PathBuf, FaultlineError> {
        validate_key(&job.job_id)?;
        Ok(self.build_dir(job.build_id).join("jobs").join(&job.job_id))
    }

    pub(crate) fn clusters_dir(&self) -> PathBuf {
        self.root.join("clusters")
    }

    // ------------------------------------------------------------------
    // Builds and timelines
    // ------------------------------------------------------------------

    pub async fn save_build(&self, build: &BuildSummary) -> Result<(), FaultlineError> {
        write_json(&self.build_dir(build.id).join("build.json"), build).await
    }

    pub async fn load_build(&self, build_id: u64) -> Result<Option<BuildSummary>, FaultlineError> {
        read_json(&self.build_dir(build_id).join("build.json")).await
    }

    pub async fn save_timeline(&self, build_id: u64, timeline: &Timeline) -> Result<(), FaultlineError> {
        write_json(&self.build_dir(build_id).join("timeline.json"), timeline).await
    }

    /// `None` when the timeline has not been fetched yet.
    pub async fn load_timeline(&self, build_id: u64) -> Result<Option<Timeline>, FaultlineError> {
        read_json(&self.build_dir(build_id).join("timeline.json")).await
    }

    /// Ids of all stored builds, ascending.
    pub async fn list_builds(&self) -> Result<Vec<u64>, FaultlineError> {
        let mut ids: Vec<u64> = list_dir_names(&self.builds_dir())
            .await?
            .into_iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    fn log_path(&self, build_id: u64, log_id: u64) -> PathBuf {
        self.build_dir(build_id).join("logs").join(format!("{log_id}.log"))
    }

    pub async fn save_log(&self, build_id: u64, log_id: u64, text: &str) -> Result<(), FaultlineError> {
        write_atomic(&self.log_path(build_id, log_id), text.as_bytes()).await
    }

    pub async fn load_log(&self, build_id: u64, log_id: u64) -> Result<Option<String>, FaultlineError> {
        match tokio::fs::read_to_string(self.log_path(build_id, log_id)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has_log(&self, build_id: u64, log_id: u64) -> bool {
        tokio::fs::try_exists(self.log_path(build_id, log_id))
            .await
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Embeddings
    // ------------------------------------------------------------------

    pub async fn save_embedding(&self, failure: &EmbeddedJobFailure) -> Result<(), FaultlineError> {
        let dir = self.job_dir(&failure.job_ref())?;
        write_json(&dir.join("embedding.json"), failure).await
    }

    pub async fn load_embedding(&self, job: &JobRef) -> Result<Option<EmbeddedJobFailure>, FaultlineError> {
        let path = self.job_dir(job)?.join("embedding.json");
        let loaded: Option<EmbeddedJobFailure> = read_json(&path).await?;
        if let Some(failure) = &loaded {
            let found = failure.job_ref();
            if found != *job {
                tracing::error!(expected = %job, found = %found, "Embedding file names a different job");
                return Err(FaultlineError::EmbeddingMismatch {
                    expected: job.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(loaded)
    }

    /// Jobs of `build_id` that have a stored embedding.
    pub async fn list_embedded_jobs(&self, build_id: u64) -> Result<Vec<JobRef>, FaultlineError> {
        let jobs_dir = self.build_dir(build_id).join("jobs");
        let mut jobs = Vec::new();
        for job_id in list_dir_names(&jobs_dir).await? {
            if tokio::fs::try_exists(jobs_dir.join(&job_id).join("embedding.json")).await? {
                jobs.push(JobRef { build_id, job_id });
            }
        }
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(jobs)
    }

    /// Every stored embedding across all builds, loaded with bounded fan-out.
    pub async fn load_all_embeddings(
        &self,
        concurrency: usize,
    ) -> Result<Vec<EmbeddedJobFailure>, FanOutError<FaultlineError>> {
        let builds = self.list_builds().await.map_err(FanOutError::Single)?;
        let per_build = fan_out(builds, concurrency, |build_id| self.list_embedded_jobs(build_id)).await?;
        let jobs: Vec<JobRef> = per_build.into_iter().flatten().collect();

        let loaded = fan_out(jobs, concurrency, |job| async move {
            self.load_embedding(&job).await?.ok_or(FaultlineError::MissingEmbedding {
                build_id: job.build_id,
                job_id: job.job_id.clone(),
            })
        })
        .await?;

        tracing::debug!(count = loaded.len(), "Loaded stored embeddings");
        Ok(loaded)
    }
}

/// Reject names that are not a single, plain path component.
pub(crate) fn validate_key(key: &str) -> Result<(), FaultlineError> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0']);
    if invalid {
        return Err(FaultlineError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FaultlineError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), FaultlineError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FaultlineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Names of the directory's entries; empty when it does not exist.
pub(crate) async fn list_dir_names(dir: &Path) -> Result<Vec<String>, FaultlineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskResult, TimelineRecord};
    use crate::similarity::EmbeddingVector;

    fn failure(build_id: u64, job_id: &str) -> EmbeddedJobFailure {
        EmbeddedJobFailure {
            build_id,
            job_id: job_id.to_string(),
            issues: vec![EmbeddingVector::from(vec![0.1, 0.2])],
            log: None,
        }
    }

    #[tokio::test]
    async fn test_missing_data_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.load_timeline(1).await.unwrap().is_none());
        assert!(store.load_build(1).await.unwrap().is_none());
        assert!(store.load_log(1, 2).await.unwrap().is_none());
        let job = JobRef { build_id: 1, job_id: "j".to_string() };
        assert!(store.load_embedding(&job).await.unwrap().is_none());
        assert!(store.list_builds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeline_and_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let timeline = Timeline {
            records: Some(vec![TimelineRecord {
                id: Some("a".to_string()),
                result: Some(TaskResult::Failed),
                ..Default::default()
            }]),
        };

        store.save_timeline(12, &timeline).await.unwrap();
        store.save_log(12, 3, "line one\nline two").await.unwrap();

        let loaded = store.load_timeline(12).await.unwrap().unwrap();
        assert_eq!(loaded.records().len(), 1);
        assert_eq!(store.load_log(12, 3).await.unwrap().as_deref(), Some("line one\nline two"));
        assert!(store.has_log(12, 3).await);
        assert_eq!(store.list_builds().await.unwrap(), vec![12]);
    }

    #[tokio::test]
    async fn test_corrupt_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let path = dir.path().join("builds/5/timeline.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(store.load_timeline(5).await, Err(FaultlineError::Json(_))));
    }

    #[tokio::test]
    async fn test_load_all_embeddings_across_builds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_embedding(&failure(2, "b")).await.unwrap();
        store.save_embedding(&failure(1, "z")).await.unwrap();
        store.save_embedding(&failure(1, "a")).await.unwrap();

        let all = store.load_all_embeddings(2).await.unwrap();
        let keys: Vec<String> = all.iter().map(|f| f.job_ref().to_string()).collect();
        assert_eq!(keys, vec!["1/a", "1/z", "2/b"]);
    }

    #[tokio::test]
    async fn test_embedding_for_another_job_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let path = dir.path().join("builds/1/jobs/a/embedding.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&failure(9, "z")).unwrap()).unwrap();

        let job = JobRef { build_id: 1, job_id: "a".to_string() };
        match store.load_embedding(&job).await {
            Err(FaultlineError::EmbeddingMismatch { expected, found }) => {
                assert_eq!(expected, "1/a");
                assert_eq!(found, "9/z");
            }
            other => panic!("Expected EmbeddingMismatch, got {other:?}"),
        }
        assert!(matches!(
            store.load_all_embeddings(2).await,
            Err(FanOutError::Single(FaultlineError::EmbeddingMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_job_ids_must_be_plain_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let result = store.save_embedding(&failure(1, "../escape")).await;
        assert!(matches!(result, Err(FaultlineError::InvalidKey(_))));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("npm-timeout").is_ok());
        assert!(validate_key("TS2345 type error").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
