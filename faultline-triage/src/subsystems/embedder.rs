//! Embedder subsystem: turns localized failures into stored embeddings
//!
//! Every issue message of a failed job gets its own vector; the job's log,
//! after cleaning, gets one more. Identical messages recur across builds, so
//! the backend is wrapped in a `CachingBackend` owned by the caller.

use std::sync::Arc;

use faultline_core::models::{EmbeddedJobFailure, FailedJob};
use faultline_core::{
    create_backend, embeddings, fan_out, CachingBackend, EmbeddingBackend, EmbeddingError,
    EmbeddingVector, FaultlineConfig, FileStore,
};
use faultline_ingest::clean_log;
use serde::Serialize;

use super::localize::localize_build;

/// Create the caching embedding backend selected by `[embedding] backend`.
pub fn create_backend_from_config(config: &FaultlineConfig) -> Result<CachingBackend, EmbeddingError> {
    let backend_cfg = embeddings::backend_config_from(&config.embedding)?;
    let backend: Arc<dyn EmbeddingBackend> = Arc::from(create_backend(backend_cfg)?);
    tracing::info!(
        backend = backend.name(),
        dimensions = backend.dimensions(),
        cache_capacity = config.embedding.cache_capacity,
        "Embedding backend ready"
    );
    Ok(CachingBackend::new(backend, config.embedding.cache_capacity))
}

/// Embed one failed job. Texts the backend yields nothing for are left out.
pub async fn embed_failure(
    build_id: u64,
    job: &FailedJob,
    log_text: Option<&str>,
    backend: &dyn EmbeddingBackend,
) -> Result<EmbeddedJobFailure, EmbeddingError> {
    let mut issues = Vec::with_capacity(job.issues.len());
    for message in &job.issues {
        if let Some(vector) = backend.embed(message).await? {
            issues.push(EmbeddingVector::from(vector));
        }
    }

    let log = match log_text.map(clean_log) {
        Some(cleaned) if !cleaned.trim().is_empty() => {
            backend.embed(&cleaned).await?.map(EmbeddingVector::from)
        }
        _ => None,
    };

    Ok(EmbeddedJobFailure {
        build_id,
        job_id: job.job_id(),
        issues,
        log,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmbedSummary {
    pub embedded: usize,
    pub skipped: usize,
}

/// Embed every localized failure of a stored build. Jobs with a stored
/// embedding are skipped unless `overwrite` is set.
pub async fn embed_build(
    store: &FileStore,
    backend: &dyn EmbeddingBackend,
    build_id: u64,
    overwrite: bool,
) -> anyhow::Result<EmbedSummary> {
    let failures = localize_build(store, build_id).await?;
    let mut summary = EmbedSummary::default();

    for job in &failures {
        let job_ref = job.job_ref(build_id);
        if !overwrite && store.load_embedding(&job_ref).await?.is_some() {
            tracing::debug!(job = %job_ref, "Embedding already stored, skipping");
            summary.skipped += 1;
            continue;
        }

        let log_text = match job.log_id {
            Some(log_id) => {
                let text = store.load_log(build_id, log_id).await?;
                if text.is_none() {
                    tracing::warn!(job = %job_ref, log_id, "Log not in store, embedding issues only");
                }
                text
            }
            None => None,
        };

        let embedded = embed_failure(build_id, job, log_text.as_deref(), backend).await?;
        store.save_embedding(&embedded).await?;
        tracing::info!(
            job = %job_ref,
            issues = embedded.issues.len(),
            has_log = embedded.log.is_some(),
            backend = backend.name(),
            "Embedded failed job"
        );
        summary.embedded += 1;
    }

    Ok(summary)
}

/// `embed_build` over several builds, at most `concurrency` at a time.
pub async fn embed_builds(
    store: &FileStore,
    backend: &dyn EmbeddingBackend,
    build_ids: Vec<u64>,
    overwrite: bool,
    concurrency: usize,
) -> anyhow::Result<EmbedSummary> {
    let per_build = fan_out(build_ids, concurrency, |build_id| {
        embed_build(store, backend, build_id, overwrite)
    })
    .await?;

    let summary = per_build.into_iter().fold(EmbedSummary::default(), |acc, s| EmbedSummary {
        embedded: acc.embedded + s.embedded,
        skipped: acc.skipped + s.skipped,
    });
    tracing::info!(embedded = summary.embedded, skipped = summary.skipped, "Embedding complete");
    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use faultline_core::embeddings::GeminiConfig;
    use faultline_core::models::{Issue, IssueType, LogReference, TaskResult, Timeline, TimelineRecord};
    use faultline_core::GeminiEmbeddingClient;
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every text it is asked to embed; blank text yields nothing.
    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
            self.seen.lock().unwrap().push(text.to_string());
            if text.trim().is_empty() {
                return Ok(None);
            }
            Ok(Some(vec![text.len() as f32, 1.0]))
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn failed_job(issues: &[&str], log_id: Option<u64>) -> FailedJob {
        FailedJob {
            index: 1,
            record_id: Some("job-1".to_string()),
            name: Some("Build".to_string()),
            issues: issues.iter().map(|s| s.to_string()).collect(),
            log_id,
        }
    }

    fn timeline_with_failed_task(log_id: u64) -> Timeline {
        Timeline {
            records: Some(vec![
                TimelineRecord {
                    id: Some("job".to_string()),
                    result: Some(TaskResult::Failed),
                    ..Default::default()
                },
                TimelineRecord {
                    id: Some("task".to_string()),
                    parent_id: Some("job".to_string()),
                    result: Some(TaskResult::Failed),
                    issues: vec![Issue {
                        issue_type: IssueType::Error,
                        message: "Process completed with exit code 1".to_string(),
                    }],
                    log: Some(LogReference { id: log_id }),
                    ..Default::default()
                },
            ]),
        }
    }

    #[tokio::test]
    async fn test_embed_failure_cleans_log() {
        let backend = RecordingBackend::default();
        let job = failed_job(&["TS2345: bad arg"], Some(4));
        let log = "2024-11-01T09:14:56.5357114Z error at 0354917f-c947-433f-949d-a15c36a1b13b\nthrottler(x) noise";

        let embedded = embed_failure(7, &job, Some(log), &backend).await.unwrap();

        assert_eq!(embedded.job_ref().to_string(), "7/job-1");
        assert_eq!(embedded.issues.len(), 1);
        assert!(embedded.log.is_some());
        let seen = backend.seen.lock().unwrap();
        assert_eq!(*seen, vec!["TS2345: bad arg".to_string(), "error at <guid>".to_string()]);
    }

    #[tokio::test]
    async fn test_embed_failure_without_log() {
        let backend = RecordingBackend::default();
        let job = failed_job(&["a", "  "], None);

        let embedded = embed_failure(7, &job, None, &backend).await.unwrap();

        assert_eq!(embedded.issues.len(), 1, "blank message yields no vector");
        assert!(embedded.log.is_none());
    }

    #[tokio::test]
    async fn test_embed_build_skips_existing_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_timeline(5, &timeline_with_failed_task(9)).await.unwrap();
        store.save_log(5, 9, "npm ERR! code ELIFECYCLE").await.unwrap();
        let backend = RecordingBackend::default();

        let first = embed_build(&store, &backend, 5, false).await.unwrap();
        let second = embed_build(&store, &backend, 5, false).await.unwrap();
        let forced = embed_build(&store, &backend, 5, true).await.unwrap();

        assert_eq!(first, EmbedSummary { embedded: 1, skipped: 0 });
        assert_eq!(second, EmbedSummary { embedded: 0, skipped: 1 });
        assert_eq!(forced, EmbedSummary { embedded: 1, skipped: 0 });

        let stored = store.list_embedded_jobs(5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].job_id, "task");
    }

    #[tokio::test]
    async fn test_embed_build_propagates_api_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_timeline(5, &timeline_with_failed_task(9)).await.unwrap();

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;
        let mut config = GeminiConfig::new(Some("test-api-key".to_string()), "gemini-embedding-001".to_string(), 768);
        config.max_retries = 1;
        config.retry_delay_ms = 1;
        let backend = GeminiEmbeddingClient::with_base_url(config, mock_server.uri()).unwrap();

        let result = embed_build(&store, &backend, 5, false).await;

        assert!(result.is_err(), "Expected error on API failure");
        assert!(store.list_embedded_jobs(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_builds_shares_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        for build_id in [1, 2] {
            store.save_timeline(build_id, &timeline_with_failed_task(9)).await.unwrap();
        }
        let inner = Arc::new(RecordingBackend::default());
        let backend = CachingBackend::new(inner.clone(), 16);

        let summary = embed_builds(&store, &backend, vec![1, 2], false, 2).await.unwrap();

        assert_eq!(summary.embedded, 2);
        assert_eq!(inner.seen.lock().unwrap().len(), 1, "same issue text embedded once");
        assert_eq!(backend.hits(), 1);
    }
}
