//! Cluster registry: descriptor persistence and cluster reconstitution
//!
//! Descriptors hold only job pointers. Rebuilding a `Cluster` re-reads each
//! reference job's embedding from the embedding store. A missing embedding, an
//! embedding written for another job, or a descriptor whose name disagrees
//! with its key aborts the load.

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::error::FaultlineError;
use crate::fanout::{fan_out, FanOutError};
use crate::matcher::ClusterSet;
use crate::models::{ClusterDescriptor, EmbeddedJobFailure, JobRef};
use crate::store::{list_dir_names, read_json, validate_key, write_json, FileStore};

/// Storage of cluster descriptors keyed by cluster name.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Names of all stored clusters, sorted.
    async fn list_names(&self) -> Result<Vec<String>, FaultlineError>;

    /// Descriptor stored under `name`. Fails with `DescriptorNameMismatch`
    /// if the stored descriptor carries a different name.
    async fn load(&self, name: &str) -> Result<Option<ClusterDescriptor>, FaultlineError>;

    /// Persist under the key derived from `descriptor.name`.
    async fn save(&self, descriptor: &ClusterDescriptor) -> Result<(), FaultlineError>;
}

/// Source of reference-job embeddings. Implementations must fail with
/// `EmbeddingMismatch` rather than return an embedding of a different job.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn load_embedding(&self, job: &JobRef) -> Result<Option<EmbeddedJobFailure>, FaultlineError>;
}

#[async_trait]
impl ClusterRegistry for FileStore {
    async fn list_names(&self) -> Result<Vec<String>, FaultlineError> {
        let mut names: Vec<String> = list_dir_names(&self.clusters_dir())
            .await?
            .into_iter()
            .filter_map(|file| file.strip_suffix(".json").map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &str) -> Result<Option<ClusterDescriptor>, FaultlineError> {
        validate_key(name)?;
        let path = self.clusters_dir().join(format!("{name}.json"));
        let Some(descriptor) = read_json::<ClusterDescriptor>(&path).await? else {
            return Ok(None);
        };

        if descriptor.name != name {
            tracing::error!(
                key = name,
                found = %descriptor.name,
                "Cluster descriptor name does not match its key"
            );
            return Err(FaultlineError::DescriptorNameMismatch {
                key: name.to_string(),
                found: descriptor.name,
            });
        }
        Ok(Some(descriptor))
    }

    async fn save(&self, descriptor: &ClusterDescriptor) -> Result<(), FaultlineError> {
        validate_key(&descriptor.name)?;
        let path = self.clusters_dir().join(format!("{}.json", descriptor.name));
        write_json(&path, descriptor).await?;
        tracing::info!(
            cluster = %descriptor.name,
            reference_jobs = descriptor.reference_jobs.len(),
            "Saved cluster descriptor"
        );
        Ok(())
    }
}

#[async_trait]
impl EmbeddingStore for FileStore {
    async fn load_embedding(&self, job: &JobRef) -> Result<Option<EmbeddedJobFailure>, FaultlineError> {
        FileStore::load_embedding(self, job).await
    }
}

/// Rebuild a cluster from its descriptor.
pub async fn reconstitute(
    descriptor: &ClusterDescriptor,
    embeddings: &dyn EmbeddingStore,
) -> Result<Cluster, FaultlineError> {
    let mut cluster = Cluster::new(descriptor.name.clone());
    for job in &descriptor.reference_jobs {
        let failure = embeddings
            .load_embedding(job)
            .await?
            .ok_or_else(|| FaultlineError::MissingEmbedding {
                build_id: job.build_id,
                job_id: job.job_id.clone(),
            })?;
        cluster.add_reference_job(failure);
    }
    Ok(cluster)
}

/// Load and reconstitute every stored cluster, in name order.
pub async fn load_all_clusters(
    registry: &dyn ClusterRegistry,
    embeddings: &dyn EmbeddingStore,
    concurrency: usize,
) -> Result<ClusterSet, FanOutError<FaultlineError>> {
    let names = registry.list_names().await.map_err(FanOutError::Single)?;

    let clusters = fan_out(names, concurrency, |name| async move {
        let descriptor = registry
            .load(&name)
            .await?
            .ok_or_else(|| FaultlineError::UnknownCluster(name.clone()))?;
        reconstitute(&descriptor, embeddings).await
    })
    .await?;

    tracing::info!(clusters = clusters.len(), "Loaded clusters");
    Ok(clusters.into_iter().collect())
}

/// Persist a cluster's descriptor.
pub async fn save_cluster(registry: &dyn ClusterRegistry, cluster: &Cluster) -> Result<(), FaultlineError> {
    registry.save(&cluster.descriptor()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::EmbeddingVector;

    fn failure(build_id: u64, job_id: &str, issue: &[f32]) -> EmbeddedJobFailure {
        EmbeddedJobFailure {
            build_id,
            job_id: job_id.to_string(),
            issues: vec![EmbeddingVector::from(issue.to_vec())],
            log: None,
        }
    }

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_then_load_descriptor() {
        let (_dir, store) = store();
        let mut cluster = Cluster::new("eslint");
        cluster.add_reference_job(failure(1, "a", &[1.0, 0.0]));

        save_cluster(&store, &cluster).await.unwrap();

        assert_eq!(store.list_names().await.unwrap(), vec!["eslint"]);
        let loaded = store.load("eslint").await.unwrap().unwrap();
        assert_eq!(loaded, cluster.descriptor());
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_name_mismatch_is_corruption() {
        let (dir, store) = store();
        let path = dir.path().join("clusters/renamed.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"name":"before-rename","referenceJobs":[]}"#).unwrap();

        match store.load("renamed").await {
            Err(FaultlineError::DescriptorNameMismatch { key, found }) => {
                assert_eq!(key, "renamed");
                assert_eq!(found, "before-rename");
            }
            other => panic!("Expected DescriptorNameMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_descriptor_shape_is_rejected() {
        let (dir, store) = store();
        let path = dir.path().join("clusters/legacy.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"name":"legacy","jobs":[1,2]}"#).unwrap();

        assert!(matches!(store.load("legacy").await, Err(FaultlineError::Json(_))));
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected() {
        let (_dir, store) = store();
        let descriptor = ClusterDescriptor {
            name: "../../etc".to_string(),
            reference_jobs: vec![],
        };
        assert!(matches!(store.save(&descriptor).await, Err(FaultlineError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_reconstitute_fails_on_missing_embedding() {
        let (_dir, store) = store();
        store.save_embedding(&failure(1, "present", &[1.0])).await.unwrap();
        let descriptor = ClusterDescriptor {
            name: "c".to_string(),
            reference_jobs: vec![
                JobRef { build_id: 1, job_id: "present".to_string() },
                JobRef { build_id: 1, job_id: "gone".to_string() },
            ],
        };

        match reconstitute(&descriptor, &store).await {
            Err(FaultlineError::MissingEmbedding { build_id, job_id }) => {
                assert_eq!(build_id, 1);
                assert_eq!(job_id, "gone");
            }
            other => panic!("Expected MissingEmbedding, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reconstitute_rejects_embedding_of_another_job() {
        let (dir, store) = store();
        let path = dir.path().join("builds/1/jobs/a/embedding.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&failure(9, "z", &[1.0])).unwrap()).unwrap();
        let descriptor = ClusterDescriptor {
            name: "c".to_string(),
            reference_jobs: vec![JobRef { build_id: 1, job_id: "a".to_string() }],
        };

        let result = reconstitute(&descriptor, &store).await;

        assert!(
            matches!(result, Err(FaultlineError::EmbeddingMismatch { .. })),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_load_all_clusters_in_name_order() {
        let (_dir, store) = store();
        for (name, job) in [("zeta", "z"), ("alpha", "a")] {
            let reference = failure(3, job, &[1.0, 0.0]);
            store.save_embedding(&reference).await.unwrap();
            save_cluster(&store, &Cluster::with_reference_jobs(name, vec![reference]))
                .await
                .unwrap();
        }

        let set = load_all_clusters(&store, &store, 4).await.unwrap();

        assert_eq!(set.names().collect::<Vec<_>>(), vec!["alpha", "zeta"]);
        assert_eq!(set.get("zeta").unwrap().reference_jobs()[0].job_id, "z");
    }

    #[tokio::test]
    async fn test_load_all_clusters_aggregates_failures() {
        let (_dir, store) = store();
        for name in ["one", "two"] {
            let descriptor = ClusterDescriptor {
                name: name.to_string(),
                reference_jobs: vec![JobRef { build_id: 1, job_id: format!("missing-{name}") }],
            };
            store.save(&descriptor).await.unwrap();
        }

        match load_all_clusters(&store, &store, 4).await {
            Err(FanOutError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("Expected two failures, got {other:?}"),
        }
    }
}
