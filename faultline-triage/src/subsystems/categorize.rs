//! Categorize subsystem: operator-in-the-loop cluster assignment
//!
//! Scores one embedded failure against every stored cluster and reports the
//! decision state. Applying an assignment adds the failure as a reference job
//! and persists the updated descriptor.

use faultline_core::config::ClusteringConfig;
use faultline_core::models::JobRef;
use faultline_core::registry::{load_all_clusters, save_cluster};
use faultline_core::{Assignment, ClusterMatch, FaultlineError, FileStore, MatchDecision};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CategorizeOutcome {
    pub candidate: String,
    /// All clusters, best first.
    pub ranking: Vec<ClusterMatch>,
    pub decision: MatchDecision,
    /// Cluster the candidate was added to, if an assignment was applied.
    pub assigned: Option<String>,
}

pub async fn categorize_job(
    store: &FileStore,
    job: &JobRef,
    assignment: Option<Assignment>,
    clustering: &ClusteringConfig,
) -> anyhow::Result<CategorizeOutcome> {
    let candidate = store
        .load_embedding(job)
        .await?
        .ok_or_else(|| FaultlineError::MissingEmbedding {
            build_id: job.build_id,
            job_id: job.job_id.clone(),
        })?;

    let mut clusters = load_all_clusters(store, store, clustering.concurrency).await?;

    let mut ranking = clusters.score_all(&candidate);
    // Stable sort keeps insertion order among equal scores.
    ranking.sort_by(|a, b| b.similarity.combined.total_cmp(&a.similarity.combined));
    let decision = clusters.decide(&candidate, clustering.threshold);

    tracing::info!(
        candidate = %job,
        clusters = clusters.len(),
        decision = ?decision,
        "Scored candidate"
    );

    let assigned = match assignment {
        Some(Assignment::Existing(name))
            if clusters
                .get(&name)
                .is_some_and(|c| c.reference_jobs().iter().any(|r| r.job_ref() == *job)) =>
        {
            tracing::info!(candidate = %job, cluster = %name, "Already a reference job, nothing to do");
            Some(name)
        }
        Some(assignment) => {
            let cluster = clusters.assign(candidate, assignment)?;
            save_cluster(store, cluster).await?;
            Some(cluster.name().to_string())
        }
        None => None,
    };

    Ok(CategorizeOutcome {
        candidate: job.to_string(),
        ranking,
        decision,
        assigned,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub reference_jobs: usize,
    pub self_similarity: f64,
}

/// Every stored cluster with its size and cohesion, in name order.
pub async fn cluster_summaries(store: &FileStore, concurrency: usize) -> anyhow::Result<Vec<ClusterSummary>> {
    let clusters = load_all_clusters(store, store, concurrency).await?;
    Ok(clusters
        .iter()
        .map(|c| ClusterSummary {
            name: c.name().to_string(),
            reference_jobs: c.reference_jobs().len(),
            self_similarity: c.self_similarity(),
        })
        .collect())
}
