//! Named failure clusters and their similarity scoring
//!
//! A cluster is a set of reference failures. A candidate is scored against
//! it with:
//! - issues similarity: the best cosine match between any candidate issue
//!   and any issue of any reference job
//! - log similarity: the best cosine match between log vectors, where two
//!   jobs without logs count as identical
//! - combined: `(2 * issues + log) / 3`
//!
//! Scoring cost grows with reference jobs × issues per job; reference sets are
//! never evicted, so callers should keep clusters to a modest size.

use serde::{Deserialize, Serialize};

use crate::models::{ClusterDescriptor, EmbeddedJobFailure};

/// Similarity of a candidate failure to one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedSimilarity {
    pub issues_similarity: f64,
    pub log_similarity: f64,
    pub combined: f64,
}

impl CombinedSimilarity {
    pub fn new(issues_similarity: f64, log_similarity: f64) -> Self {
        Self {
            issues_similarity,
            log_similarity,
            combined: (2.0 * issues_similarity + log_similarity) / 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    name: String,
    reference_jobs: Vec<EmbeddedJobFailure>,
}

impl Cluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference_jobs: Vec::new(),
        }
    }

    pub fn with_reference_jobs(name: impl Into<String>, jobs: Vec<EmbeddedJobFailure>) -> Self {
        Self {
            name: name.into(),
            reference_jobs: jobs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference_jobs(&self) -> &[EmbeddedJobFailure] {
        &self.reference_jobs
    }

    /// Append a reference job. No deduplication, no cap.
    pub fn add_reference_job(&mut self, job: EmbeddedJobFailure) {
        self.reference_jobs.push(job);
    }

    pub fn descriptor(&self) -> ClusterDescriptor {
        ClusterDescriptor {
            name: self.name.clone(),
            reference_jobs: self.reference_jobs.iter().map(EmbeddedJobFailure::job_ref).collect(),
        }
    }

    /// Best issue-to-issue cosine similarity over all reference jobs; 0 when
    /// there is nothing to compare.
    pub fn issues_similarity(&self, candidate: &EmbeddedJobFailure) -> f64 {
        self.reference_jobs
            .iter()
            .filter_map(|reference| best_issue_match(reference, candidate))
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    /// Best log-to-log cosine similarity over the reference jobs.
    ///
    /// A reference and candidate that both lack a log score 1 and end the
    /// search. Pairs where only one side has a log are skipped; 0 when no
    /// pair was comparable.
    pub fn log_similarity(&self, candidate: &EmbeddedJobFailure) -> f64 {
        let mut best: Option<f64> = None;

        for reference in &self.reference_jobs {
            match (&reference.log, &candidate.log) {
                (None, None) => return 1.0,
                (Some(reference_log), Some(candidate_log)) => {
                    let similarity = reference_log.cosine_similarity(candidate_log);
                    best = Some(best.map_or(similarity, |b| b.max(similarity)));
                }
                _ => {}
            }
        }

        best.unwrap_or(0.0)
    }

    pub fn similarity(&self, candidate: &EmbeddedJobFailure) -> CombinedSimilarity {
        CombinedSimilarity::new(
            self.issues_similarity(candidate),
            self.log_similarity(candidate),
        )
    }

    /// Mean issue similarity over all ordered pairs of distinct reference
    /// jobs. 0 with fewer than two references.
    pub fn self_similarity(&self) -> f64 {
        let n = self.reference_jobs.len();
        if n < 2 {
            return 0.0;
        }

        let mut total = 0.0;
        for (i, a) in self.reference_jobs.iter().enumerate() {
            for (j, b) in self.reference_jobs.iter().enumerate() {
                if i != j {
                    total += best_issue_match(a, b).unwrap_or(0.0);
                }
            }
        }
        total / (n * (n - 1)) as f64
    }
}

/// Highest cosine similarity between any issue of `a` and any issue of `b`.
fn best_issue_match(a: &EmbeddedJobFailure, b: &EmbeddedJobFailure) -> Option<f64> {
    a.issues
        .iter()
        .flat_map(|x| b.issues.iter().map(move |y| x.cosine_similarity(y)))
        .reduce(f64::max)
}
