//! Nearest-cluster matching
//!
//! `ClusterSet` holds clusters in insertion order and ranks them against a
//! candidate failure. `MatchDecision` turns the best score into one of three
//! states for the operator-in-the-loop flow; assignments are applied with
//! `ClusterSet::assign`.

use serde::Serialize;

use crate::cluster::{Cluster, CombinedSimilarity};
use crate::error::FaultlineError;
use crate::models::EmbeddedJobFailure;

/// One cluster's score for a candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMatch {
    pub name: String,
    pub similarity: CombinedSimilarity,
}

/// Categorization state for a candidate failure at threshold τ.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MatchDecision {
    /// No clusters exist; the candidate must start a new, named cluster.
    NoClustersYet,
    /// Best combined score is below τ; the operator chooses.
    BelowThreshold { best: ClusterMatch },
    /// Best combined score is at least τ; assignable to `best`.
    AboveThreshold { best: ClusterMatch },
}

impl MatchDecision {
    /// Classify the best match. The threshold is inclusive.
    pub fn from_best(best: Option<ClusterMatch>, threshold: f64) -> Self {
        match best {
            None => MatchDecision::NoClustersYet,
            Some(best) if best.similarity.combined >= threshold => {
                MatchDecision::AboveThreshold { best }
            }
            Some(best) => MatchDecision::BelowThreshold { best },
        }
    }

    /// Cluster recommended for assignment, if any.
    pub fn recommended(&self) -> Option<&ClusterMatch> {
        match self {
            MatchDecision::NoClustersYet => None,
            MatchDecision::BelowThreshold { best } | MatchDecision::AboveThreshold { best } => {
                Some(best)
            }
        }
    }
}

/// Operator's answer for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Existing(String),
    New(String),
}

/// Clusters keyed by name, iterated in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    clusters: Vec<Cluster>,
}

impl ClusterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(Cluster::name)
    }

    pub fn get(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cluster> {
        self.clusters.iter_mut().find(|c| c.name() == name)
    }

    pub fn insert(&mut self, cluster: Cluster) -> Result<(), FaultlineError> {
        if self.get(cluster.name()).is_some() {
            return Err(FaultlineError::DuplicateCluster(cluster.name().to_string()));
        }
        self.clusters.push(cluster);
        Ok(())
    }

    /// Every cluster's score, in insertion order.
    pub fn score_all(&self, candidate: &EmbeddedJobFailure) -> Vec<ClusterMatch> {
        self.clusters
            .iter()
            .map(|cluster| ClusterMatch {
                name: cluster.name().to_string(),
                similarity: cluster.similarity(candidate),
            })
            .collect()
    }

    /// Highest-scoring cluster; on ties the earlier cluster wins. `None` when
    /// the set is empty.
    pub fn best_match(&self, candidate: &EmbeddedJobFailure) -> Option<ClusterMatch> {
        let mut best: Option<ClusterMatch> = None;
        for scored in self.score_all(candidate) {
            let better = best
                .as_ref()
                .map_or(true, |b| scored.similarity.combined > b.similarity.combined);
            if better {
                best = Some(scored);
            }
        }
        best
    }

    pub fn decide(&self, candidate: &EmbeddedJobFailure, threshold: f64) -> MatchDecision {
        MatchDecision::from_best(self.best_match(candidate), threshold)
    }

    /// Add `candidate` as a reference job of an existing or a new cluster and
    /// return the updated cluster.
    pub fn assign(
        &mut self,
        candidate: EmbeddedJobFailure,
        assignment: Assignment,
    ) -> Result<&Cluster, FaultlineError> {
        let name = match assignment {
            Assignment::Existing(name) => {
                let cluster = self
                    .get_mut(&name)
                    .ok_or_else(|| FaultlineError::UnknownCluster(name.clone()))?;
                cluster.add_reference_job(candidate);
                name
            }
            Assignment::New(name) => {
                let mut cluster = Cluster::new(name.clone());
                cluster.add_reference_job(candidate);
                self.insert(cluster)?;
                name
            }
        };

        tracing::info!(cluster = %name, "Assigned failure to cluster");
        self.get(&name)
            .ok_or(FaultlineError::UnknownCluster(name))
    }
}

impl FromIterator<Cluster> for ClusterSet {
    /// Later clusters with an already-seen name are dropped.
    fn from_iter<I: IntoIterator<Item = Cluster>>(iter: I) -> Self {
        let mut set = ClusterSet::new();
        for cluster in iter {
            if let Err(e) = set.insert(cluster) {
                tracing::warn!(error = %e, "Skipping duplicate cluster");
            }
        }
        set
    }
}
