//! Fetch subsystem: mirrors failed builds into the local store
//!
//! For each recent failed build this stores the build summary and its
//! timeline, localizes the failing jobs and downloads their logs. Timelines
//! and logs already in the store are not downloaded again.

use faultline_core::models::BuildSummary;
use faultline_core::{fan_out, locate_failures, FileStore};
use faultline_ingest::AzureDevOpsClient;
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub builds: usize,
    pub timelines: usize,
    pub failed_jobs: usize,
    pub logs: usize,
}

impl std::ops::AddAssign for FetchSummary {
    fn add_assign(&mut self, other: Self) {
        self.builds += other.builds;
        self.timelines += other.timelines;
        self.failed_jobs += other.failed_jobs;
        self.logs += other.logs;
    }
}

/// Mirror the `max_builds` most recent failed builds, at most `concurrency`
/// builds at a time.
pub async fn fetch_failed_builds(
    client: &AzureDevOpsClient,
    store: &FileStore,
    max_builds: u32,
    concurrency: usize,
) -> anyhow::Result<FetchSummary> {
    let builds = client.list_failed_builds(max_builds).await?;

    let per_build = fan_out(builds, concurrency, |build| fetch_build(client, store, build)).await?;

    let mut summary = FetchSummary::default();
    for build in per_build {
        summary += build;
    }
    tracing::info!(
        builds = summary.builds,
        timelines = summary.timelines,
        failed_jobs = summary.failed_jobs,
        logs = summary.logs,
        "Fetch complete"
    );
    Ok(summary)
}

async fn fetch_build(
    client: &AzureDevOpsClient,
    store: &FileStore,
    build: BuildSummary,
) -> anyhow::Result<FetchSummary> {
    let build_id = build.id;
    let mut summary = FetchSummary {
        builds: 1,
        ..Default::default()
    };
    store.save_build(&build).await?;

    // Finished builds never change their timeline.
    let timeline = match store.load_timeline(build_id).await? {
        Some(timeline) => timeline,
        None => match client.get_timeline(build_id).await? {
            Some(timeline) => {
                store.save_timeline(build_id, &timeline).await?;
                summary.timelines = 1;
                timeline
            }
            None => {
                tracing::warn!(build_id, "Build has no timeline, skipping");
                return Ok(summary);
            }
        },
    };

    let failures = locate_failures(&timeline);
    summary.failed_jobs = failures.len();

    for job in &failures {
        let Some(log_id) = job.log_id else {
            tracing::debug!(build_id, job = %job.job_id(), "Failed job has no log");
            continue;
        };
        if store.has_log(build_id, log_id).await {
            continue;
        }
        match client.get_log(build_id, log_id).await? {
            Some(text) => {
                store.save_log(build_id, log_id, &text).await?;
                summary.logs += 1;
            }
            None => tracing::warn!(build_id, log_id, "Log referenced by timeline not found"),
        }
    }

    tracing::debug!(build_id, failed_jobs = failures.len(), "Fetched build");
    Ok(summary)
}
