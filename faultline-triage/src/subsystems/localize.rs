//! Localize subsystem: root-cause failed jobs of a stored build

use anyhow::Context;
use faultline_core::models::FailedJob;
use faultline_core::{locate_failures, FileStore};

/// Failing leaf jobs of a stored build. Errors if the timeline was never
/// fetched.
pub async fn localize_build(store: &FileStore, build_id: u64) -> anyhow::Result<Vec<FailedJob>> {
    let timeline = store
        .load_timeline(build_id)
        .await?
        .with_context(|| format!("No timeline stored for build {build_id}; run `fetch` first"))?;

    Ok(locate_failures(&timeline))
}

/// Human-readable listing, one block per failed job.
pub fn render_failures(build_id: u64, failures: &[FailedJob]) -> String {
    if failures.is_empty() {
        return format!("Build {build_id}: no failed jobs\n");
    }

    let mut out = format!("Build {build_id}: {} failed job(s)\n", failures.len());
    for job in failures {
        out.push_str(&format!(
            "\n{}  {}\n",
            job.job_id(),
            job.name.as_deref().unwrap_or("<unnamed>")
        ));
        if let Some(log_id) = job.log_id {
            out.push_str(&format!("  log: {log_id}\n"));
        }
        for issue in &job.issues {
            out.push_str(&format!("  - {issue}\n"));
        }
    }
    out
}
