//! Root-cause failure localization over a build timeline
//!
//! A failing task marks every enclosing job, phase and stage as failed, and a
//! timeout cancels the task's siblings. Neither the inflated ancestors nor
//! unrelated cancellations are root causes. The localizer:
//! 1. classifies every record: `Failed` is failing; `Canceled` is failing only
//!    when its nearest ancestor that is neither canceled nor result-less is
//!    `Failed`; everything else is not failing
//! 2. reports the failing records that have no failing descendant, so a task
//!    wins over its job even when a result-less record sits between them
//! 3. attaches the error messages of each reported leaf and its ancestors
//!
//! Only `result` drives classification. Error issues on a record whose result
//! is not failed/canceled never make it a root cause.

use std::collections::HashSet;

use crate::graph::TimelineGraph;
use crate::models::{FailedJob, TaskResult, Timeline, TimelineRecord};

/// Positions of the root-cause failure records, ascending.
pub fn leaf_failure_records(records: &[TimelineRecord]) -> Vec<usize> {
    let graph = TimelineGraph::new(records);
    root_cause_positions(&graph)
}

/// Root-cause failed jobs of a timeline, with aggregated issue messages.
///
/// A timeline without `records` yields no failures.
pub fn locate_failures(timeline: &Timeline) -> Vec<FailedJob> {
    let Some(records) = timeline.records.as_deref() else {
        tracing::debug!("Timeline has no records, nothing to localize");
        return Vec::new();
    };

    let graph = TimelineGraph::new(records);
    let failures: Vec<FailedJob> = root_cause_positions(&graph)
        .into_iter()
        .map(|position| failed_job(&graph, position))
        .collect();

    tracing::debug!(
        records = records.len(),
        failures = failures.len(),
        "Localized timeline failures"
    );
    failures
}

fn root_cause_positions(graph: &TimelineGraph<'_>) -> Vec<usize> {
    let failing: Vec<usize> = (0..graph.len())
        .filter(|&position| is_failing(graph, position))
        .collect();

    // Any ancestor of a failing record is inflated, whatever sits between.
    let inflated: HashSet<usize> = failing
        .iter()
        .flat_map(|&position| graph.ancestors(position))
        .collect();

    failing
        .into_iter()
        .filter(|position| !inflated.contains(position))
        .collect()
}

/// Whether the record belongs to a failing subtree.
fn is_failing(graph: &TimelineGraph<'_>, position: usize) -> bool {
    match graph.records()[position].result {
        Some(TaskResult::Failed) => true,
        Some(TaskResult::Canceled) => cancellation_caused_by_failure(graph, position),
        _ => false,
    }
}

/// Walk up through canceled and result-less ancestors; the cancellation is a
/// cascade of a real failure when the first decisive ancestor failed.
fn cancellation_caused_by_failure(graph: &TimelineGraph<'_>, position: usize) -> bool {
    for ancestor in graph.ancestors(position) {
        match graph.records()[ancestor].result {
            Some(TaskResult::Canceled) | Some(TaskResult::None) | None => continue,
            Some(TaskResult::Failed) => return true,
            Some(_) => return false,
        }
    }
    false
}

fn failed_job(graph: &TimelineGraph<'_>, position: usize) -> FailedJob {
    let record = &graph.records()[position];

    let issues: Vec<String> = std::iter::once(position)
        .chain(graph.ancestors(position))
        .flat_map(|p| graph.records()[p].error_messages())
        .map(str::to_string)
        .collect();

    FailedJob {
        index: position,
        record_id: record.id.clone(),
        name: record.name.clone(),
        issues,
        log_id: record.log.map(|log| log.id),
    }
}
