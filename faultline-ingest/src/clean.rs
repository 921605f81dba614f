//! Build log normalization
//!
//! Strips per-line timestamps, masks values that differ between otherwise
//! identical failures (commit hashes, GUIDs, wall-clock stamps, progress
//! percentages) and drops known-noisy lines, so two logs of the same failure
//! embed to nearby vectors.

use regex::Regex;
use std::sync::LazyLock;

/// `2024-11-01T09:14:56.5357114Z ` prefixed by the build agent.
static AGENT_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{7}Z ").expect("static regex"));

/// `\x1b[2m[46.7129s] ` elapsed-time prefix of the verbose build runner.
static RUNNER_ELAPSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\x1b\[2m)?\[\d+\.\d+s\] ").expect("static regex"));

/// `[23:34:02] `
static CLOCK_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\d+:\d+:\d+\] ").expect("static regex"));

static QUOTED_COMMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[0-9a-f]{40}"|'[0-9a-f]{40}'"#).expect("static regex"));

static GUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("static regex")
});

/// `2024-12-05 22:06:32Z`
static WALL_CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}Z").expect("static regex"));

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{1,2}%|100%").expect("static regex"));

static SUB_BUILD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^sub-build \w+ \(").expect("static regex"));

const NOISY_PREFIXES: &[&str] = &[
    "throttler(",
    "throttler:cleaning up",
    "starting walk new directory",
    "finished walk new directory",
    "\x1b[36m(walk new directory ",
    "\x1b[36m(additional walks)",
    "tsc:lifecycle:",
    "\x1b[36m(tsc) ",
    "MultiBuilderLoop (",
    "sub-builder loop",
    "starting caching sub-build ",
    "finished caching sub-build ",
    "<s> [webpack.Progress] ",
    "<i> [webpack.Progress] ",
];

const NOISY_FRAGMENTS: &[&str] = &[
    "tsc:watcher-consumer",
    "tsc:view",
    "(build:workers) incremental rebuild",
];

const WATCHER_EVENTS: &[&str] = &[
    "(loop) raw event",
    "(loop) dismissing: not-tracked;",
    "no match for",
];

fn is_noise(line: &str) -> bool {
    let line = RUNNER_ELAPSED.replace(line, "");

    NOISY_PREFIXES.iter().any(|p| line.starts_with(p))
        || NOISY_FRAGMENTS.iter().any(|f| line.contains(f))
        || (line.contains("oriwatcher") && WATCHER_EVENTS.iter().any(|e| line.contains(e)))
        || SUB_BUILD.is_match(&line)
}

/// Normalize one log line; `None` if the line is noise.
pub fn clean_log_line(line: &str) -> Option<String> {
    let line = AGENT_TIMESTAMP.replace(line, "");
    let line = RUNNER_ELAPSED.replace(&line, "");
    let line = CLOCK_PREFIX.replace(&line, "");

    let line = QUOTED_COMMIT.replace_all(&line, "<git-commit>");
    let line = GUID.replace_all(&line, "<guid>");
    let line = WALL_CLOCK.replace_all(&line, "<timestamp>");
    let line = PERCENT.replace_all(&line, "00%");

    if is_noise(&line) {
        None
    } else {
        Some(line.into_owned())
    }
}

/// Normalize a whole log, keeping surviving lines in order.
pub fn clean_log(text: &str) -> String {
    let kept: Vec<String> = text.lines().filter_map(clean_log_line).collect();
    tracing::trace!(
        input_lines = text.lines().count(),
        kept_lines = kept.len(),
        "Cleaned log"
    );
    kept.join("\n")
}
