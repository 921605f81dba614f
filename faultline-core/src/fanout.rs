//! Bounded-concurrency fan-out over store I/O
//!
//! At most `limit` tasks run at once. Results keep input order, every
//! dispatched task is allowed to finish, and failures are reported together.

use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Default worker limit for store fan-out.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Failure of one or more fan-out tasks.
#[derive(Debug, Error)]
pub enum FanOutError<E> {
    /// Exactly one task failed.
    #[error("{0}")]
    Single(E),
    /// More than one task failed; errors in input order.
    #[error("{} tasks failed:{}", .0.len(), bulleted(.0))]
    Multiple(Vec<E>),
}

impl<E> FanOutError<E> {
    pub fn into_errors(self) -> Vec<E> {
        match self {
            FanOutError::Single(e) => vec![e],
            FanOutError::Multiple(errors) => errors,
        }
    }
}

fn bulleted<E: fmt::Display>(errors: &[E]) -> String {
    errors.iter().map(|e| format!("\n  - {e}")).collect()
}

/// Run `task` over `items` with at most `limit` in flight.
///
/// `result[i]` corresponds to `items[i]`.
pub async fn fan_out<I, T, E, F, Fut>(items: I, limit: usize, task: F) -> Result<Vec<T>, FanOutError<E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let outcomes: Vec<Result<T, E>> = stream::iter(items)
        .map(task)
        .buffered(limit.max(1))
        .collect()
        .await;

    let mut values = Vec::with_capacity(outcomes.len());
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }

    match errors.len() {
        0 => Ok(values),
        1 => Err(FanOutError::Single(errors.remove(0))),
        n => {
            tracing::warn!(failed = n, "Multiple fan-out tasks failed");
            Err(FanOutError::Multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        // Later items finish first.
        let result: Result<Vec<u64>, FanOutError<String>> =
            fan_out(vec![30u64, 20, 10, 0], 4, |delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(delay)
            })
            .await;

        assert_eq!(result.unwrap(), vec![30, 20, 10, 0]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let result: Result<Vec<()>, FanOutError<String>> = fan_out(0..20, 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_single_failure_is_surfaced_after_all_tasks_finish() {
        let finished = Arc::new(AtomicUsize::new(0));

        let result = fan_out(0..5, 2, |i| {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Err(format!("task {i} failed"))
                } else {
                    Ok(i)
                }
            }
        })
        .await;

        assert_eq!(finished.load(Ordering::SeqCst), 5);
        match result {
            Err(FanOutError::Single(e)) => assert_eq!(e, "task 1 failed"),
            other => panic!("Expected a single error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiple_failures_are_aggregated() {
        let result = fan_out(0..6, 10, |i| async move {
            if i % 2 == 0 {
                Err(format!("even {i}"))
            } else {
                Ok(i)
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "3 tasks failed:\n  - even 0\n  - even 2\n  - even 4");
        assert_eq!(err.into_errors().len(), 3);
    }

    #[test]
    fn test_single_failure_displays_as_the_inner_error() {
        let err: FanOutError<String> = FanOutError::Single("disk full".to_string());
        assert_eq!(err.to_string(), "disk full");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let result: Result<Vec<u8>, FanOutError<String>> =
            fan_out(Vec::<u8>::new(), 4, |x| async move { Ok(x) }).await;
        assert!(result.unwrap().is_empty());
    }
}
