//! Windowed worker pool
//!
//! Units run as separate tokio tasks in fixed-size windows. A unit that
//! panics or is cancelled becomes a [`UnitFailure`] in its slot; siblings
//! keep running.

use futures::future::join_all;
use std::future::Future;

/// Why a unit produced no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFailure {
    /// Task panicked
    Panicked(String),
    /// Task was cancelled before completing
    Cancelled,
}

impl std::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Panicked(msg) => write!(f, "unit panicked: {msg}"),
            Self::Cancelled => f.write_str("unit cancelled"),
        }
    }
}

/// Run `task` over `items`, `window` units at a time.
///
/// After each window, `stop` is consulted for every completed value; if it
/// returns true no further window is started. Results are returned in input
/// order and cover only the windows that ran.
pub async fn run_windowed<I, T, F, Fut, S>(
    items: Vec<I>,
    window: usize,
    task: F,
    stop: S,
) -> Vec<Result<T, UnitFailure>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    S: Fn(&T) -> bool,
{
    let window = window.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut pending = items.into_iter().peekable();

    while pending.peek().is_some() {
        let handles: Vec<_> = pending
            .by_ref()
            .take(window)
            .map(|item| tokio::spawn(task(item)))
            .collect();

        let mut halt = false;
        for joined in join_all(handles).await {
            let outcome = match joined {
                Ok(value) => {
                    halt |= stop(&value);
                    Ok(value)
                }
                Err(err) if err.is_panic() => {
                    let payload = err.into_panic();
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!(panic = %msg, "pool unit panicked");
                    Err(UnitFailure::Panicked(msg))
                }
                Err(_) => Err(UnitFailure::Cancelled),
            };
            results.push(outcome);
        }

        if halt {
            tracing::debug!(completed = results.len(), "pool halted early");
            break;
        }
    }

    results
}
