// Aggregate outcome of a fan-out

use serde::Serialize;

/// Results of `run_tasks` / `run_batched`
///
/// `results` holds successful values in completion order. Units that
/// returned nothing are `skipped`; errors and panics are `failed`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome<R> {
    pub results: Vec<R>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl<R> BatchOutcome<R> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn into_results(self) -> Vec<R> {
        self.results
    }
}

impl<R> Default for BatchOutcome<R> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
