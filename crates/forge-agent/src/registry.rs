use forge_core::{CancelToken, RunId};
use std::sync::Mutex;

/// Active runs and their cancel tokens. Hosts cancel runs through this
/// rather than holding tokens themselves.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<Vec<(RunId, CancelToken)>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_runs<T>(&self, f: impl FnOnce(&mut Vec<(RunId, CancelToken)>) -> T) -> T {
        let mut guard = match self.runs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn register(&self, token: CancelToken) -> RunId {
        let id = RunId::new();
        self.with_runs(|runs| runs.push((id, token)));
        id
    }

    pub fn cancel(&self, id: RunId) -> bool {
        self.with_runs(|runs| {
            runs.iter()
                .find(|(run, _)| *run == id)
                .map(|(_, token)| token.cancel())
                .is_some()
        })
    }

    /// Cancels the most recently registered run.
    pub fn stop_active(&self) -> Option<RunId> {
        self.with_runs(|runs| {
            runs.last().map(|(id, token)| {
                token.cancel();
                *id
            })
        })
    }

    pub fn finish(&self, id: RunId) {
        self.with_runs(|runs| runs.retain(|(run, _)| *run != id));
    }

    pub fn active(&self) -> Option<RunId> {
        self.with_runs(|runs| runs.last().map(|(id, _)| *id))
    }

    pub fn len(&self) -> usize {
        self.with_runs(|runs| runs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
