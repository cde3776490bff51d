//! In-flight step tracking for the global timeout report

use std::sync::{Arc, Mutex};

/// Scopes finished so far, in the order they finished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

impl Progress {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }
}

/// Shared label of the operation currently in flight
///
/// Cloned into every component of a command. Components also record the
/// scopes they finish, so when the global timeout fires the binary can
/// report the last label that was set and everything done before it.
#[derive(Debug, Clone)]
pub struct StepTracker {
    current: Arc<Mutex<String>>,
    progress: Arc<Mutex<Progress>>,
}

impl StepTracker {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new("starting".to_string())),
            progress: Arc::new(Mutex::new(Progress::default())),
        }
    }

    pub fn set(&self, step: impl Into<String>) {
        let step = step.into();
        tracing::trace!(step = %step, "step");
        if let Ok(mut current) = self.current.lock() {
            *current = step;
        }
    }

    pub fn current(&self) -> String {
        self.current
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Record a scope that finished cleanly
    pub fn complete(&self, scope: impl Into<String>) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.completed.push(scope.into());
        }
    }

    /// Record a scope that finished with a failure
    pub fn fail(&self, scope: impl Into<String>) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.failed.push(scope.into());
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let tracker = StepTracker::new();
        assert_eq!(tracker.current(), "starting");

        let clone = tracker.clone();
        clone.set("uploading manifest.json");
        assert_eq!(tracker.current(), "uploading manifest.json");
    }

    #[test]
    fn test_progress_is_shared_and_ordered() {
        let tracker = StepTracker::new();
        assert!(tracker.progress().is_empty());

        let clone = tracker.clone();
        clone.complete("repoA");
        clone.fail("repoB [clone]: not found");
        clone.complete("repoC");

        let progress = tracker.progress();
        assert_eq!(progress.completed, vec!["repoA", "repoC"]);
        assert_eq!(progress.failed, vec!["repoB [clone]: not found"]);
    }
}
