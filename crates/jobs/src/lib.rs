//! Job registry: the in-memory table of currently running tasks.
//!
//! Each live task holds a cancellation token that engine collaborators poll
//! cooperatively. At most one task per `(record, step)` pair may be live.

use recordroute_events::StepKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("a {step} task is already running for record {record_id}")]
    DuplicateTask { record_id: String, step: StepKind },
}

pub type Result<T> = std::result::Result<T, JobError>;

struct RunningTask {
    record_id: String,
    step: StepKind,
    token: CancellationToken,
    started_at: Instant,
}

/// Snapshot of one running task for the task-listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub record_id: String,
    pub step: StepKind,
    pub duration_seconds: u64,
}

/// Table of live tasks and their cancellation tokens.
///
/// Registration and cancellation are non-blocking; the mutex is held only
/// for map operations.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<HashMap<String, RunningTask>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task and hand back its cancellation token.
    ///
    /// Fails when a task for the same `(record_id, step)` is already live;
    /// callers surface that as a duplicate-task error without starting work.
    pub fn register(
        &self,
        task_id: &str,
        record_id: &str,
        step: StepKind,
    ) -> Result<CancellationToken> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner
            .values()
            .any(|t| t.record_id == record_id && t.step == step)
        {
            return Err(JobError::DuplicateTask {
                record_id: record_id.to_string(),
                step,
            });
        }

        let token = CancellationToken::new();
        inner.insert(
            task_id.to_string(),
            RunningTask {
                record_id: record_id.to_string(),
                step,
                token: token.clone(),
                started_at: Instant::now(),
            },
        );
        tracing::debug!(task_id, record_id, %step, "task registered");
        Ok(token)
    }

    /// Remove a task. Unknown ids are ignored; terminal progress events are
    /// published before this is called.
    pub fn unregister(&self, task_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.remove(task_id).is_some() {
            tracing::debug!(task_id, "task unregistered");
        }
    }

    /// Signal a task's token. Returns false when the task is not live.
    pub fn cancel(&self, task_id: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(task_id) {
            Some(task) => {
                tracing::info!(task_id, record_id = %task.record_id, "cancelling task");
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every live token. Used during shutdown.
    pub fn cancel_all(&self) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for (task_id, task) in inner.iter() {
            tracing::info!(task_id, "cancelling task for shutdown");
            task.token.cancel();
        }
    }

    /// Whether a `(record, step)` pair currently has a live task.
    pub fn is_running(&self, record_id: &str, step: StepKind) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .values()
            .any(|t| t.record_id == record_id && t.step == step)
    }

    /// Snapshot of all live tasks.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .iter()
            .map(|(task_id, task)| TaskSnapshot {
                task_id: task_id.clone(),
                record_id: task.record_id.clone(),
                step: task.step,
                duration_seconds: task.started_at.elapsed().as_secs(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_list() {
        let registry = JobRegistry::new();
        registry.register("t1", "r1", StepKind::Stt).unwrap();

        let tasks = registry.list();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "t1");
        assert_eq!(tasks[0].record_id, "r1");
    }

    #[test]
    fn test_duplicate_record_step_rejected() {
        let registry = JobRegistry::new();
        registry.register("t1", "r1", StepKind::Stt).unwrap();

        let err = registry.register("t2", "r1", StepKind::Stt).unwrap_err();
        assert!(matches!(err, JobError::DuplicateTask { .. }));

        // A different step on the same record is fine.
        registry.register("t3", "r1", StepKind::Summary).unwrap();
    }

    #[test]
    fn test_unregister_frees_the_pair() {
        let registry = JobRegistry::new();
        registry.register("t1", "r1", StepKind::Stt).unwrap();
        registry.unregister("t1");
        assert!(!registry.is_running("r1", StepKind::Stt));
        registry.register("t2", "r1", StepKind::Stt).unwrap();
    }

    #[test]
    fn test_cancel_signals_token() {
        let registry = JobRegistry::new();
        let token = registry.register("t1", "r1", StepKind::Stt).unwrap();
        assert!(!token.is_cancelled());

        assert!(registry.cancel("t1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_task() {
        let registry = JobRegistry::new();
        assert!(!registry.cancel("ghost"));
    }

    #[test]
    fn test_cancel_all() {
        let registry = JobRegistry::new();
        let a = registry.register("t1", "r1", StepKind::Stt).unwrap();
        let b = registry.register("t2", "r2", StepKind::Embedding).unwrap();
        registry.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
