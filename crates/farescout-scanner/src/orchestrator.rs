//! Bulk orchestrator for running many route/date searches.
//!
//! This module provides the `BulkOrchestrator` which expands a bulk request
//! into independent tasks, runs them with bounded concurrency across the
//! profile pool, and collects one outcome per task. A task's failure is
//! recorded on that task only; it never cancels or blocks its siblings.

use crate::error::{Result, ScanError, SearchError, TaskFailure};
use crate::executor::RequestExecutor;
use crate::profile::{BrowserProfile, ProfilePool};
use crate::sink::ResultSink;
use crate::task::{BulkRequest, BulkResult, RouteDateTask, TaskOutcome, TaskStatus};
use farescout_core::SearchType;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Live task states and counters for the current run.
#[derive(Debug, Default)]
pub struct RunProgress {
    board: Mutex<Board>,
}

#[derive(Debug, Default)]
struct Board {
    statuses: Vec<TaskStatus>,
    counts: ProgressSnapshot,
}

/// Point-in-time copy of [`RunProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Tasks in the run
    pub total: usize,
    /// Tasks waiting for a slot
    pub pending: usize,
    /// Tasks currently executing
    pub running: usize,
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed or were cancelled
    pub failed: usize,
    /// Highest `running` seen so far
    pub peak_running: usize,
}

impl ProgressSnapshot {
    /// Tasks in a terminal state.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl RunProgress {
    /// Read all counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().counts
    }

    /// Current state of the task at `index` in expansion order.
    pub fn task_status(&self, index: usize) -> Option<TaskStatus> {
        self.lock().statuses.get(index).copied()
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self, total: usize) {
        let mut board = self.lock();
        board.statuses = vec![TaskStatus::Pending; total];
        board.counts = ProgressSnapshot {
            total,
            pending: total,
            ..ProgressSnapshot::default()
        };
    }

    /// Pending -> Running.
    fn started(&self, index: usize) {
        let mut board = self.lock();
        let Some(status) = board.statuses.get_mut(index) else {
            return;
        };
        if *status != TaskStatus::Pending {
            return;
        }
        *status = TaskStatus::Running;
        let counts = &mut board.counts;
        counts.pending -= 1;
        counts.running += 1;
        counts.peak_running = counts.peak_running.max(counts.running);
    }

    /// Move a task to its terminal state and return the number of completed
    /// tasks. Finishing an already terminal task changes nothing.
    fn finished(&self, index: usize, outcome: TaskStatus) -> usize {
        let mut board = self.lock();
        let Some(status) = board.statuses.get_mut(index) else {
            return board.counts.completed();
        };
        let previous = *status;
        if previous.is_terminal() || !outcome.is_terminal() {
            return board.counts.completed();
        }
        *status = outcome;

        let counts = &mut board.counts;
        match previous {
            TaskStatus::Running => counts.running -= 1,
            _ => counts.pending -= 1,
        }
        match outcome {
            TaskStatus::Succeeded => counts.succeeded += 1,
            _ => counts.failed += 1,
        }
        counts.completed()
    }
}

/// Runs bulk requests over a profile pool.
pub struct BulkOrchestrator {
    pool: Arc<ProfilePool>,
    executor: Arc<RequestExecutor>,
    sink: Option<Arc<dyn ResultSink>>,
    progress: Arc<RunProgress>,
}

/// Everything a spawned task needs.
#[derive(Clone)]
struct TaskContext {
    executor: Arc<RequestExecutor>,
    sink: Option<Arc<dyn ResultSink>>,
    progress: Arc<RunProgress>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl BulkOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(pool: Arc<ProfilePool>, executor: Arc<RequestExecutor>) -> Self {
        Self {
            pool,
            executor,
            sink: None,
            progress: Arc::new(RunProgress::default()),
        }
    }

    /// Store the results of every succeeded task in `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The profiles tasks run on.
    pub fn pool(&self) -> &ProfilePool {
        &self.pool
    }

    /// Counters of the current (or last) run, readable while it is running.
    pub fn progress(&self) -> Arc<RunProgress> {
        Arc::clone(&self.progress)
    }

    /// Execute a bulk request.
    ///
    /// Tasks are assigned to profiles round-robin in expansion order and at
    /// most `max_concurrent` run at once. The run completes when every task
    /// is terminal. Cancelling `cancel` stops the run cooperatively: running
    /// searches stop at their next suspension point and tasks that have not
    /// started are recorded as cancelled.
    pub async fn run(&self, request: &BulkRequest, cancel: CancellationToken) -> Result<BulkResult> {
        request.validate()?;
        if request.browser_count != self.pool.len() {
            return Err(ScanError::InvalidRequest(format!(
                "browser_count is {} but the pool has {} profile(s)",
                request.browser_count,
                self.pool.len()
            )));
        }

        let tasks = request.expand();
        let total = tasks.len();
        self.progress.reset(total);

        tracing::info!(
            "Starting bulk run: {} task(s), {} concurrent, {} profile(s)",
            total,
            request.max_concurrent,
            self.pool.len()
        );

        let started = Instant::now();
        let context = TaskContext {
            executor: Arc::clone(&self.executor),
            sink: self.sink.clone(),
            progress: Arc::clone(&self.progress),
            slots: Arc::new(Semaphore::new(request.max_concurrent)),
            cancel: cancel.clone(),
        };

        let mut slots: Vec<Option<TaskOutcome>> = vec![None; total];
        let mut handles = JoinSet::new();
        for task in &tasks {
            let profile = self.pool.assign(task.index);
            handles.spawn(run_task(context.clone(), task.clone(), profile));
        }

        while let Some(joined) = handles.join_next().await {
            match joined {
                Ok(outcome) => {
                    let index = outcome.task.index;
                    slots[index] = Some(outcome);
                }
                Err(e) => tracing::error!("Task did not complete: {}", e),
            }
        }

        let per_task: Vec<TaskOutcome> = tasks
            .into_iter()
            .zip(slots)
            .map(|(task, slot)| {
                slot.unwrap_or_else(|| {
                    let profile = self.pool.assign(task.index).id();
                    self.progress.finished(task.index, TaskStatus::Failed);
                    crashed(task, profile, "task did not complete", std::time::Duration::ZERO)
                })
            })
            .collect();

        let succeeded = per_task
            .iter()
            .filter(|o| o.status == TaskStatus::Succeeded)
            .count();
        let result = BulkResult {
            succeeded,
            failed: per_task.len() - succeeded,
            duration: started.elapsed(),
            per_task,
            cancelled: cancel.is_cancelled(),
            peak_running: self.progress.snapshot().peak_running,
            profile_requests: self.pool.request_counts(),
        };

        tracing::info!(
            "Bulk run finished in {:.1}s: {} succeeded, {} failed{}",
            result.duration.as_secs_f64(),
            result.succeeded,
            result.failed,
            if result.cancelled { " (cancelled)" } else { "" }
        );
        for (profile, requests) in &result.profile_requests {
            tracing::info!(profile, "Profile sent {} request(s)", requests);
        }

        Ok(result)
    }
}

async fn run_task(
    context: TaskContext,
    task: RouteDateTask,
    profile: Arc<BrowserProfile>,
) -> TaskOutcome {
    let started = Instant::now();
    let first_type = first_search_type(&task);

    let permit = tokio::select! {
        biased;
        () = context.cancel.cancelled() => None,
        permit = Arc::clone(&context.slots).acquire_owned() => permit.ok(),
    };
    let Some(permit) = permit else {
        context.progress.finished(task.index, TaskStatus::Failed);
        tracing::debug!(route = %task, "Task cancelled before start");
        let failure = TaskFailure {
            search_type: first_type,
            error: SearchError::Cancelled,
        };
        return TaskOutcome::failed(task, profile.id(), failure, started.elapsed());
    };

    context.progress.started(task.index);
    tracing::debug!(route = %task, profile = profile.id(), "Task started");

    let execution = AssertUnwindSafe(context.executor.execute(
        &profile,
        &task.query,
        &task.search_types,
        &context.cancel,
    ))
    .catch_unwind()
    .await;
    drop(permit);

    let mut outcome = match execution {
        Ok(Ok(results)) => TaskOutcome::succeeded(task, profile.id(), results, started.elapsed()),
        Ok(Err(failure)) => TaskOutcome::failed(task, profile.id(), failure, started.elapsed()),
        Err(_) => crashed(task, profile.id(), "search panicked", started.elapsed()),
    };

    let done = context.progress.finished(outcome.task.index, outcome.status);
    let total = context.progress.snapshot().total;
    match outcome.status {
        TaskStatus::Succeeded => {
            tracing::info!(
                route = %outcome.task,
                "[{}/{}] Succeeded in {:.1}s",
                done,
                total,
                outcome.duration.as_secs_f64()
            );
            if let Some(sink) = &context.sink {
                outcome.persisted = persist(sink.as_ref(), &outcome).await;
            }
        }
        _ => {
            tracing::error!(
                route = %outcome.task,
                "[{}/{}] Failed: {}",
                done,
                total,
                outcome.failure_message().unwrap_or_default()
            );
        }
    }

    outcome
}

/// Hand a succeeded task to the sink. Errors and panics in the sink are
/// logged; they never change the task's status.
async fn persist(sink: &dyn ResultSink, outcome: &TaskOutcome) -> bool {
    let stored = AssertUnwindSafe(sink.store(&outcome.task, &outcome.results))
        .catch_unwind()
        .await;
    match stored {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(route = %outcome.task, "Failed to save results: {}", e);
            false
        }
        Err(_) => {
            tracing::error!(route = %outcome.task, "Result sink panicked");
            false
        }
    }
}

fn first_search_type(task: &RouteDateTask) -> SearchType {
    task.search_types
        .first()
        .copied()
        .unwrap_or(SearchType::Award)
}

fn crashed(
    task: RouteDateTask,
    profile: usize,
    reason: &str,
    duration: std::time::Duration,
) -> TaskOutcome {
    let failure = TaskFailure {
        search_type: first_search_type(&task),
        error: SearchError::Crashed(reason.to_string()),
    };
    TaskOutcome::failed(task, profile, failure, duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_follows_task_status() {
        let progress = RunProgress::default();
        progress.reset(3);
        assert_eq!(progress.snapshot().pending, 3);

        progress.started(0);
        progress.started(1);
        assert_eq!(progress.task_status(0), Some(TaskStatus::Running));
        assert_eq!(progress.snapshot().peak_running, 2);

        assert_eq!(progress.finished(0, TaskStatus::Succeeded), 1);
        // A task finished before it ever started leaves the pending count
        assert_eq!(progress.finished(2, TaskStatus::Failed), 2);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.running, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn test_terminal_tasks_are_counted_once() {
        let progress = RunProgress::default();
        progress.reset(2);
        progress.started(0);
        progress.finished(0, TaskStatus::Succeeded);

        // The fallback for a lost task must not touch a task already counted
        assert_eq!(progress.finished(0, TaskStatus::Failed), 1);
        progress.started(0);
        assert_eq!(progress.task_status(0), Some(TaskStatus::Succeeded));

        // Out-of-range indexes are ignored
        progress.started(7);
        assert_eq!(progress.finished(7, TaskStatus::Failed), 1);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 0);
        assert_eq!(snapshot.running, 0);
        assert_eq!(snapshot.pending, 1);
    }
}
