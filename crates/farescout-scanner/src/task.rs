//! Bulk requests, the route/date tasks they expand into, and run results.

use crate::error::{Result, ScanError, TaskFailure};
use crate::executor::SearchOutcome;
use crate::summary::ResponseSummary;
use crate::transport::SearchQuery;
use farescout_core::{AirportCode, CabinClass, SearchType, TravelDate};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A batch of searches: the cartesian product of origins, destinations and
/// dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRequest {
    pub origins: Vec<AirportCode>,
    pub destinations: Vec<AirportCode>,
    pub dates: Vec<TravelDate>,
    pub passengers: u32,
    pub cabin: CabinClass,
    pub search_types: Vec<SearchType>,
    pub max_concurrent: usize,
    pub browser_count: usize,
}

impl BulkRequest {
    /// Single route and date with both search types.
    pub fn single(origin: AirportCode, destination: AirportCode, date: TravelDate) -> Self {
        Self {
            origins: vec![origin],
            destinations: vec![destination],
            dates: vec![date],
            passengers: 1,
            cabin: CabinClass::default(),
            search_types: SearchType::ALL.to_vec(),
            max_concurrent: 1,
            browser_count: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid =
            |reason: &str| -> Result<()> { Err(ScanError::InvalidRequest(reason.to_string())) };

        if self.origins.is_empty() {
            return invalid("at least one origin is required");
        }
        if self.destinations.is_empty() {
            return invalid("at least one destination is required");
        }
        if self.dates.is_empty() {
            return invalid("at least one date is required");
        }
        if self.search_types.is_empty() {
            return invalid("at least one search type is required");
        }
        if self.passengers == 0 {
            return invalid("passengers must be at least 1");
        }
        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.browser_count == 0 {
            return invalid("browser_count must be at least 1");
        }
        Ok(())
    }

    /// Number of tasks the request expands into.
    pub fn task_count(&self) -> usize {
        dedup(&self.origins).len() * dedup(&self.destinations).len() * dedup(&self.dates).len()
    }

    /// Expand into tasks: origins outer, destinations middle, dates inner.
    ///
    /// Duplicate entries in any dimension are collapsed, keeping first
    /// occurrence order.
    pub fn expand(&self) -> Vec<RouteDateTask> {
        let mut search_types = Vec::with_capacity(self.search_types.len());
        for search_type in &self.search_types {
            if !search_types.contains(search_type) {
                search_types.push(*search_type);
            }
        }

        let origins = dedup(&self.origins);
        let destinations = dedup(&self.destinations);
        let dates = dedup(&self.dates);

        let mut tasks = Vec::with_capacity(origins.len() * destinations.len() * dates.len());
        for origin in &origins {
            for destination in &destinations {
                for date in &dates {
                    tasks.push(RouteDateTask {
                        index: tasks.len(),
                        query: SearchQuery {
                            origin: origin.clone(),
                            destination: destination.clone(),
                            date: *date,
                            passengers: self.passengers,
                            cabin: self.cabin,
                        },
                        search_types: search_types.clone(),
                    });
                }
            }
        }
        tasks
    }
}

fn dedup<T: Clone + PartialEq>(items: &[T]) -> Vec<T> {
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(item) {
            unique.push(item.clone());
        }
    }
    unique
}

/// One route/date unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDateTask {
    /// Position in expansion order
    pub index: usize,
    pub query: SearchQuery,
    pub search_types: Vec<SearchType>,
}

impl fmt::Display for RouteDateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.query, f)
    }
}

/// Lifecycle of a task. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Final record of one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: RouteDateTask,
    pub status: TaskStatus,
    /// Profile the task ran on
    pub profile: usize,
    /// One entry per search type, when succeeded
    pub results: Vec<SearchOutcome>,
    pub error: Option<TaskFailure>,
    pub duration: Duration,
    /// Whether the result sink stored the results
    pub persisted: bool,
}

impl TaskOutcome {
    pub(crate) fn succeeded(
        task: RouteDateTask,
        profile: usize,
        results: Vec<SearchOutcome>,
        duration: Duration,
    ) -> Self {
        Self {
            task,
            status: TaskStatus::Succeeded,
            profile,
            results,
            error: None,
            duration,
            persisted: false,
        }
    }

    pub(crate) fn failed(
        task: RouteDateTask,
        profile: usize,
        error: TaskFailure,
        duration: Duration,
    ) -> Self {
        Self {
            task,
            status: TaskStatus::Failed,
            profile,
            results: Vec::new(),
            error: Some(error),
            duration,
            persisted: false,
        }
    }

    /// Summary for one search type, if it succeeded.
    pub fn summary(&self, search_type: SearchType) -> Option<&ResponseSummary> {
        self.results
            .iter()
            .find(|r| r.search_type == search_type)
            .map(|r| &r.summary)
    }

    /// Human-readable failure reason.
    pub fn failure_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Aggregate result of a bulk run.
#[derive(Debug, Clone)]
pub struct BulkResult {
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
    /// Outcomes in task expansion order
    pub per_task: Vec<TaskOutcome>,
    /// Whether the run was cancelled before all tasks ran
    pub cancelled: bool,
    /// Highest number of tasks running at once
    pub peak_running: usize,
    /// `(profile id, requests sent)`
    pub profile_requests: Vec<(usize, u64)>,
}

impl BulkResult {
    pub fn total(&self) -> usize {
        self.per_task.len()
    }

    /// Whether any task ran and none succeeded.
    pub fn all_failed(&self) -> bool {
        self.succeeded == 0 && self.failed > 0
    }
}
