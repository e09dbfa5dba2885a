//! Persistence of successful task results.

use crate::error::Result;
use crate::executor::SearchOutcome;
use crate::task::RouteDateTask;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Receives the results of each succeeded task.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, task: &RouteDateTask, results: &[SearchOutcome]) -> Result<()>;
}

/// Writes one JSON file per task into an output directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<ORIG>_<DEST>_<DATE>_<timestamp>.json`
    pub fn file_name(task: &RouteDateTask, timestamp: chrono::DateTime<chrono::Local>) -> String {
        format!(
            "{}_{}_{}_{}.json",
            task.query.origin,
            task.query.destination,
            task.query.date,
            timestamp.format("%Y%m%d_%H%M%S")
        )
    }
}

/// JSON document stored for a task.
pub fn result_document(task: &RouteDateTask, results: &[SearchOutcome]) -> Value {
    let query = &task.query;
    let mut by_type = Map::new();
    for outcome in results {
        by_type.insert(
            outcome.search_type.as_str().to_string(),
            json!({
                "summary": outcome.summary,
                "attempts": outcome.attempts,
                "response": outcome.body,
            }),
        );
    }

    json!({
        "search_metadata": {
            "origin": query.origin.as_str(),
            "destination": query.destination.as_str(),
            "date": query.date.to_string(),
            "passengers": query.passengers,
            "cabin_class": query.cabin.display_name(),
            "search_types": task.search_types.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "searched_at": chrono::Utc::now().to_rfc3339(),
        },
        "results": by_type,
    })
}

#[async_trait::async_trait]
impl ResultSink for JsonFileSink {
    async fn store(&self, task: &RouteDateTask, results: &[SearchOutcome]) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let path = self
            .output_dir
            .join(Self::file_name(task, chrono::Local::now()));
        let document = serde_json::to_vec_pretty(&result_document(task, results))?;
        tokio::fs::write(&path, document).await?;

        tracing::info!(route = %task, "Results saved to {}", path.display());
        Ok(())
    }
}
