//! Minimal response summaries for task results.

use crate::transport::RawResponse;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// What one search returned, without parsing individual flights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSummary {
    /// Itinerary slices in the response
    pub slices: usize,
    /// Slices without connections
    pub nonstop: usize,
    pub bytes: usize,
    pub elapsed_ms: u64,
}

impl ResponseSummary {
    pub fn from_response(response: &RawResponse) -> Self {
        let slices = response
            .body
            .get("slices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Self {
            slices: slices.len(),
            nonstop: slices.iter().filter(|slice| is_nonstop(slice)).count(),
            bytes: response.bytes,
            elapsed_ms: u64::try_from(response.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

fn is_nonstop(slice: &Value) -> bool {
    match slice.get("stops").and_then(Value::as_u64) {
        Some(stops) => stops == 0,
        None => slice
            .get("segments")
            .and_then(Value::as_array)
            .is_some_and(|segments| segments.len() == 1),
    }
}
