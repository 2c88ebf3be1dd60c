//! Processing status carried inside the schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where processing of a document stands.
///
/// Only the stage orchestrator moves this forward, once per stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    /// `"{n}_started"`, `"{n}_completed"`, `"{n}_failed"` or `"not_started"`
    pub current_stage: String,

    /// Name of the stage in `current_stage`
    #[serde(default)]
    pub stage_name: Option<String>,

    /// 0-100, computed from populated fields
    pub completion_percentage: f64,

    /// Last transition time
    pub last_updated: DateTime<Utc>,

    /// When the current stage started
    #[serde(default)]
    pub stage_started_at: Option<DateTime<Utc>>,

    /// Wall time of the last finished stage attempt
    #[serde(default)]
    pub stage_duration_seconds: Option<f64>,

    /// Failure message of the last failed stage
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProcessingStatus {
    /// Status of a freshly created schema.
    pub fn new() -> Self {
        Self {
            current_stage: "not_started".to_string(),
            stage_name: None,
            completion_percentage: 0.0,
            last_updated: Utc::now(),
            stage_started_at: None,
            stage_duration_seconds: None,
            error_message: None,
        }
    }

    /// Whether the last recorded transition is a failure.
    pub fn is_failed(&self) -> bool {
        self.current_stage.ends_with("_failed")
    }

    /// Stage number of the last transition, if any.
    pub fn stage_number(&self) -> Option<usize> {
        self.current_stage
            .split_once('_')
            .and_then(|(n, _)| n.parse().ok())
    }

    pub(crate) fn begin(&mut self, number: usize, name: &str) {
        let now = Utc::now();
        self.current_stage = format!("{}_started", number);
        self.stage_name = Some(name.to_string());
        self.stage_started_at = Some(now);
        self.stage_duration_seconds = None;
        self.last_updated = now;
    }

    pub(crate) fn complete(&mut self, number: usize, name: &str, completion: f64) {
        self.finish(number, name, "completed");
        self.error_message = None;
        self.raise_completion(completion);
    }

    pub(crate) fn fail(&mut self, number: usize, name: &str, message: impl Into<String>) {
        self.finish(number, name, "failed");
        self.error_message = Some(message.into());
    }

    /// Completion never goes backwards within a run.
    pub(crate) fn raise_completion(&mut self, completion: f64) {
        let completion = completion.clamp(0.0, 100.0);
        if completion > self.completion_percentage {
            self.completion_percentage = completion;
        }
    }

    fn finish(&mut self, number: usize, name: &str, outcome: &str) {
        let now = Utc::now();
        self.current_stage = format!("{}_{}", number, outcome);
        self.stage_name = Some(name.to_string());
        self.stage_duration_seconds = self
            .stage_started_at
            .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0);
        self.last_updated = now;
    }
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut status = ProcessingStatus::new();
        assert_eq!(status.current_stage, "not_started");
        assert_eq!(status.stage_number(), None);

        status.begin(2, "unit-repair");
        assert_eq!(status.current_stage, "2_started");
        assert!(status.stage_started_at.is_some());

        status.complete(2, "unit-repair", 40.0);
        assert_eq!(status.current_stage, "2_completed");
        assert_eq!(status.stage_number(), Some(2));
        assert!(status.stage_duration_seconds.is_some());
        assert_eq!(status.completion_percentage, 40.0);
    }

    #[test]
    fn test_failure_keeps_message() {
        let mut status = ProcessingStatus::new();
        status.begin(3, "structure-recognition");
        status.fail(3, "structure-recognition", "outline extractor timed out");
        assert!(status.is_failed());
        assert_eq!(
            status.error_message.as_deref(),
            Some("outline extractor timed out")
        );
    }

    #[test]
    fn test_completion_is_monotonic() {
        let mut status = ProcessingStatus::new();
        status.raise_completion(50.0);
        status.raise_completion(30.0);
        assert_eq!(status.completion_percentage, 50.0);
        status.raise_completion(250.0);
        assert_eq!(status.completion_percentage, 100.0);
    }
}
