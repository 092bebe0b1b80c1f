//! Job lifecycle types.

use nutriparse_ids::{BatchId, JobId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JobError;
use crate::result::ParsedResult;

/// What kind of document a job should be parsed as.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParsingType {
    /// Detect the document kind from its content
    #[default]
    Auto,
    /// Packaged food nutrition label
    NutritionLabel,
    /// Recipe with ingredients and steps
    Recipe,
    /// Dietary guideline document
    DietGuide,
}

impl ParsingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingType::Auto => "auto",
            ParsingType::NutritionLabel => "nutrition_label",
            ParsingType::Recipe => "recipe",
            ParsingType::DietGuide => "diet_guide",
        }
    }
}

impl fmt::Display for ParsingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ParsingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ParsingType::Auto),
            "nutrition_label" => Ok(ParsingType::NutritionLabel),
            "recipe" => Ok(ParsingType::Recipe),
            "diet_guide" => Ok(ParsingType::DietGuide),
            _ => Err(format!(
                "Invalid parsing type: '{}'. Expected: auto, nutrition_label, recipe, or diet_guide",
                s
            )),
        }
    }
}

/// Dispatch priority. `High` is preferred over `Normal` over `Low` at lease
/// time only; a running lower-priority job is never preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    /// Integer rank used for queue ordering (higher dispatches first).
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Priority::Low),
            1 => Some(Priority::Normal),
            2 => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(format!(
                "Invalid priority: '{}'. Expected: low, normal, or high",
                s
            )),
        }
    }
}

/// Lifecycle state of a job. This is the CANONICAL definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Record created, not yet enqueued
    #[default]
    Pending,
    /// Ready for a worker to lease
    Queued,
    /// Exclusively held by a worker, pipeline not yet started
    Leased,
    /// Pipeline executing
    Running,
    /// Terminal: result present
    Completed,
    /// Terminal: error present
    Failed,
    /// Terminal: cancelled before or during execution
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Leased => "leased",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Queued,
        JobState::Leased,
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// True while a worker holds a lease on the job.
    pub fn is_held(&self) -> bool {
        matches!(self, JobState::Leased | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "queued" => Ok(JobState::Queued),
            "leased" => Ok(JobState::Leased),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            _ => Err(format!("Invalid job state: '{}'", s)),
        }
    }
}

/// The persisted job record. Field presence rules:
/// `lease_owner`/`lease_deadline` are set iff the state is leased/running;
/// `result` and `error` are mutually exclusive and only set in terminal
/// states. All timestamps are epoch milliseconds from the store clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub filename: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub blob_handle: String,
    pub parsing_type: ParsingType,
    pub priority: Priority,
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_deadline: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ParsedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobRecord {
    /// Wall-clock duration, available once the job finished.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Filter for job listings. All fields are conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsing_type: Option<ParsingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// Inclusive lower bound on created_at (epoch ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<i64>,
    /// Exclusive upper bound on created_at (epoch ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<i64>,
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page_size() -> u64 {
    20
}

impl JobFilter {
    pub fn page_size_clamped(&self) -> u64 {
        self.page_size.clamp(1, 200)
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.page_size_clamped())
    }
}

/// Grouping envelope for batch submissions. Aggregates are derived from the
/// member jobs, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_str() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn held_states_match_lease_invariant() {
        assert!(JobState::Leased.is_held());
        assert!(JobState::Running.is_held());
        assert!(!JobState::Pending.is_held());
        assert!(!JobState::Completed.is_held());
    }

    #[test]
    fn priority_rank_orders_dispatch() {
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
        assert_eq!(Priority::from_rank(2), Some(Priority::High));
        assert_eq!(Priority::from_rank(7), None);
    }

    #[test]
    fn parsing_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ParsingType::NutritionLabel).unwrap(),
            "\"nutrition_label\""
        );
        assert_eq!(
            "DIET_GUIDE".parse::<ParsingType>().unwrap(),
            ParsingType::DietGuide
        );
    }

    #[test]
    fn filter_clamps_page_size() {
        let filter = JobFilter {
            page_size: 10_000,
            ..JobFilter::default()
        };
        assert_eq!(filter.page_size_clamped(), 200);
    }
}
