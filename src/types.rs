use serde::{Deserialize, Serialize, Serializer};
use time::{macros::format_description, OffsetDateTime};
use uuid::Uuid;

/// Default for a port's service or state when the scanner leaves it out.
pub const UNKNOWN: &str = "unknown";

/// One normalized observation produced by the parser, not yet persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewFinding {
    pub target: String,
    pub port: Option<u16>,
    pub service: String,
    pub state: String,
}

impl NewFinding {
    /// Build a finding, replacing missing or blank service/state with `"unknown"`.
    pub fn new(
        target: impl Into<String>,
        port: Option<u16>,
        service: Option<&str>,
        state: Option<&str>,
    ) -> Self {
        Self {
            target: target.into(),
            port,
            service: or_unknown(service),
            state: or_unknown(state),
        }
    }
}

fn or_unknown(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// A persisted finding row as served to the dashboard.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub id: i64,
    pub target: String,
    pub port: Option<u16>,
    pub service: String,
    pub state: String,
    #[serde(serialize_with = "serialize_row_timestamp")]
    pub timestamp: OffsetDateTime,
}

fn serialize_row_timestamp<S: Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
    let text = ts
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .map_err(serde::ser::Error::custom)?;
    s.serialize_str(&text)
}

/// Lifecycle state of a scan job. Only moves forward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    /// ```text
    /// Queued ──► Running ──► Succeeded
    ///    │          │
    ///    └──────────┴──────► Failed
    /// ```
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a job-level failure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    ScanCapability,
    Timeout,
    Parse,
    Store,
    Internal,
}

/// Terminal result of a job, serialized as `{"status":"success","count":n}`
/// or `{"status":"failed","kind":..,"error":..}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { count: usize },
    Failed { kind: JobErrorKind, error: String },
}

impl JobOutcome {
    pub fn failed(kind: JobErrorKind, error: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            error: error.into(),
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            Self::Success { .. } => JobState::Succeeded,
            Self::Failed { .. } => JobState::Failed,
        }
    }
}

/// Point-in-time view of a job, as answered to status polls.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub task_id: Uuid,
    pub target: String,
    pub state: JobState,
    pub result: Option<JobOutcome>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// Message carried by the job queue from the dispatch path to a worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QueuedScan {
    pub job_id: Uuid,
    pub target: String,
}
