//! reportd-types: shared data model for recurring report jobs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returned when a textual value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum
/// using its snake_case wire names.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ParseError::new($kind, s)),
                }
            }
        }
    };
}

// ──────────────────── Report Parameters ────────────────────

/// Kind of report to produce. Passed opaquely to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Comprehensive,
    Subject,
    Class,
    Individual,
    Custom,
}

string_enum!(ReportKind, "report kind", {
    Comprehensive => "comprehensive",
    Subject => "subject",
    Class => "class",
    Individual => "individual",
    Custom => "custom",
});

/// Output format of the rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Pdf,
    Excel,
    Html,
}

string_enum!(ReportFormat, "report format", {
    Pdf => "pdf",
    Excel => "excel",
    Html => "html",
});

impl ReportFormat {
    /// File extension conventionally used for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Excel => "xlsx",
            ReportFormat::Html => "html",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ReportFormat::Html => "text/html",
        }
    }
}

/// Someone who receives the rendered report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Delivery address (e-mail address or phone number).
    pub address: String,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// Free-text role, e.g. "educator" or "guardian".
    #[serde(default)]
    pub role: String,
}

impl Recipient {
    pub fn new(
        address: impl Into<String>,
        display_name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
            role: role.into(),
        }
    }
}

/// Opaque selection criteria forwarded to the renderer (subjects, classes, timeframe).
pub type Filters = BTreeMap<String, serde_json::Value>;

// ──────────────────── Recurrence ────────────────────

/// How often a job becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

string_enum!(Frequency, "frequency", {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
    Quarterly => "quarterly",
});

/// Wall-clock time of day in the scheduler's reference timezone.
///
/// Serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    /// Build a time of day. Range checking happens at job validation so
    /// that out-of-range values can be reported as an invalid recurrence.
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    pub fn is_valid(&self) -> bool {
        self.hour <= 23 && self.minute <= 59
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ParseError::new("time of day", s))?;
        let hour = h.parse().map_err(|_| ParseError::new("time of day", s))?;
        let minute = m.parse().map_err(|_| ParseError::new("time of day", s))?;
        Ok(Self { hour, minute })
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Calendar rule deciding when a job is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    pub time_of_day: TimeOfDay,
    /// 0–6 with Sunday = 0. Required for weekly jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// 1–31. Required for monthly jobs; anchors quarterly jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    /// 1–12. One of the months a quarterly job runs in; the others follow
    /// in steps of three.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_month: Option<u8>,
}

impl Recurrence {
    pub fn daily(time_of_day: TimeOfDay) -> Self {
        Self {
            frequency: Frequency::Daily,
            time_of_day,
            day_of_week: None,
            day_of_month: None,
            anchor_month: None,
        }
    }

    pub fn weekly(day_of_week: u8, time_of_day: TimeOfDay) -> Self {
        Self {
            frequency: Frequency::Weekly,
            time_of_day,
            day_of_week: Some(day_of_week),
            day_of_month: None,
            anchor_month: None,
        }
    }

    pub fn monthly(day_of_month: u8, time_of_day: TimeOfDay) -> Self {
        Self {
            frequency: Frequency::Monthly,
            time_of_day,
            day_of_week: None,
            day_of_month: Some(day_of_month),
            anchor_month: None,
        }
    }

    pub fn quarterly(day_of_month: Option<u8>, time_of_day: TimeOfDay) -> Self {
        Self {
            frequency: Frequency::Quarterly,
            time_of_day,
            day_of_week: None,
            day_of_month,
            anchor_month: None,
        }
    }
}

// ──────────────────── Jobs ────────────────────

/// Lifecycle state of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Paused,
    Failed,
    Completed,
}

string_enum!(JobStatus, "job status", {
    Active => "active",
    Paused => "paused",
    Failed => "failed",
    Completed => "completed",
});

/// A recurring report definition together with its scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Unique, immutable job ID.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub report_kind: ReportKind,
    pub recurrence: Recurrence,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub filters: Filters,
    pub format: ReportFormat,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Most recent execution, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled execution. Present iff the job is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    /// Number of execution attempts, successful or not.
    #[serde(default)]
    pub run_count: u64,
}

impl ScheduledJob {
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    /// Whether the job should be executed by a tick at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_run.is_some_and(|next| next <= now)
    }
}

/// Caller-supplied fields for creating a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub report_kind: ReportKind,
    pub recurrence: Recurrence,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub filters: Filters,
    pub format: ReportFormat,
}

/// Partial update of a job definition. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_kind: Option<ReportKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<Recipient>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ReportFormat>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        *self == JobPatch::default()
    }
}

// ──────────────────── Run History ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
}

string_enum!(RunOutcome, "run outcome", {
    Success => "success",
    Failure => "failure",
});

/// What caused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// The job became due during a tick.
    Scheduled,
    /// An operator requested run-now.
    Manual,
}

string_enum!(RunTrigger, "run trigger", {
    Scheduled => "scheduled",
    Manual => "manual",
});

/// One entry in the run-history ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub job_id: String,
    pub executed_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_millis: Option<u64>,
    pub trigger: RunTrigger,
    /// Render or delivery error message for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ──────────────────── Collaborator Payloads ────────────────────

/// A rendered report, produced by the renderer and handed to the deliverer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// Result of a successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Addresses the artifact was handed to.
    pub delivered_to: Vec<String>,
}
