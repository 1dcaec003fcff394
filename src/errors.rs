use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::logging::ts_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Fatal,
    Recoverable,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "FATAL",
            Severity::Recoverable => "RECOVERABLE",
        }
    }
}

/// Data-quality error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingColumns,
    MissingIdentity,
    DuplicateRow,
    UnsortedInput,
    TimestampInversion,
    ZoneTypeInconsistency,
    DuplicateContextSnapshot,
    DuplicateContextLock,
    IdentityConflict,
    InvalidEngagementPrice,
    InvalidOutcome,
    DuplicateEngagement,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingColumns => "MISSING_COLUMNS",
            ErrorKind::MissingIdentity => "MISSING_IDENTITY",
            ErrorKind::DuplicateRow => "DUPLICATE_ROW",
            ErrorKind::UnsortedInput => "UNSORTED_INPUT",
            ErrorKind::TimestampInversion => "TIMESTAMP_INVERSION",
            ErrorKind::ZoneTypeInconsistency => "ZONE_TYPE_INCONSISTENCY",
            ErrorKind::DuplicateContextSnapshot => "DUPLICATE_CONTEXT_SNAPSHOT",
            ErrorKind::DuplicateContextLock => "DUPLICATE_CONTEXT_LOCK",
            ErrorKind::IdentityConflict => "IDENTITY_CONFLICT",
            ErrorKind::InvalidEngagementPrice => "INVALID_ENGAGEMENT_PRICE",
            ErrorKind::InvalidOutcome => "INVALID_OUTCOME",
            ErrorKind::DuplicateEngagement => "DUPLICATE_ENGAGEMENT",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::DuplicateRow
            | ErrorKind::InvalidEngagementPrice
            | ErrorKind::InvalidOutcome
            | ErrorKind::DuplicateEngagement => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected data-quality defect. Append-only within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub error_type: ErrorKind,
    pub severity: Severity,
    pub session_id: Option<String>,
    pub bar: Option<i64>,
    pub event_type: Option<String>,
    pub column_name: Option<String>,
    pub value_a: Option<String>,
    pub value_b: Option<String>,
    pub raw_row: Option<String>,
    pub ts_detected: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            error_type: kind,
            severity: kind.severity(),
            session_id: None,
            bar: None,
            event_type: None,
            column_name: None,
            value_a: None,
            value_b: None,
            raw_row: None,
            ts_detected: ts_now(),
        }
    }

    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn bar(mut self, bar: i64) -> Self {
        self.bar = Some(bar);
        self
    }

    pub fn event_type(mut self, event_type: &str) -> Self {
        self.event_type = Some(event_type.to_string());
        self
    }

    pub fn column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = Some(column_name.into());
        self
    }

    pub fn values(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.value_a = Some(a.into());
        self.value_b = Some(b.into());
        self
    }

    pub fn value(mut self, a: impl Into<String>) -> Self {
        self.value_a = Some(a.into());
        self
    }

    pub fn raw_row(mut self, raw: impl Into<String>) -> Self {
        self.raw_row = Some(raw.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Infrastructure failures. Inside a run these become INTERNAL_ERROR records.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("row {row_num}: bar {value:?} is not an integer")]
    InvalidBar { row_num: u64, value: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
