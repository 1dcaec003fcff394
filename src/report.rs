//! Run-wide error accumulator and exit-code policy.
//!
//! Every phase reports into one `RunReport`. The propagation rule lives in
//! `RunReport::record`: a FATAL record halts the reporting phase (and the
//! pipeline skips everything after it), a RECOVERABLE record never halts.

use serde_json::json;

use crate::errors::{ErrorKind, ErrorRecord, Severity};
use crate::logging::{log, obj, v_opt, v_str, Domain, Level};

/// Pipeline phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Load,
    Dedup,
    SortOrder,
    Timestamps,
    ZoneTypes,
    Merge,
    Internal,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Dedup => "dedup",
            Phase::SortOrder => "sort_order",
            Phase::Timestamps => "timestamps",
            Phase::ZoneTypes => "zone_types",
            Phase::Merge => "merge",
            Phase::Internal => "internal",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Phase::Load => Domain::Load,
            Phase::Dedup | Phase::SortOrder | Phase::Timestamps | Phase::ZoneTypes => {
                Domain::Validate
            }
            Phase::Merge => Domain::Merge,
            Phase::Internal => Domain::System,
        }
    }
}

/// Process exit codes, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExitCode {
    Clean = 0,
    Recoverable = 1,
    Fatal = 2,
    InvalidInput = 3,
}

impl ExitCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Exit code a fatal error of this kind forces.
    pub fn for_fatal(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::MissingColumns | ErrorKind::UnsortedInput => ExitCode::InvalidInput,
            _ => ExitCode::Fatal,
        }
    }
}

/// What the reporting phase must do after recording an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

impl Flow {
    pub fn is_halt(&self) -> bool {
        matches!(self, Flow::Halt)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub input_rows: u64,
    pub duplicate_rows_dropped: u64,
    pub context_rows: u64,
    pub engagement_rows: u64,
}

#[derive(Debug, Default)]
pub struct RunReport {
    errors: Vec<ErrorRecord>,
    fatal_errors: u64,
    recoverable_errors: u64,
    halted_in: Option<Phase>,
    worst_fatal: Option<ExitCode>,
    pub counts: RunCounts,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, phase: Phase, rec: ErrorRecord) -> Flow {
        let level = match rec.severity {
            Severity::Fatal => Level::Error,
            Severity::Recoverable => Level::Warn,
        };
        log(
            level,
            phase.domain(),
            "error_record",
            obj(&[
                ("error_type", v_str(rec.error_type.as_str())),
                ("phase", v_str(phase.as_str())),
                ("severity", v_str(rec.severity.as_str())),
                ("session_id", v_opt(rec.session_id.as_deref())),
                ("bar", json!(rec.bar)),
                ("column_name", v_opt(rec.column_name.as_deref())),
                ("value_a", v_opt(rec.value_a.as_deref())),
                ("value_b", v_opt(rec.value_b.as_deref())),
            ]),
        );

        let flow = match rec.severity {
            Severity::Fatal => {
                self.fatal_errors += 1;
                let code = ExitCode::for_fatal(rec.error_type);
                self.worst_fatal = Some(self.worst_fatal.map_or(code, |c| c.max(code)));
                if self.halted_in.is_none() {
                    self.halted_in = Some(phase);
                }
                Flow::Halt
            }
            Severity::Recoverable => {
                self.recoverable_errors += 1;
                Flow::Continue
            }
        };
        self.errors.push(rec);
        flow
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn fatal_errors(&self) -> u64 {
        self.fatal_errors
    }

    pub fn recoverable_errors(&self) -> u64 {
        self.recoverable_errors
    }

    pub fn error_count(&self) -> u64 {
        self.errors.len() as u64
    }

    /// Kind of the first fatal error, if any.
    pub fn fatal_error_kind(&self) -> Option<ErrorKind> {
        self.errors.iter().find(|e| e.is_fatal()).map(|e| e.error_type)
    }

    /// Phase that recorded the first fatal error, if any.
    pub fn halted_in(&self) -> Option<Phase> {
        self.halted_in
    }

    pub fn is_halted(&self) -> bool {
        self.halted_in.is_some()
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.worst_fatal {
            Some(code) => code,
            None if self.recoverable_errors > 0 => ExitCode::Recoverable,
            None => ExitCode::Clean,
        }
    }
}
