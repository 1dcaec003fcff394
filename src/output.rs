//! Output artifacts: context.csv, engagement.csv, error.csv, summary.json.
//!
//! Every file is written on every run, headers included when empty.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{ErrorRecord, PipelineError, Result};
use crate::logging::{log, obj, ts_now, v_str, Domain, Level};
use crate::merge::{ContextRow, EngagementRow, MergeOutput};
use crate::report::RunReport;

pub const CONTEXT_FILE: &str = "context.csv";
pub const ENGAGEMENT_FILE: &str = "engagement.csv";
pub const ERROR_FILE: &str = "error.csv";
pub const SUMMARY_FILE: &str = "summary.json";

pub const CONTEXT_COLUMNS: [&str; 14] = [
    "session_id",
    "bar",
    "session_type",
    "ts",
    "phase",
    "zone_id_snapshot",
    "zone_type_snapshot",
    "aggression",
    "facilitation",
    "market_state",
    "raw_state",
    "snapshot_message",
    "context_complete",
    "_source_rows",
];

pub const ENGAGEMENT_COLUMNS: [&str; 20] = [
    "session_id",
    "bar",
    "ts",
    "session_type",
    "zone_id",
    "zone_type",
    "entry_price",
    "exit_price",
    "bars",
    "outcome",
    "escape_vel",
    "vol_ratio",
    "context_bar",
    "context_stale",
    "ctx_aggression",
    "ctx_facilitation",
    "ctx_market_state",
    "ctx_phase",
    "orphan",
    "_flags",
];

pub const ERROR_COLUMNS: [&str; 10] = [
    "error_type",
    "severity",
    "session_id",
    "bar",
    "event_type",
    "column_name",
    "value_a",
    "value_b",
    "raw_row",
    "ts_detected",
];

fn flag(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

#[derive(Serialize)]
struct ContextRecord<'a> {
    session_id: &'a str,
    bar: i64,
    session_type: &'a str,
    ts: &'a str,
    phase: Option<&'a str>,
    zone_id_snapshot: Option<&'a str>,
    zone_type_snapshot: Option<&'a str>,
    aggression: Option<&'a str>,
    facilitation: Option<&'a str>,
    market_state: Option<&'a str>,
    raw_state: Option<&'a str>,
    snapshot_message: Option<&'a str>,
    context_complete: &'static str,
    source_rows: u32,
}

impl<'a> From<&'a ContextRow> for ContextRecord<'a> {
    fn from(ctx: &'a ContextRow) -> Self {
        Self {
            session_id: &ctx.session_id,
            bar: ctx.bar,
            session_type: &ctx.session_type,
            ts: &ctx.ts,
            phase: ctx.phase.as_deref(),
            zone_id_snapshot: ctx.zone_id_snapshot.as_deref(),
            zone_type_snapshot: ctx.zone_type_snapshot.as_deref(),
            aggression: ctx.aggression.as_deref(),
            facilitation: ctx.facilitation.as_deref(),
            market_state: ctx.market_state.as_deref(),
            raw_state: ctx.raw_state.as_deref(),
            snapshot_message: ctx.snapshot_message.as_deref(),
            context_complete: flag(ctx.context_complete),
            source_rows: ctx.source_rows,
        }
    }
}

#[derive(Serialize)]
struct EngagementRecord<'a> {
    session_id: &'a str,
    bar: i64,
    ts: &'a str,
    session_type: &'a str,
    zone_id: &'a str,
    zone_type: &'a str,
    entry_price: &'a str,
    exit_price: &'a str,
    bars: &'a str,
    outcome: &'static str,
    escape_vel: &'a str,
    vol_ratio: &'a str,
    context_bar: Option<i64>,
    context_stale: Option<&'static str>,
    ctx_aggression: Option<&'a str>,
    ctx_facilitation: Option<&'a str>,
    ctx_market_state: Option<&'a str>,
    ctx_phase: Option<&'a str>,
    orphan: &'static str,
    flags: String,
}

impl<'a> From<&'a EngagementRow> for EngagementRecord<'a> {
    fn from(eng: &'a EngagementRow) -> Self {
        let ctx = eng.context.as_ref();
        Self {
            session_id: &eng.session_id,
            bar: eng.bar,
            ts: &eng.ts,
            session_type: &eng.session_type,
            zone_id: &eng.zone_id,
            zone_type: &eng.zone_type,
            entry_price: &eng.entry_price,
            exit_price: &eng.exit_price,
            bars: &eng.bars,
            outcome: eng.outcome.as_str(),
            escape_vel: &eng.escape_vel,
            vol_ratio: &eng.vol_ratio,
            context_bar: eng.context_bar(),
            context_stale: eng.context_stale().map(flag),
            ctx_aggression: ctx.and_then(|c| c.aggression.as_deref()),
            ctx_facilitation: ctx.and_then(|c| c.facilitation.as_deref()),
            ctx_market_state: ctx.and_then(|c| c.market_state.as_deref()),
            ctx_phase: ctx.and_then(|c| c.phase.as_deref()),
            orphan: flag(eng.is_orphan()),
            flags: eng
                .flags
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

#[derive(Serialize)]
struct ErrorCsvRecord<'a> {
    error_type: &'static str,
    severity: &'static str,
    session_id: Option<&'a str>,
    bar: Option<i64>,
    event_type: Option<&'a str>,
    column_name: Option<&'a str>,
    value_a: Option<&'a str>,
    value_b: Option<&'a str>,
    raw_row: Option<&'a str>,
    ts_detected: &'a str,
}

impl<'a> From<&'a ErrorRecord> for ErrorCsvRecord<'a> {
    fn from(err: &'a ErrorRecord) -> Self {
        Self {
            error_type: err.error_type.as_str(),
            severity: err.severity.as_str(),
            session_id: err.session_id.as_deref(),
            bar: err.bar,
            event_type: err.event_type.as_deref(),
            column_name: err.column_name.as_deref(),
            value_a: err.value_a.as_deref(),
            value_b: err.value_b.as_deref(),
            raw_row: err.raw_row.as_deref(),
            ts_detected: &err.ts_detected,
        }
    }
}

/// Counts and exit code of one run, as written to summary.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub input_rows: u64,
    pub duplicate_rows_dropped: u64,
    pub context_rows: u64,
    pub engagement_rows: u64,
    pub error_count: u64,
    pub fatal_errors: u64,
    pub recoverable_errors: u64,
    pub exit_code: i32,
    pub input_sha256: Option<String>,
    pub ts_completed: String,
}

impl RunSummary {
    pub fn from_report(report: &RunReport, input_sha256: Option<String>) -> Self {
        Self {
            input_rows: report.counts.input_rows,
            duplicate_rows_dropped: report.counts.duplicate_rows_dropped,
            context_rows: report.counts.context_rows,
            engagement_rows: report.counts.engagement_rows,
            error_count: report.error_count(),
            fatal_errors: report.fatal_errors(),
            recoverable_errors: report.recoverable_errors(),
            exit_code: report.exit_code().code(),
            input_sha256,
            ts_completed: ts_now(),
        }
    }
}

fn write_table<W, T, I>(out: W, columns: &[&str], records: I) -> Result<()>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(columns)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_context_csv<W: Write>(out: W, contexts: &[ContextRow]) -> Result<()> {
    write_table(out, &CONTEXT_COLUMNS, contexts.iter().map(ContextRecord::from))
}

pub fn write_engagement_csv<W: Write>(out: W, engagements: &[EngagementRow]) -> Result<()> {
    write_table(out, &ENGAGEMENT_COLUMNS, engagements.iter().map(EngagementRecord::from))
}

pub fn write_error_csv<W: Write>(out: W, errors: &[ErrorRecord]) -> Result<()> {
    write_table(out, &ERROR_COLUMNS, errors.iter().map(ErrorCsvRecord::from))
}

fn create(path: &Path) -> Result<fs::File> {
    fs::File::create(path).map_err(|e| PipelineError::io(path, e))
}

/// Writes all four artifacts into `output_dir`, creating it if needed.
pub fn write_outputs(
    output_dir: &Path,
    merged: &MergeOutput,
    report: &RunReport,
    summary: &RunSummary,
) -> Result<()> {
    fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

    write_context_csv(create(&output_dir.join(CONTEXT_FILE))?, &merged.contexts)?;
    write_engagement_csv(create(&output_dir.join(ENGAGEMENT_FILE))?, &merged.engagements)?;
    write_error_csv(create(&output_dir.join(ERROR_FILE))?, report.errors())?;

    let summary_path: PathBuf = output_dir.join(SUMMARY_FILE);
    let mut body = serde_json::to_string_pretty(summary)?;
    body.push('\n');
    fs::write(&summary_path, body).map_err(|e| PipelineError::io(&summary_path, e))?;

    log(
        Level::Info,
        Domain::Output,
        "outputs_written",
        obj(&[("output_dir", v_str(&output_dir.display().to_string()))]),
    );
    Ok(())
}
