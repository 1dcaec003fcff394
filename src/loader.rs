//! Row loader and schema validator.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::{PAYLOAD_COLUMNS, REQUIRED_COLUMNS};
use crate::errors::{ErrorKind, ErrorRecord, PipelineError, Result};
use crate::event::RawEventRow;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::report::{Phase, RunReport};

/// Header name -> column index.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    index: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn from_header(header: &csv::StringRecord) -> Self {
        let index = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches('\u{feff}').to_string(), i))
            .collect();
        Self { index }
    }

    /// Required columns absent from the header, in declaration order.
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.index.contains_key(*c))
            .collect()
    }

    fn get(&self, record: &csv::StringRecord, column: &str) -> String {
        self.index
            .get(column)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
            .to_string()
    }
}

pub fn load_rows(path: &Path, report: &mut RunReport) -> Result<Vec<RawEventRow>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    load_rows_from_reader(file, report)
}

/// Reads every row, stopping at the first defect.
///
/// A header without every required column records MISSING_COLUMNS before
/// any row is read. A row with an empty `session_id`, `bar` or `ts`
/// (checked in that order) records MISSING_IDENTITY and ends loading; in
/// both cases no rows are returned.
pub fn load_rows_from_reader<R: Read>(
    reader: R,
    report: &mut RunReport,
) -> Result<Vec<RawEventRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let columns = ColumnMap::from_header(csv_reader.headers()?);
    let missing = columns.missing_required();
    if !missing.is_empty() {
        report.record(
            Phase::Load,
            ErrorRecord::new(ErrorKind::MissingColumns).column(missing.join(",")),
        );
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row_num = i as u64 + 1;
        report.counts.input_rows += 1;

        let session_id = columns.get(&record, "session_id");
        let bar = columns.get(&record, "bar");
        let ts = columns.get(&record, "ts");
        let blank = [("session_id", &session_id), ("bar", &bar), ("ts", &ts)]
            .into_iter()
            .find(|(_, v)| v.trim().is_empty());
        if let Some((column, _)) = blank {
            let raw: Vec<&str> = record.iter().collect();
            report.record(
                Phase::Load,
                ErrorRecord::new(ErrorKind::MissingIdentity)
                    .column(column)
                    .value(format!("row={}", row_num))
                    .raw_row(raw.join(",")),
            );
            return Ok(Vec::new());
        }

        let bar = bar.trim().parse::<i64>().map_err(|_| PipelineError::InvalidBar {
            row_num,
            value: bar.clone(),
        })?;

        rows.push(RawEventRow {
            row_num,
            session_id,
            session_type: columns.get(&record, "session_type"),
            ts,
            bar,
            event_type: columns.get(&record, "event_type"),
            zone_id: columns.get(&record, PAYLOAD_COLUMNS[0]),
            zone_type: columns.get(&record, PAYLOAD_COLUMNS[1]),
            entry_price: columns.get(&record, PAYLOAD_COLUMNS[2]),
            exit_price: columns.get(&record, PAYLOAD_COLUMNS[3]),
            bars: columns.get(&record, PAYLOAD_COLUMNS[4]),
            outcome: columns.get(&record, PAYLOAD_COLUMNS[5]),
            escape_vel: columns.get(&record, PAYLOAD_COLUMNS[6]),
            vol_ratio: columns.get(&record, PAYLOAD_COLUMNS[7]),
            aggression: columns.get(&record, PAYLOAD_COLUMNS[8]),
            facilitation: columns.get(&record, PAYLOAD_COLUMNS[9]),
            market_state: columns.get(&record, PAYLOAD_COLUMNS[10]),
            phase: columns.get(&record, PAYLOAD_COLUMNS[11]),
            message: columns.get(&record, PAYLOAD_COLUMNS[12]),
            record: record.iter().map(str::to_string).collect(),
        });
    }

    log(
        Level::Info,
        Domain::Load,
        "rows_loaded",
        obj(&[
            ("rows", serde_json::json!(rows.len())),
            ("msg", v_str("input loaded")),
        ]),
    );
    Ok(rows)
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| PipelineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ExitCode;

    const HEADER: &str = "session_id,session_type,ts,bar,event_type,zone_id,zone_type,entry_price,exit_price,bars,outcome,escape_vel,vol_ratio,aggression,facilitation,market_state,phase,message";

    fn load(input: &str) -> (Result<Vec<RawEventRow>>, RunReport) {
        let mut report = RunReport::new();
        let rows = load_rows_from_reader(input.as_bytes(), &mut report);
        (rows, report)
    }

    #[test]
    fn test_loads_full_rows() {
        let input = format!(
            "{}\n1,GLOBEX,2025-01-01 09:00,100,MODE_LOCK,0,,0,0,0,,0,0,RESPONSIVE,EFFICIENT,BALANCE,ROTATION,raw:BALANCE\n",
            HEADER
        );
        let (rows, report) = load(&input);
        let rows = rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bar, 100);
        assert_eq!(rows[0].aggression, "RESPONSIVE");
        assert_eq!(rows[0].raw_state(), Some("BALANCE"));
        assert_eq!(rows[0].record.len(), 18);
        assert_eq!(report.counts.input_rows, 1);
        assert_eq!(report.error_count(), 0);
    }

    #[test]
    fn test_missing_payload_columns_read_empty() {
        let (rows, _) = load("session_id,session_type,ts,bar,event_type\nS,RTH,t1,5,PHASE_SNAPSHOT\n");
        let rows = rows.unwrap();
        assert_eq!(rows[0].zone_id, "");
        assert_eq!(rows[0].message, "");
    }

    #[test]
    fn test_missing_columns_rejects_before_rows() {
        let (rows, report) = load("session_id,ts,bar\nS,t1,5\n");
        assert!(rows.unwrap().is_empty());
        assert_eq!(report.counts.input_rows, 0);
        let err = &report.errors()[0];
        assert_eq!(err.error_type, ErrorKind::MissingColumns);
        assert_eq!(err.column_name.as_deref(), Some("session_type,event_type"));
        assert_eq!(report.exit_code(), ExitCode::InvalidInput);
    }

    #[test]
    fn test_missing_identity_discards_everything() {
        let input = "session_id,session_type,ts,bar,event_type\n\
                     S,RTH,t1,5,PHASE_SNAPSHOT\n\
                     S,RTH,,6,PHASE_SNAPSHOT\n\
                     S,RTH,t3,7,PHASE_SNAPSHOT\n";
        let (rows, report) = load(input);
        assert!(rows.unwrap().is_empty());
        assert_eq!(report.counts.input_rows, 2);
        assert_eq!(report.error_count(), 1);
        let err = &report.errors()[0];
        assert_eq!(err.error_type, ErrorKind::MissingIdentity);
        assert_eq!(err.column_name.as_deref(), Some("ts"));
        assert_eq!(err.raw_row.as_deref(), Some("S,RTH,,6,PHASE_SNAPSHOT"));
        assert_eq!(report.exit_code(), ExitCode::Fatal);
    }

    #[test]
    fn test_identity_checked_in_order() {
        let (_, report) = load("session_id,session_type,ts,bar,event_type\n  ,RTH,,,MODE_LOCK\n");
        assert_eq!(report.errors()[0].column_name.as_deref(), Some("session_id"));
        let (_, report) = load("session_id,session_type,ts,bar,event_type\nS,RTH,,,MODE_LOCK\n");
        assert_eq!(report.errors()[0].column_name.as_deref(), Some("bar"));
    }

    #[test]
    fn test_non_integer_bar_is_internal_failure() {
        let (rows, _) = load("session_id,session_type,ts,bar,event_type\nS,RTH,t1,abc,MODE_LOCK\n");
        assert!(matches!(rows, Err(PipelineError::InvalidBar { row_num: 1, .. })));
    }

    #[test]
    fn test_empty_input_has_no_header() {
        let (rows, report) = load("");
        assert!(rows.unwrap().is_empty());
        assert_eq!(report.errors()[0].error_type, ErrorKind::MissingColumns);
    }
}
