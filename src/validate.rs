//! Full-dataset structural checks run before the merge.
//!
//! Each check is an independent pass and stops at its first violation.

use std::collections::{BTreeMap, HashMap};

use crate::config::PipelineConfig;
use crate::errors::{ErrorKind, ErrorRecord};
use crate::event::{EventKind, RawEventRow};
use crate::report::{Flow, Phase, RunReport};

/// Rows must be non-decreasing by (session_id, bar, rank(event_type)).
pub fn check_sort_order(rows: &[RawEventRow], report: &mut RunReport) -> Flow {
    for pair in rows.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.sort_key() < prev.sort_key() {
            return report.record(
                Phase::SortOrder,
                ErrorRecord::new(ErrorKind::UnsortedInput)
                    .session(&cur.session_id)
                    .bar(cur.bar)
                    .event_type(&cur.event_type)
                    .values(
                        format!("prev=({},{},{})", prev.session_id, prev.bar, prev.event_type),
                        format!("row={}", cur.row_num),
                    ),
            );
        }
    }
    Flow::Continue
}

/// Within a session, every timestamp at a later bar must be at least the
/// largest timestamp seen at any earlier bar. Every row of a bar is
/// compared, whatever its position within the bar.
pub fn check_timestamps(rows: &[RawEventRow], report: &mut RunReport) -> Flow {
    let mut by_session: BTreeMap<&str, Vec<(i64, &str)>> = BTreeMap::new();
    for row in rows {
        by_session
            .entry(row.session_id.as_str())
            .or_default()
            .push((row.bar, row.ts.as_str()));
    }

    for (session_id, mut bar_ts) in by_session {
        bar_ts.sort_by_key(|&(bar, _)| bar);

        // (bar, ts) of the max over all earlier bars, and over the current bar
        let mut max_before: Option<(i64, &str)> = None;
        let mut current: Option<(i64, &str)> = None;
        for (bar, ts) in bar_ts {
            if let Some((cur_bar, cur_max)) = current {
                if bar > cur_bar {
                    max_before = match max_before {
                        Some((b, t)) if t >= cur_max => Some((b, t)),
                        _ => Some((cur_bar, cur_max)),
                    };
                    current = None;
                }
            }

            if let Some((prev_bar, prev_ts)) = max_before {
                if ts < prev_ts {
                    return report.record(
                        Phase::Timestamps,
                        ErrorRecord::new(ErrorKind::TimestampInversion)
                            .session(session_id)
                            .bar(bar)
                            .values(
                                format!("bar{}={}", prev_bar, prev_ts),
                                format!("bar{}={}", bar, ts),
                            ),
                    );
                }
            }

            current = match current {
                Some((b, t)) => Some((b, t.max(ts))),
                None => Some((bar, ts)),
            };
        }
    }
    Flow::Continue
}

/// Every (session_id, zone_id) among ENGAGEMENT_FINAL rows keeps one zone_type.
pub fn check_zone_types(rows: &[RawEventRow], cfg: &PipelineConfig, report: &mut RunReport) -> Flow {
    let mut zone_types: HashMap<(&str, &str), &str> = HashMap::new();

    for row in rows.iter().filter(|r| r.kind() == EventKind::EngagementFinal) {
        if cfg.is_no_zone_id(&row.zone_id) {
            continue;
        }
        let key = (row.session_id.as_str(), row.zone_id.as_str());
        match zone_types.get(&key) {
            Some(&seen) if seen != row.zone_type => {
                return report.record(
                    Phase::ZoneTypes,
                    ErrorRecord::new(ErrorKind::ZoneTypeInconsistency)
                        .session(&row.session_id)
                        .bar(row.bar)
                        .column(format!("zone_id={}", row.zone_id))
                        .values(seen, row.zone_type.as_str()),
                );
            }
            Some(_) => {}
            None => {
                zone_types.insert(key, row.zone_type.as_str());
            }
        }
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_row;
    use crate::report::ExitCode;

    fn row_ts(session: &str, bar: i64, event_type: &str, ts: &str) -> RawEventRow {
        let mut row = test_row(session, bar, event_type);
        row.ts = ts.to_string();
        row
    }

    fn engagement(session: &str, bar: i64, zone_id: &str, zone_type: &str) -> RawEventRow {
        let mut row = test_row(session, bar, "ENGAGEMENT_FINAL");
        row.zone_id = zone_id.to_string();
        row.zone_type = zone_type.to_string();
        row
    }

    #[test]
    fn test_sorted_input_passes() {
        let rows = vec![
            test_row("A", 1, "PHASE_SNAPSHOT"),
            test_row("A", 1, "MODE_LOCK"),
            test_row("A", 1, "ENGAGEMENT_FINAL"),
            test_row("A", 2, "PHASE_SNAPSHOT"),
            test_row("B", 1, "MODE_LOCK"),
        ];
        let mut report = RunReport::new();
        assert_eq!(check_sort_order(&rows, &mut report), Flow::Continue);
        assert_eq!(report.error_count(), 0);
    }

    #[test]
    fn test_rank_inversion_is_unsorted() {
        let rows = vec![test_row("A", 1, "MODE_LOCK"), test_row("A", 1, "PHASE_SNAPSHOT")];
        let mut report = RunReport::new();
        assert!(check_sort_order(&rows, &mut report).is_halt());
        assert_eq!(report.errors()[0].error_type, ErrorKind::UnsortedInput);
        assert_eq!(report.exit_code(), ExitCode::InvalidInput);
    }

    #[test]
    fn test_bar_compared_numerically() {
        let rows = vec![test_row("A", 9, "MODE_LOCK"), test_row("A", 10, "MODE_LOCK")];
        let mut report = RunReport::new();
        assert_eq!(check_sort_order(&rows, &mut report), Flow::Continue);
    }

    #[test]
    fn test_unknown_event_type_ranks_last() {
        let rows = vec![test_row("A", 1, "HEARTBEAT"), test_row("A", 1, "ENGAGEMENT_FINAL")];
        let mut report = RunReport::new();
        assert!(check_sort_order(&rows, &mut report).is_halt());
    }

    #[test]
    fn test_timestamp_inversion_across_bars() {
        let rows = vec![
            row_ts("A", 1, "PHASE_SNAPSHOT", "2025-01-01 09:05"),
            row_ts("A", 2, "PHASE_SNAPSHOT", "2025-01-01 09:00"),
        ];
        let mut report = RunReport::new();
        assert!(check_timestamps(&rows, &mut report).is_halt());
        let err = &report.errors()[0];
        assert_eq!(err.error_type, ErrorKind::TimestampInversion);
        assert_eq!(err.value_a.as_deref(), Some("bar1=2025-01-01 09:05"));
        assert_eq!(err.value_b.as_deref(), Some("bar2=2025-01-01 09:00"));
        assert_eq!(report.exit_code(), ExitCode::Fatal);
    }

    #[test]
    fn test_same_bar_takes_max_timestamp() {
        let rows = vec![
            row_ts("A", 1, "PHASE_SNAPSHOT", "09:00"),
            row_ts("A", 1, "MODE_LOCK", "09:03"),
            row_ts("A", 2, "PHASE_SNAPSHOT", "09:02"),
        ];
        let mut report = RunReport::new();
        assert!(check_timestamps(&rows, &mut report).is_halt());
        assert_eq!(report.errors()[0].value_a.as_deref(), Some("bar1=09:03"));
    }

    #[test]
    fn test_every_row_of_later_bar_is_compared() {
        let early = row_ts("A", 1, "PHASE_SNAPSHOT", "09:05");
        let low = row_ts("A", 2, "PHASE_SNAPSHOT", "09:01");
        let high = row_ts("A", 2, "MODE_LOCK", "09:06");

        for rows in [
            vec![early.clone(), low.clone(), high.clone()],
            vec![early.clone(), high.clone(), low.clone()],
        ] {
            let mut report = RunReport::new();
            assert!(check_timestamps(&rows, &mut report).is_halt());
            let err = &report.errors()[0];
            assert_eq!(err.error_type, ErrorKind::TimestampInversion);
            assert_eq!(err.value_a.as_deref(), Some("bar1=09:05"));
            assert_eq!(err.value_b.as_deref(), Some("bar2=09:01"));
        }
    }

    #[test]
    fn test_max_carries_across_several_bars() {
        let rows = vec![
            row_ts("A", 1, "PHASE_SNAPSHOT", "09:09"),
            row_ts("A", 2, "PHASE_SNAPSHOT", "09:10"),
            row_ts("A", 3, "PHASE_SNAPSHOT", "09:10"),
            row_ts("A", 4, "PHASE_SNAPSHOT", "09:08"),
        ];
        let mut report = RunReport::new();
        assert!(check_timestamps(&rows, &mut report).is_halt());
        assert_eq!(report.errors()[0].value_a.as_deref(), Some("bar2=09:10"));
    }

    #[test]
    fn test_timestamps_independent_per_session() {
        let rows = vec![
            row_ts("A", 1, "PHASE_SNAPSHOT", "09:10"),
            row_ts("B", 2, "PHASE_SNAPSHOT", "09:00"),
            row_ts("B", 3, "PHASE_SNAPSHOT", "09:00"),
        ];
        let mut report = RunReport::new();
        assert_eq!(check_timestamps(&rows, &mut report), Flow::Continue);
    }

    #[test]
    fn test_zone_type_conflict() {
        let rows = vec![engagement("A", 1, "3", "VPB_VAL"), engagement("A", 2, "3", "PRIOR_POC")];
        let mut report = RunReport::new();
        assert!(check_zone_types(&rows, &PipelineConfig::default(), &mut report).is_halt());
        let err = &report.errors()[0];
        assert_eq!(err.error_type, ErrorKind::ZoneTypeInconsistency);
        assert_eq!(err.column_name.as_deref(), Some("zone_id=3"));
        assert_eq!(err.value_a.as_deref(), Some("VPB_VAL"));
        assert_eq!(err.value_b.as_deref(), Some("PRIOR_POC"));
    }

    #[test]
    fn test_zone_sentinel_and_other_sessions_ignored() {
        let mut snapshot = test_row("A", 1, "PHASE_SNAPSHOT");
        snapshot.zone_id = "3".to_string();
        snapshot.zone_type = "NONE".to_string();
        let rows = vec![
            snapshot,
            engagement("A", 1, "-1", "VPB_VAL"),
            engagement("A", 2, "-1", "PRIOR_POC"),
            engagement("A", 3, "3", "VPB_VAL"),
            engagement("B", 1, "3", "PRIOR_VAH"),
        ];
        let mut report = RunReport::new();
        assert_eq!(
            check_zone_types(&rows, &PipelineConfig::default(), &mut report),
            Flow::Continue
        );
    }
}
