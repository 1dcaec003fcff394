use std::collections::HashMap;

use crate::errors::{ErrorKind, ErrorRecord};
use crate::event::RawEventRow;
use crate::report::{Phase, RunReport};

/// Drops exact duplicates (every column equal), keeping the first occurrence.
///
/// One DUPLICATE_ROW is recorded per duplicate group, in order of the
/// group's first occurrence, annotated with the group size.
pub fn deduplicate(rows: Vec<RawEventRow>, report: &mut RunReport) -> Vec<RawEventRow> {
    let mut group_of: HashMap<Vec<String>, usize> = HashMap::new();
    // (index into kept, occurrences)
    let mut groups: Vec<(usize, u64)> = Vec::new();
    let mut kept: Vec<RawEventRow> = Vec::with_capacity(rows.len());

    for row in rows {
        match group_of.get(&row.record) {
            Some(&g) => groups[g].1 += 1,
            None => {
                group_of.insert(row.record.clone(), groups.len());
                groups.push((kept.len(), 1));
                kept.push(row);
            }
        }
    }

    for &(idx, count) in groups.iter().filter(|(_, count)| *count > 1) {
        let row = &kept[idx];
        report.record(
            Phase::Dedup,
            ErrorRecord::new(ErrorKind::DuplicateRow)
                .session(&row.session_id)
                .bar(row.bar)
                .event_type(&row.event_type)
                .value(format!("count={}", count)),
        );
        report.counts.duplicate_rows_dropped += count - 1;
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_row;

    #[test]
    fn test_keeps_first_occurrence_in_order() {
        let a = test_row("S", 1, "PHASE_SNAPSHOT");
        let b = test_row("S", 2, "PHASE_SNAPSHOT");
        let mut a_late = a.clone();
        a_late.row_num = 9;
        let mut report = RunReport::new();
        let kept = deduplicate(vec![a.clone(), b.clone(), a_late, a.clone()], &mut report);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0], a);
        assert_eq!(kept[1], b);
        assert_eq!(report.counts.duplicate_rows_dropped, 2);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors()[0].value_a.as_deref(), Some("count=3"));
        assert!(!report.is_halted());
    }

    #[test]
    fn test_payload_difference_is_not_a_duplicate() {
        let a = test_row("S", 1, "ENGAGEMENT_FINAL");
        let mut b = a.clone();
        b.record.push("6001".to_string());
        let mut report = RunReport::new();
        let kept = deduplicate(vec![a, b], &mut report);
        assert_eq!(kept.len(), 2);
        assert_eq!(report.error_count(), 0);
    }

    #[test]
    fn test_one_error_per_group() {
        let a = test_row("S", 1, "MODE_LOCK");
        let b = test_row("S", 2, "MODE_LOCK");
        let mut report = RunReport::new();
        let kept = deduplicate(vec![a.clone(), a, b.clone(), b], &mut report);
        assert_eq!(kept.len(), 2);
        assert_eq!(report.error_count(), 2);
        assert_eq!(report.errors()[0].bar, Some(1));
        assert_eq!(report.errors()[1].bar, Some(2));
        assert_eq!(report.counts.duplicate_rows_dropped, 2);
    }
}
