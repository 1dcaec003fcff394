//! Input event rows and their typed views.

use std::fmt;
use std::str::FromStr;

use crate::config::RAW_STATE_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PhaseSnapshot,
    ModeLock,
    EngagementFinal,
    Unknown,
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "PHASE_SNAPSHOT" => EventKind::PhaseSnapshot,
            "MODE_LOCK" => EventKind::ModeLock,
            "ENGAGEMENT_FINAL" => EventKind::EngagementFinal,
            _ => EventKind::Unknown,
        }
    }

    /// Position of the event within a bar. Unknown types sort last.
    pub fn rank(&self) -> u8 {
        match self {
            EventKind::PhaseSnapshot => 1,
            EventKind::ModeLock => 2,
            EventKind::EngagementFinal => 3,
            EventKind::Unknown => 99,
        }
    }
}

/// Terminal result of a zone engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngagementOutcome {
    Accept,
    Reject,
    Tag,
    Probe,
    Test,
}

impl EngagementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementOutcome::Accept => "ACCEPT",
            EngagementOutcome::Reject => "REJECT",
            EngagementOutcome::Tag => "TAG",
            EngagementOutcome::Probe => "PROBE",
            EngagementOutcome::Test => "TEST",
        }
    }
}

impl FromStr for EngagementOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPT" => Ok(EngagementOutcome::Accept),
            "REJECT" => Ok(EngagementOutcome::Reject),
            "TAG" => Ok(EngagementOutcome::Tag),
            "PROBE" => Ok(EngagementOutcome::Probe),
            "TEST" => Ok(EngagementOutcome::Test),
            other => Err(format!("unknown outcome: {:?}", other)),
        }
    }
}

impl fmt::Display for EngagementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One input record. Read once, never mutated.
///
/// `record` keeps every column exactly as read (header order); it is the
/// identity used for exact-duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventRow {
    /// 1-based data row number (header excluded).
    pub row_num: u64,
    pub session_id: String,
    pub session_type: String,
    pub ts: String,
    pub bar: i64,
    pub event_type: String,
    pub zone_id: String,
    pub zone_type: String,
    pub entry_price: String,
    pub exit_price: String,
    pub bars: String,
    pub outcome: String,
    pub escape_vel: String,
    pub vol_ratio: String,
    pub aggression: String,
    pub facilitation: String,
    pub market_state: String,
    pub phase: String,
    pub message: String,
    pub record: Vec<String>,
}

impl RawEventRow {
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    pub fn event(&self) -> RawEvent<'_> {
        match self.kind() {
            EventKind::PhaseSnapshot => RawEvent::Snapshot(self),
            EventKind::ModeLock => RawEvent::Lock(self),
            EventKind::EngagementFinal => RawEvent::EngagementFinal(self),
            EventKind::Unknown => RawEvent::Other(self),
        }
    }

    /// Composite sort key: (session_id, bar, rank(event_type)).
    pub fn sort_key(&self) -> (&str, i64, u8) {
        (self.session_id.as_str(), self.bar, self.kind().rank())
    }

    /// Raw state carried by a MODE_LOCK message (`raw:VALUE`).
    pub fn raw_state(&self) -> Option<&str> {
        self.message
            .strip_prefix(RAW_STATE_PREFIX)
            .filter(|s| !s.is_empty())
    }
}

/// Tagged view of a row used by the merge loop.
#[derive(Debug, Clone, Copy)]
pub enum RawEvent<'a> {
    Snapshot(&'a RawEventRow),
    Lock(&'a RawEventRow),
    EngagementFinal(&'a RawEventRow),
    Other(&'a RawEventRow),
}

/// Empty string means absent.
pub fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
pub(crate) fn test_row(session_id: &str, bar: i64, event_type: &str) -> RawEventRow {
    RawEventRow {
        row_num: 0,
        session_id: session_id.to_string(),
        session_type: "GLOBEX".to_string(),
        ts: format!("2025-01-01 {:05}", bar),
        bar,
        event_type: event_type.to_string(),
        zone_id: String::new(),
        zone_type: String::new(),
        entry_price: String::new(),
        exit_price: String::new(),
        bars: String::new(),
        outcome: String::new(),
        escape_vel: String::new(),
        vol_ratio: String::new(),
        aggression: String::new(),
        facilitation: String::new(),
        market_state: String::new(),
        phase: String::new(),
        message: String::new(),
        record: vec![session_id.to_string(), bar.to_string(), event_type.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        assert!(EventKind::PhaseSnapshot.rank() < EventKind::ModeLock.rank());
        assert!(EventKind::ModeLock.rank() < EventKind::EngagementFinal.rank());
        assert_eq!(EventKind::parse("HEARTBEAT").rank(), 99);
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!("TEST".parse::<EngagementOutcome>(), Ok(EngagementOutcome::Test));
        assert_eq!("ACCEPT".parse::<EngagementOutcome>(), Ok(EngagementOutcome::Accept));
        assert!("test".parse::<EngagementOutcome>().is_err());
        assert!("".parse::<EngagementOutcome>().is_err());
    }

    #[test]
    fn test_raw_state_prefix() {
        let mut row = test_row("S", 1, "MODE_LOCK");
        row.message = "raw:BALANCE".to_string();
        assert_eq!(row.raw_state(), Some("BALANCE"));
        row.message = "BALANCE".to_string();
        assert_eq!(row.raw_state(), None);
        row.message = "raw:".to_string();
        assert_eq!(row.raw_state(), None);
    }

    #[test]
    fn test_event_view_dispatch() {
        let row = test_row("S", 1, "ENGAGEMENT_FINAL");
        assert!(matches!(row.event(), RawEvent::EngagementFinal(_)));
        let row = test_row("S", 1, "SOMETHING_ELSE");
        assert!(matches!(row.event(), RawEvent::Other(_)));
    }
}
