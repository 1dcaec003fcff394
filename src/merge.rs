//! Single-pass merge of validated rows into context and engagement tables.
//!
//! Rows arrive sorted by (session_id, bar, rank). Snapshot and lock rows
//! accumulate into one open `ContextRow` per (session_id, bar); the open
//! row is finalized into the `ContextStore` when the key changes, when an
//! engagement arrives, or at end of input. Each admitted engagement is
//! attached to the latest finalized context at or before its bar in the
//! same session.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::json;

use crate::config::PipelineConfig;
use crate::errors::{ErrorKind, ErrorRecord};
use crate::event::{non_empty, EngagementOutcome, RawEvent, RawEventRow};
use crate::logging::{log, obj, Domain, Level, ProfileScope};
use crate::report::{Flow, Phase, RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextSource {
    Snapshot,
    Lock,
}

impl ContextSource {
    fn duplicate_kind(&self) -> ErrorKind {
        match self {
            ContextSource::Snapshot => ErrorKind::DuplicateContextSnapshot,
            ContextSource::Lock => ErrorKind::DuplicateContextLock,
        }
    }
}

/// Regime labels for one (session_id, bar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRow {
    pub session_id: String,
    pub bar: i64,
    pub session_type: String,
    pub ts: String,
    pub phase: Option<String>,
    pub zone_id_snapshot: Option<String>,
    pub zone_type_snapshot: Option<String>,
    pub aggression: Option<String>,
    pub facilitation: Option<String>,
    pub market_state: Option<String>,
    pub raw_state: Option<String>,
    pub snapshot_message: Option<String>,
    pub context_complete: bool,
    pub source_rows: u32,
    has_snapshot: bool,
    has_lock: bool,
}

fn owned(s: &str) -> Option<String> {
    non_empty(s).map(str::to_string)
}

/// Last non-empty value wins.
fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

impl ContextRow {
    fn open(row: &RawEventRow, source: ContextSource, cfg: &PipelineConfig) -> Self {
        let mut ctx = Self {
            session_id: row.session_id.clone(),
            bar: row.bar,
            session_type: row.session_type.clone(),
            ts: row.ts.clone(),
            phase: None,
            zone_id_snapshot: None,
            zone_type_snapshot: None,
            aggression: None,
            facilitation: None,
            market_state: None,
            raw_state: None,
            snapshot_message: None,
            context_complete: false,
            source_rows: 0,
            has_snapshot: false,
            has_lock: false,
        };
        ctx.absorb(row, source, cfg);
        ctx
    }

    fn absorb(&mut self, row: &RawEventRow, source: ContextSource, cfg: &PipelineConfig) {
        match source {
            ContextSource::Snapshot => {
                let zone_id = Some(row.zone_id.as_str())
                    .filter(|z| !cfg.is_no_zone_id(z))
                    .map(str::to_string);
                let zone_type = Some(row.zone_type.as_str())
                    .filter(|z| !cfg.is_no_zone_type(z))
                    .map(str::to_string);
                overlay(&mut self.phase, owned(&row.phase));
                overlay(&mut self.zone_id_snapshot, zone_id);
                overlay(&mut self.zone_type_snapshot, zone_type);
                overlay(&mut self.snapshot_message, owned(&row.message));
                self.has_snapshot = true;
            }
            ContextSource::Lock => {
                overlay(&mut self.aggression, owned(&row.aggression));
                overlay(&mut self.facilitation, owned(&row.facilitation));
                overlay(&mut self.market_state, owned(&row.market_state));
                overlay(&mut self.raw_state, row.raw_state().map(str::to_string));
                self.has_lock = true;
            }
        }
        self.source_rows += 1;
    }

    fn is_key(&self, session_id: &str, bar: i64) -> bool {
        self.session_id == session_id && self.bar == bar
    }

    fn finalize(mut self) -> Self {
        self.context_complete = self.has_snapshot && self.has_lock;
        self
    }
}

/// Finalized contexts in finalization order, indexed per session by bar.
#[derive(Debug, Default)]
pub struct ContextStore {
    rows: Vec<ContextRow>,
    by_session: HashMap<String, BTreeMap<i64, usize>>,
}

impl ContextStore {
    pub fn insert(&mut self, ctx: ContextRow) {
        self.by_session
            .entry(ctx.session_id.clone())
            .or_default()
            .insert(ctx.bar, self.rows.len());
        self.rows.push(ctx);
    }

    /// Context with the greatest bar <= `bar` in `session_id`.
    pub fn latest_at_or_before(&self, session_id: &str, bar: i64) -> Option<&ContextRow> {
        self.by_session
            .get(session_id)?
            .range(..=bar)
            .next_back()
            .map(|(_, &idx)| &self.rows[idx])
    }

    pub fn into_rows(self) -> Vec<ContextRow> {
        self.rows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementFlag {
    Orphan,
    StaleContext,
    PartialContext,
}

impl EngagementFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementFlag::Orphan => "ORPHAN",
            EngagementFlag::StaleContext => "STALE_CONTEXT",
            EngagementFlag::PartialContext => "PARTIAL_CONTEXT",
        }
    }
}

/// Fields copied from the context an engagement was attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedContext {
    pub bar: i64,
    pub stale: bool,
    pub complete: bool,
    pub aggression: Option<String>,
    pub facilitation: Option<String>,
    pub market_state: Option<String>,
    pub phase: Option<String>,
}

impl AttachedContext {
    fn from_context(ctx: &ContextRow, engagement_bar: i64, stale_bars: i64) -> Self {
        Self {
            bar: ctx.bar,
            stale: engagement_bar.saturating_sub(ctx.bar) > stale_bars,
            complete: ctx.context_complete,
            aggression: ctx.aggression.clone(),
            facilitation: ctx.facilitation.clone(),
            market_state: ctx.market_state.clone(),
            phase: ctx.phase.clone(),
        }
    }
}

/// One admitted ENGAGEMENT_FINAL, created complete.
///
/// Price and metric columns are carried as read; `context` is `None` for
/// an orphan.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementRow {
    pub session_id: String,
    pub bar: i64,
    pub ts: String,
    pub session_type: String,
    pub zone_id: String,
    pub zone_type: String,
    pub entry_price: String,
    pub exit_price: String,
    pub bars: String,
    pub outcome: EngagementOutcome,
    pub escape_vel: String,
    pub vol_ratio: String,
    pub context: Option<AttachedContext>,
    pub flags: Vec<EngagementFlag>,
}

impl EngagementRow {
    pub fn is_orphan(&self) -> bool {
        self.context.is_none()
    }

    pub fn context_bar(&self) -> Option<i64> {
        self.context.as_ref().map(|c| c.bar)
    }

    /// `None` when orphaned.
    pub fn context_stale(&self) -> Option<bool> {
        self.context.as_ref().map(|c| c.stale)
    }

    pub fn has_flag(&self, flag: EngagementFlag) -> bool {
        self.flags.contains(&flag)
    }
}

fn is_valid_price(value: &str) -> bool {
    value
        .trim()
        .parse::<f64>()
        .map(|p| p.is_finite() && p != 0.0)
        .unwrap_or(false)
}

#[derive(Debug, Default)]
pub struct MergeOutput {
    pub contexts: Vec<ContextRow>,
    pub engagements: Vec<EngagementRow>,
}

pub struct MergeEngine<'a> {
    cfg: &'a PipelineConfig,
    open: Option<ContextRow>,
    store: ContextStore,
    snapshot_seen: HashSet<(String, i64)>,
    lock_seen: HashSet<(String, i64)>,
    engagement_seen: HashSet<(String, i64, String)>,
    engagements: Vec<EngagementRow>,
}

impl<'a> MergeEngine<'a> {
    pub fn new(cfg: &'a PipelineConfig) -> Self {
        Self {
            cfg,
            open: None,
            store: ContextStore::default(),
            snapshot_seen: HashSet::new(),
            lock_seen: HashSet::new(),
            engagement_seen: HashSet::new(),
            engagements: Vec::new(),
        }
    }

    /// Runs the merge over sorted rows.
    ///
    /// A fatal error stops the loop; contexts finalized before it and every
    /// admitted engagement are still returned, the open accumulator is not.
    pub fn run(mut self, rows: &[RawEventRow], report: &mut RunReport) -> MergeOutput {
        let _scope = ProfileScope::with_context("merge", &[("rows", json!(rows.len()))]);

        let mut halted = false;
        for row in rows {
            let flow = match row.event() {
                RawEvent::Snapshot(r) => self.on_context(r, ContextSource::Snapshot, report),
                RawEvent::Lock(r) => self.on_context(r, ContextSource::Lock, report),
                RawEvent::EngagementFinal(r) => self.on_engagement(r, report),
                RawEvent::Other(_) => Flow::Continue,
            };
            if flow.is_halt() {
                halted = true;
                break;
            }
        }
        if !halted {
            self.finalize_open();
        }

        let output = MergeOutput {
            contexts: self.store.into_rows(),
            engagements: self.engagements,
        };
        report.counts.context_rows = output.contexts.len() as u64;
        report.counts.engagement_rows = output.engagements.len() as u64;

        log(
            Level::Info,
            Domain::Merge,
            "merge_complete",
            obj(&[
                ("contexts", json!(output.contexts.len())),
                ("engagements", json!(output.engagements.len())),
                (
                    "orphans",
                    json!(output.engagements.iter().filter(|e| e.is_orphan()).count()),
                ),
                ("halted", json!(halted)),
            ]),
        );
        output
    }

    fn finalize_open(&mut self) {
        if let Some(ctx) = self.open.take() {
            self.store.insert(ctx.finalize());
        }
    }

    fn on_context(
        &mut self,
        row: &RawEventRow,
        source: ContextSource,
        report: &mut RunReport,
    ) -> Flow {
        let seen = match source {
            ContextSource::Snapshot => &mut self.snapshot_seen,
            ContextSource::Lock => &mut self.lock_seen,
        };
        if !seen.insert((row.session_id.clone(), row.bar)) {
            return report.record(
                Phase::Merge,
                ErrorRecord::new(source.duplicate_kind())
                    .session(&row.session_id)
                    .bar(row.bar)
                    .event_type(&row.event_type),
            );
        }

        let cfg = self.cfg;
        if let Some(ctx) = self.open.as_mut().filter(|c| c.is_key(&row.session_id, row.bar)) {
            if ctx.session_type != row.session_type {
                return report.record(
                    Phase::Merge,
                    ErrorRecord::new(ErrorKind::IdentityConflict)
                        .session(&ctx.session_id)
                        .bar(ctx.bar)
                        .event_type(&row.event_type)
                        .column("session_type")
                        .values(ctx.session_type.as_str(), row.session_type.as_str()),
                );
            }
            ctx.absorb(row, source, cfg);
        } else {
            self.finalize_open();
            self.open = Some(ContextRow::open(row, source, cfg));
        }
        Flow::Continue
    }

    fn on_engagement(&mut self, row: &RawEventRow, report: &mut RunReport) -> Flow {
        // Any open context (same bar included) must be visible to the lookup.
        self.finalize_open();

        for (column, value) in [("entry_price", &row.entry_price), ("exit_price", &row.exit_price)] {
            if !is_valid_price(value) {
                return report.record(
                    Phase::Merge,
                    ErrorRecord::new(ErrorKind::InvalidEngagementPrice)
                        .session(&row.session_id)
                        .bar(row.bar)
                        .event_type(&row.event_type)
                        .column(column)
                        .value(value.as_str()),
                );
            }
        }

        let outcome = match row.outcome.parse::<EngagementOutcome>() {
            Ok(outcome) => outcome,
            Err(_) => {
                return report.record(
                    Phase::Merge,
                    ErrorRecord::new(ErrorKind::InvalidOutcome)
                        .session(&row.session_id)
                        .bar(row.bar)
                        .event_type(&row.event_type)
                        .column("outcome")
                        .value(row.outcome.as_str()),
                );
            }
        };

        if !self
            .engagement_seen
            .insert((row.session_id.clone(), row.bar, row.zone_id.clone()))
        {
            return report.record(
                Phase::Merge,
                ErrorRecord::new(ErrorKind::DuplicateEngagement)
                    .session(&row.session_id)
                    .bar(row.bar)
                    .event_type(&row.event_type)
                    .value(format!("zone_id={}", row.zone_id)),
            );
        }

        let context = self
            .store
            .latest_at_or_before(&row.session_id, row.bar)
            .map(|ctx| AttachedContext::from_context(ctx, row.bar, self.cfg.stale_bars));

        let mut flags = Vec::new();
        match &context {
            None => flags.push(EngagementFlag::Orphan),
            Some(ctx) => {
                if ctx.stale {
                    flags.push(EngagementFlag::StaleContext);
                }
                if !ctx.complete {
                    flags.push(EngagementFlag::PartialContext);
                }
            }
        }

        self.engagements.push(EngagementRow {
            session_id: row.session_id.clone(),
            bar: row.bar,
            ts: row.ts.clone(),
            session_type: row.session_type.clone(),
            zone_id: row.zone_id.clone(),
            zone_type: row.zone_type.clone(),
            entry_price: row.entry_price.clone(),
            exit_price: row.exit_price.clone(),
            bars: row.bars.clone(),
            outcome,
            escape_vel: row.escape_vel.clone(),
            vol_ratio: row.vol_ratio.clone(),
            context,
            flags,
        });
        Flow::Continue
    }
}
