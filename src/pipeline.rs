//! Phase orchestration: load, dedup, three structural checks, merge, output.
//!
//! Phases run strictly in order. The first fatal record skips every later
//! phase, but the four output artifacts are written regardless.

use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::dedup::deduplicate;
use crate::errors::{ErrorKind, ErrorRecord, Result};
use crate::loader::{file_sha256, load_rows};
use crate::logging::{log_phase_halt, log_phase_start, log_run_summary, ProfileScope};
use crate::merge::{MergeEngine, MergeOutput};
use crate::output::{write_outputs, RunSummary};
use crate::report::{ExitCode, Phase, RunReport};
use crate::validate::{check_sort_order, check_timestamps, check_zone_types};

#[derive(Debug)]
pub struct RunOutcome {
    pub output_dir: PathBuf,
    pub merged: MergeOutput,
    pub summary: RunSummary,
    pub exit_code: ExitCode,
}

pub struct MergePipeline<'a> {
    cfg: &'a PipelineConfig,
    report: RunReport,
}

impl<'a> MergePipeline<'a> {
    pub fn new(cfg: &'a PipelineConfig) -> Self {
        Self {
            cfg,
            report: RunReport::new(),
        }
    }

    /// Runs every phase over `input` and writes the artifacts into
    /// `output_dir`. Only a failure to write the artifacts is an `Err`.
    pub fn run(mut self, input: &Path, output_dir: &Path) -> Result<RunOutcome> {
        let _scope = ProfileScope::new("pipeline");

        let merged = match self.run_phases(input) {
            Ok(merged) => merged,
            Err(e) => {
                self.report.record(
                    Phase::Internal,
                    ErrorRecord::new(ErrorKind::InternalError).value(e.to_string()),
                );
                log_phase_halt(
                    Phase::Internal.domain(),
                    Phase::Internal.as_str(),
                    ErrorKind::InternalError.as_str(),
                );
                MergeOutput::default()
            }
        };

        let summary = RunSummary::from_report(&self.report, file_sha256(input).ok());
        write_outputs(output_dir, &merged, &self.report, &summary)?;

        let counts = &self.report.counts;
        log_run_summary(
            counts.input_rows,
            counts.context_rows,
            counts.engagement_rows,
            self.report.fatal_errors(),
            self.report.recoverable_errors(),
            summary.exit_code,
        );

        Ok(RunOutcome {
            output_dir: output_dir.to_path_buf(),
            merged,
            summary,
            exit_code: self.report.exit_code(),
        })
    }

    fn run_phases(&mut self, input: &Path) -> Result<MergeOutput> {
        log_phase_start(Phase::Load.domain(), Phase::Load.as_str(), 0);
        let rows = load_rows(input, &mut self.report)?;
        if self.halted_in(Phase::Load) {
            return Ok(MergeOutput::default());
        }

        log_phase_start(Phase::Dedup.domain(), Phase::Dedup.as_str(), rows.len());
        let rows = deduplicate(rows, &mut self.report);

        for phase in [Phase::SortOrder, Phase::Timestamps, Phase::ZoneTypes] {
            log_phase_start(phase.domain(), phase.as_str(), rows.len());
            let flow = match phase {
                Phase::SortOrder => check_sort_order(&rows, &mut self.report),
                Phase::Timestamps => check_timestamps(&rows, &mut self.report),
                _ => check_zone_types(&rows, self.cfg, &mut self.report),
            };
            if flow.is_halt() {
                self.halted_in(phase);
                return Ok(MergeOutput::default());
            }
        }

        log_phase_start(Phase::Merge.domain(), Phase::Merge.as_str(), rows.len());
        let merged = MergeEngine::new(self.cfg).run(&rows, &mut self.report);
        self.halted_in(Phase::Merge);
        Ok(merged)
    }

    /// Logs the halt if `phase` recorded the run's first fatal error.
    fn halted_in(&self, phase: Phase) -> bool {
        if self.report.halted_in() != Some(phase) {
            return false;
        }
        let error_type = self
            .report
            .fatal_error_kind()
            .map(|k| k.as_str())
            .unwrap_or("");
        log_phase_halt(phase.domain(), phase.as_str(), error_type);
        true
    }
}

/// Convenience wrapper for a single run.
pub fn run(input: &Path, output_dir: &Path, cfg: &PipelineConfig) -> Result<RunOutcome> {
    MergePipeline::new(cfg).run(input, output_dir)
}
