//! End-to-end case execution: sample, persist, compute golden, orchestrate
//! the kernel processes, verify.

use tracing::{info, warn};

use matcomm_common::case::TestCase;
use matcomm_common::{HarnessConfig, HarnessError, Result};
use matcomm_golden::compute_golden_all;
use matcomm_sampler::{sample_inputs, TensorSampler};

use crate::layout::CaseLayout;
use crate::orchestrator::{read_rank_log, RankOrchestrator};
use crate::verify::{verify_rank, VerifyReport};

/// Result of one case.
#[derive(Debug)]
pub enum CaseOutcome {
    Passed(VerifyReport),
    /// Unrepresentative draw (golden overflowed); not a failure.
    Skipped { case_id: String },
    Failed(HarnessError),
}

impl CaseOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed(_))
    }
}

/// Aggregate over a batch of cases.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub passed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.passed + self.skipped + self.failed
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, outcome: &CaseOutcome) {
        match outcome {
            CaseOutcome::Passed(_) => self.passed += 1,
            CaseOutcome::Skipped { .. } => self.skipped += 1,
            CaseOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Drives individual cases through the full pipeline.
pub struct CaseRunner {
    config: HarnessConfig,
    /// Which rank's output is verified; rank 0 by default.
    verify_rank_id: usize,
}

impl CaseRunner {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            verify_rank_id: 0,
        }
    }

    pub fn with_verify_rank(mut self, rank: usize) -> Self {
        self.verify_rank_id = rank;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Generate (or reuse cached) inputs and golden for `case` without
    /// running the kernel. Returns the populated layout.
    pub fn prepare(&self, case: &TestCase) -> Result<CaseLayout> {
        case.validate()?;
        let layout = CaseLayout::new(&self.config.data_root, case);

        if layout.is_populated(case) {
            info!(case = %case.label(), dir = %layout.case_dir().display(), "reusing cached case data");
            return Ok(layout);
        }

        let mut sampler = TensorSampler::new(self.config.seed, self.config.gen_mode);
        let inputs = sample_inputs(case, &mut sampler)?;
        let goldens = compute_golden_all(case, &inputs)?;
        layout.write_case(case, &inputs, &goldens)?;
        info!(case = %case.label(), dir = %layout.case_dir().display(), "case data generated");
        Ok(layout)
    }

    /// Run one case end to end.
    pub fn run_case(&self, case: &TestCase) -> CaseOutcome {
        let layout = match self.prepare(case) {
            Ok(layout) => layout,
            Err(err) if err.is_skippable() => {
                info!(case = %case.label(), "golden overflowed, skipping case");
                return CaseOutcome::Skipped {
                    case_id: case.case_id(),
                };
            }
            Err(err) => return CaseOutcome::Failed(err),
        };

        let mut orchestrator = RankOrchestrator::new(case, &self.config, &layout);
        if let Err(err) = orchestrator.run() {
            if let HarnessError::RankProcessFailure { rank, log_path, .. } = &err {
                // Surface the failing rank's log; no tolerance check runs.
                warn!(
                    case = %case.label(),
                    rank = *rank,
                    log = %read_rank_log(log_path),
                    "rank process failed"
                );
            }
            return CaseOutcome::Failed(err);
        }

        match verify_rank(case, &layout, self.verify_rank_id) {
            Ok(report) => CaseOutcome::Passed(report),
            Err(err) => CaseOutcome::Failed(err),
        }
    }

    /// Run a batch of cases, aggregating pass/skip/fail counts.
    pub fn run_batch(&self, cases: &[TestCase]) -> (BatchSummary, Vec<CaseOutcome>) {
        let mut summary = BatchSummary::default();
        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            let outcome = self.run_case(case);
            summary.record(&outcome);
            outcomes.push(outcome);
        }
        info!(
            passed = summary.passed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch complete"
        );
        (summary, outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_outcome_kind() {
        let mut summary = BatchSummary::default();
        summary.record(&CaseOutcome::Skipped { case_id: "x".into() });
        summary.record(&CaseOutcome::Failed(HarnessError::InvalidCase("y".into())));
        assert_eq!(summary.total(), 2);
        assert!(!summary.all_passed());
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
    }
}
