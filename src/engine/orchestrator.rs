//! Cron orchestrator.
//!
//! Bridges a coarse external scheduler to the two round transitions. Each
//! pass selects due rounds by status plus a tolerance window (so a missed
//! tick is picked up by the next one), runs them one by one and reports a
//! per-round outcome. A single round's failure never stops the batch; only
//! a store failure does.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::lifecycle::{RoundLifecycle, TransitionOutcome};
use crate::types::{Round, SettlementError};

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

/// Per-round failure inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundFailure {
    pub round_id: String,
    pub kind: String,
    pub reason: String,
    pub retryable: bool,
}

/// Outcome of one orchestrator pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub already_processed: Vec<String>,
    pub errors: Vec<RoundFailure>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.already_processed.len() + self.errors.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    End,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::End => "end",
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct CronOrchestrator {
    lifecycle: Arc<RoundLifecycle>,
    tolerance: Duration,
}

impl CronOrchestrator {
    pub fn new(lifecycle: Arc<RoundLifecycle>, tolerance: Duration) -> Self {
        Self { lifecycle, tolerance }
    }

    pub fn lifecycle(&self) -> &Arc<RoundLifecycle> {
        &self.lifecycle
    }

    /// Start every `pending` round whose start time is in
    /// `[now - tolerance, now]`.
    pub async fn start_due_rounds(&self, now: DateTime<Utc>) -> Result<BatchReport, SettlementError> {
        let rounds = self
            .lifecycle
            .store()
            .rounds_due_to_start(now - self.tolerance, now)
            .await?;
        self.run(Phase::Start, rounds, now).await
    }

    /// End every `active` round whose end time is in
    /// `[now - tolerance, now]`.
    pub async fn end_due_rounds(&self, now: DateTime<Utc>) -> Result<BatchReport, SettlementError> {
        let rounds = self
            .lifecycle
            .store()
            .rounds_due_to_end(now - self.tolerance, now)
            .await?;
        self.run(Phase::End, rounds, now).await
    }

    async fn run(
        &self,
        phase: Phase,
        rounds: Vec<Round>,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, SettlementError> {
        let started = Instant::now();
        let mut report = BatchReport::default();

        info!(phase = phase.as_str(), due = rounds.len(), "Processing due rounds");

        for round in rounds {
            let result = match phase {
                Phase::Start => self.lifecycle.start_round(&round.id, now).await,
                Phase::End => self.lifecycle.end_round(&round.id, now).await,
            };

            match result {
                Ok(TransitionOutcome::Transitioned) => report.succeeded.push(round.id),
                Ok(TransitionOutcome::AlreadyProcessed) => report.already_processed.push(round.id),
                Err(e) if e.is_infrastructure() => {
                    error!(
                        phase = phase.as_str(),
                        round_id = %round.id,
                        error = %e,
                        completed = report.succeeded.len(),
                        "Store failure, aborting batch"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(phase = phase.as_str(), round_id = %round.id, error = %e, "Round transition failed");
                    report.errors.push(RoundFailure {
                        round_id: round.id,
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            phase = phase.as_str(),
            succeeded = report.succeeded.len(),
            already_processed = report.already_processed.len(),
            failed = report.errors.len(),
            duration_ms = report.duration_ms,
            "Batch complete"
        );
        Ok(report)
    }
}
