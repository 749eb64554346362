//! Round engine: universe locking, the lifecycle state machine and the
//! cron orchestrator that drives it.

pub mod lifecycle;
pub mod orchestrator;
pub mod universe;

pub use lifecycle::{DistributionOutcome, RankingReport, RoundLifecycle, TransitionOutcome};
pub use orchestrator::{BatchReport, CronOrchestrator, RoundFailure};
pub use universe::UniverseLocker;
