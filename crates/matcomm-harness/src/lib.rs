//! Multi-process test harness: rendezvous allocation, on-disk case layout,
//! rank orchestration and dtype-aware result verification.

pub mod layout;
pub mod orchestrator;
pub mod rendezvous;
pub mod runner;
pub mod verify;

pub use layout::CaseLayout;
pub use orchestrator::{OrchestratorState, RankHandle, RankOrchestrator};
pub use rendezvous::allocate_endpoint;
pub use runner::{BatchSummary, CaseOutcome, CaseRunner};
pub use verify::{tolerance_for, Tolerance, VerifyReport};
