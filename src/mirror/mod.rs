//! The mirror pipeline: pacing, memory budgeting, retries, content
//! classification, integrity verification, and repair.

pub mod classifier;
pub mod ignore;
pub mod ledger;
pub mod limiter;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod processor;
pub mod repair;
pub mod retry;
pub mod verifier;

pub use ledger::CorrectionLedger;
pub use limiter::RequestPacer;
pub use memory::MemoryBudget;
pub use orchestrator::{CategorySelection, DownloadOrchestrator};
pub use processor::{CreatorProfile, MirrorProcessor};
pub use repair::{RepairManager, RepairStatus};
pub use retry::RetryPolicy;
pub use verifier::{FfprobeProbe, IntegrityVerifier};
