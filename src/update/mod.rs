//! Applying updates: the helper-driven rebuild orchestrator and the
//! snapshot session that interactive triggers resolve against.

pub mod orchestrator;
pub mod session;

pub use orchestrator::UpdateOrchestrator;
pub use session::{SnapshotStore, UpdateSnapshot};
