pub mod approval_store;
pub mod checkpoint_store;
pub mod deliverable_store;
pub mod phase_record_store;
pub mod workflow_store;

pub use approval_store::ApprovalStore;
pub use checkpoint_store::CheckpointStore;
pub use deliverable_store::DeliverableStore;
pub use phase_record_store::PhaseRecordStore;
pub use workflow_store::{PhaseCommit, WorkflowStore};
