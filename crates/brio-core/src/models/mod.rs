pub mod approval;
pub mod checkpoint;
pub mod deliverable;
pub mod phase_record;
pub mod workflow;

pub use approval::*;
pub use checkpoint::*;
pub use deliverable::*;
pub use phase_record::*;
pub use workflow::*;
