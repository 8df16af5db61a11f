//! Document policy, batch processing and folder scanning.

mod batch;
mod scan;
mod state_machine;

pub use batch::{BatchEntry, BatchRunner, BatchSummary, EntryStatus};
pub use scan::{PendingFolder, list_dirs, list_pdfs, pending_folders};
pub use state_machine::{Decision, DocumentReport, DocumentStateMachine};
