pub mod reconciliation;

pub use reconciliation::{ReconciliationState, ReconciliationWorkflow};
