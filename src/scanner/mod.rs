//! File discovery and reconciliation: walker, type sniffing, path filters,
//! record comparison, and the budgeted scan loop that ties them together.

pub mod filters;
pub mod mime;
pub mod orchestrator;
pub mod reconcile;
pub mod reference;
pub mod walker;
