#![forbid(unsafe_code)]

//! Auxiliary inventory (auxinv): a resumable, incremental scanner that finds
//! images and PDFs under a set of roots and queues new or changed ones for
//! optimization.
//!
//! One scan invocation:
//! 1. **Walks** each root depth-first in a deterministic order
//! 2. **Reconciles** every supported file against the stored records
//! 3. **Batches** inserts and re-queue updates into the record store
//! 4. **Pauses** on a time or memory budget, leaving a checkpoint to resume from
//!
//! # Library usage
//!
//! ```rust,no_run
//! use aux_inventory::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use aux_inventory::core::config::Config;
//! use aux_inventory::scanner::walker::Walker;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod scanner;
pub mod store;
