//! Core types: errors, configuration, path handling, resource budgets.

pub mod config;
pub mod errors;
pub mod paths;
pub mod resource;
