//! Append-only JSONL scan journal.

pub mod jsonl;
