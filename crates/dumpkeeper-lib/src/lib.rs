//! Shared library for dumpkeeper.
//! Includes config parsing, shared report/status types, paths, schedule parsing
//! and secret redaction.

pub mod config;
pub mod paths;
pub mod redact;
pub mod schedule;
pub mod types;
