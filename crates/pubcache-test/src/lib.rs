//! # pubcache-test
//!
//! Integration tests for the published-content cache.
//!
//! This crate contains:
//! - Scenario tests for snapshot visibility, locking and rollback
//! - Scope locking tests
//! - Collection tests
//! - Multi-threaded and randomized stress tests

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;

/// Workload generators
pub mod workload;
