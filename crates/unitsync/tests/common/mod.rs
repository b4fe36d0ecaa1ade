//! Shared test utilities for unitsync integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring an in-memory init system to a reconciler
//! - Builder patterns for creating `Systemd` resources programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
