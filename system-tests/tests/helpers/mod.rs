// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared helpers for server-harness system-tests.
// Purpose: Provide stub launch specs and artifact utilities.
// Dependencies: system-tests, server-harness
// ============================================================================

//! ## Overview
//! Shared helpers for server-harness system-tests.
//! Invariants:
//! - Every launched collaborator is terminated before the test returns.
//! - Each test writes a summary even when it panics.

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod artifacts;
pub mod harness;
