// system-tests/src/lib.rs
// ============================================================================
// Module: Server Harness System Tests Library
// Description: Shared configuration and the stub collaborator for system tests.
// Purpose: Provide common utilities for harness system-test binaries.
// Dependencies: axum, clap, serde, tokio
// ============================================================================

//! ## Overview
//! This crate hosts shared configuration and the stub inference server used by
//! the harness system-tests in `system-tests/tests`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod stub;
