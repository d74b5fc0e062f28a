// crates/server-harness/src/config/mod.rs
// ============================================================================
// Module: Harness Configuration
// Description: Centralized configuration for the server lifecycle harness.
// Purpose: Provide typed access to harness environment settings and defaults.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Harness configuration is read from environment variables and mapped into a
//! small typed structure passed explicitly to [`crate::Harness`]. Nothing here
//! is stored in process-wide state.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod env;

// ============================================================================
// SECTION: Tests
// ============================================================================


// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use env::HarnessConfig;
pub use env::HarnessEnv;
pub use env::parse_bool_env;
pub use env::read_env_nonempty;
pub use env::read_env_strict;
