//! modearb Property-Based Tests
//!
//! Standalone proptest suite for the arbitration invariants.
//!
//! # Usage
//!
//! ```bash
//! cd spec/property-tests
//! cargo test                      # Run all property tests
//! cargo test arbiter              # Run only arbiter tests
//! PROPTEST_CASES=1000 cargo test  # More test cases
//! ```
//!
//! # Test Modules
//!
//! - `arbiter`: storage exclusivity, single controller, transition rules
//! - `buffer`: lock pairing, clear on release
//! - `inbox`: last write wins, independent receivers

// Re-export for convenience in tests
pub use modearb_core::*;
