//! Invariant tests module
//!
//! This module contains tests that verify critical invariants:
//! - Root hash stability under minimisation
//! - Hash stability across JSON round trips

pub mod hash_invariant;
