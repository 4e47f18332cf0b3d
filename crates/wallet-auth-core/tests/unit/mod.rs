//! Unit tests module
//!
//! This module contains unit tests for individual components:
//! - Configuration tree
//! - Permission rules and builder
//! - Session topology
//! - Signature codec

pub mod permission_test;
