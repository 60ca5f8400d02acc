//! Shared test utilities for replica routing crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`fixtures`] - Connected members and topology snapshots in one call
//! - [`strategies`] - Proptest generators for topology and read preference values
//! - [`assert_eventually`] - Poll a condition until it's true or timeout

#![deny(unsafe_code)]

mod assertions;
pub use assertions::assert_eventually;

pub mod fixtures;
pub mod strategies;
