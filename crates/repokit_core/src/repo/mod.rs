//! Repository layer: generic CRUD and query façade over a store.
//!
//! # Responsibility
//! - Stage writes through the attached unit of work.
//! - Serve reads directly from the store.
//!
//! # Invariants
//! - Mutating calls never touch the store.
//! - Reads never observe staged, uncommitted changes.

pub mod repository;
