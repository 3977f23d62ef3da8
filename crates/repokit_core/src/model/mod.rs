//! Entity identity and validation contracts.
//!
//! # Responsibility
//! - Define what a storable, uniquely keyed entity looks like.
//! - Describe how an entity type maps onto a store collection.
//!
//! # Invariants
//! - An entity key never changes once assigned.
//! - Mapping descriptors are passed explicitly; there is no global registry.

pub mod entity;
pub mod validation;
