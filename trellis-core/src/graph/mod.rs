//! Dependency Graph
//!
//! This module holds the data side of the engine: node records, the arena
//! they live in, and the depth order each scope walks when it flushes.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are materialized providers
//! - Edges are dependencies: if A depends on B, B lists A as a dependent
//!
//! Every node carries a depth: 0 when it has no dependencies, otherwise one
//! more than its deepest dependency. Walking a scope in ascending depth
//! therefore visits every dependency before its dependents.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena and refer to each other by [`NodeKey`] instead
//!    of holding references, so edges can cross scopes without shared
//!    mutable pointers.
//!
//! 2. Depth only grows. A node never moves towards the front of the order,
//!    which keeps the flush cursor valid while nodes are repositioned.
//!
//! 3. Both edge directions are stored to make fan-out and teardown cheap.

pub(crate) mod arena;
pub(crate) mod node;
pub(crate) mod order;

pub use node::NodeKey;
