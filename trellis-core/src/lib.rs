//! Trellis Core
//!
//! This crate provides a dependency-injection and reactive-state container.
//! It implements:
//!
//! - Providers: typed, named recipes for a value (state, computed, constant)
//! - Graph owners that materialize providers lazily and cache the result
//! - Batched change propagation in dependency order
//! - Scoped overrides through parent/child owners
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `provider`: Provider declarations and the descriptors behind them
//! - `graph`: Node records, the node arena and the depth order
//! - `owner`: The owner API, lookup, flushing, overrides and teardown
//! - `observer`: Lifecycle hooks and isolation of host callbacks
//! - `config`: Serializable owner settings
//! - `snapshot`: Serializable views of an owner's graph
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{GraphOwner, Provider, StateProvider};
//!
//! let count = StateProvider::with_value("count", 0);
//! let doubled = {
//!     let count = count.clone();
//!     Provider::new("doubled", move |r| Ok(r.watch(&count)? * 2))
//! };
//!
//! let owner = GraphOwner::new();
//! assert_eq!(owner.read(&doubled)?, 0);
//!
//! owner.set(&count, 5)?;
//! owner.flush()?;
//! assert_eq!(owner.read(&doubled)?, 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod observer;
pub mod owner;
pub mod provider;
pub mod snapshot;

pub use config::{FlushPolicy, OwnerConfig};
pub use error::{BoxError, Error, Result};
pub use observer::{FailureSource, Observer, UncaughtFailure};
pub use owner::{GraphOwner, GraphOwnerBuilder, ListenerHandle, NodeRef, Override, Ref, Subscription};
pub use provider::{Identity, Provider, ProviderKind, Readable, StateProvider, Value};
pub use snapshot::{GraphSnapshot, NodeSnapshot};
