//! Error Types
//!
//! Every fallible engine operation returns [`Error`]. The enum is `Clone`
//! because a failed initialization is cached on its node and handed back,
//! unchanged, to every later reader.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by user initializers.
///
/// Boxed so that initializers can use `?` on engine errors and on their own
/// error types alike.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the provider graph.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A provider's initializer failed. Sticky: every later read of the same
    /// node in the same owner yields this exact error.
    #[error("provider `{provider}` failed to initialize: {source}")]
    Initialization {
        /// Name of the provider whose initializer failed.
        provider: Arc<str>,
        /// The failure reported by the initializer.
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },

    /// A provider tried to depend on itself, directly or transitively.
    #[error("circular dependency detected on provider `{provider}`")]
    CircularDependency {
        /// Name of the provider that would have closed the cycle.
        provider: Arc<str>,
    },

    /// The owner (or node) is in a state that does not allow the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation is never allowed, e.g. changing the shape of an
    /// override list.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl Error {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    pub(crate) fn circular(provider: &Arc<str>) -> Self {
        Self::CircularDependency {
            provider: Arc::clone(provider),
        }
    }

    /// Convert the error returned by `provider`'s initializer.
    ///
    /// Cycle errors pass through untouched so they keep unwinding to the
    /// read that started the cycle. Everything else becomes an
    /// [`Error::Initialization`] attributed to `provider`.
    pub(crate) fn from_initializer(provider: &Arc<str>, err: BoxError) -> Self {
        match err.downcast::<Error>() {
            Ok(engine) => match *engine {
                circular @ Error::CircularDependency { .. } => circular,
                other => Error::Initialization {
                    provider: Arc::clone(provider),
                    source: Arc::new(other),
                },
            },
            Err(user) => Error::Initialization {
                provider: Arc::clone(provider),
                source: Arc::from(user),
            },
        }
    }

    /// Whether this error is a [`Error::CircularDependency`].
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }

    /// Whether two errors are the same cached failure.
    ///
    /// Initialization errors compare by the identity of their source, which
    /// is how a replayed failure is told apart from a fresh one.
    pub fn same_failure(&self, other: &Error) -> bool {
        match (self, other) {
            (
                Self::Initialization { source: a, .. },
                Self::Initialization { source: b, .. },
            ) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
