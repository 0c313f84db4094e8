//! Observers and Uncaught Failures
//!
//! Observers watch an owner's lifecycle from the outside: node creation,
//! value changes, flush completion and teardown. They are the hook for
//! logging and devtools.
//!
//! Code supplied by the host (observers, listeners, disposal callbacks)
//! runs isolated. A panic inside it is caught and handed to the owner's
//! uncaught handler as an [`UncaughtFailure`], and the flush or teardown
//! that was running carries on with the next callback.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use crate::provider::{Identity, Value};

/// Lifecycle hooks for an owner.
///
/// Every method has an empty default.
pub trait Observer {
    /// A node finished its first initialization.
    fn on_node_added(&self, _provider: &Identity, _value: &Value) {}

    /// A node notified a change during a flush.
    fn on_node_changed(&self, _provider: &Identity, _value: &Value) {}

    /// A flush pass finished.
    fn on_flush_complete(&self) {}

    /// A node was torn down.
    fn on_node_disposed(&self, _provider: &Identity) {}
}

/// Where an isolated failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// An [`Observer`] hook.
    Observer,
    /// A listener registered with `GraphOwner::listen`.
    Listener,
    /// A callback registered with `Ref::on_dispose`.
    DisposeCallback,
    /// A computed node failed to recompute during a flush.
    Recompute,
    /// The host's flush request callback.
    FlushRequest,
}

impl fmt::Display for FailureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Observer => "observer",
            Self::Listener => "listener",
            Self::DisposeCallback => "dispose callback",
            Self::Recompute => "recompute",
            Self::FlushRequest => "flush request",
        };
        f.write_str(name)
    }
}

/// A failure that was isolated instead of propagated.
#[derive(Debug, Clone)]
pub struct UncaughtFailure {
    /// What kind of callback failed.
    pub source: FailureSource,
    /// The provider the callback belonged to, if any.
    pub provider: Option<Arc<str>>,
    /// Panic message or error text.
    pub message: String,
}

impl fmt::Display for UncaughtFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{} failed for `{}`: {}", self.source, provider, self.message),
            None => write!(f, "{} failed: {}", self.source, self.message),
        }
    }
}

/// Receives isolated failures.
pub type UncaughtHandler = Rc<dyn Fn(&UncaughtFailure)>;

/// The handler used when the host does not install one.
pub fn log_uncaught(failure: &UncaughtFailure) {
    tracing::error!(
        source = %failure.source,
        provider = failure.provider.as_deref().unwrap_or("-"),
        "uncaught failure: {}",
        failure.message
    );
}

pub(crate) fn default_handler() -> UncaughtHandler {
    Rc::new(log_uncaught)
}

/// Where isolated callbacks report to.
#[derive(Clone)]
pub(crate) struct FailureSink {
    pub(crate) handler: UncaughtHandler,
    pub(crate) isolate: bool,
}

impl FailureSink {
    /// Run `f`, routing a panic to the uncaught handler.
    ///
    /// With isolation disabled the panic propagates unchanged.
    pub(crate) fn run<F>(&self, source: FailureSource, provider: Option<&Arc<str>>, f: F)
    where
        F: FnOnce(),
    {
        if !self.isolate {
            f();
            return;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            self.report(source, provider, panic_message(payload.as_ref()));
        }
    }

    pub(crate) fn report(&self, source: FailureSource, provider: Option<&Arc<str>>, message: String) {
        let failure = UncaughtFailure {
            source,
            provider: provider.cloned(),
            message,
        };
        (self.handler)(&failure);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
