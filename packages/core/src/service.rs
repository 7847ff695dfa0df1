//! Typed, named multicast channels (signal/slot services).
//!
//! A [`Service<R, A>`] is a named channel carrying payloads of type `A` to
//! any number of subscribers, each returning an `R` (`()` for fire-and-forget
//! channels). Cloning a service is cheap and shares the underlying dispatcher,
//! so a clone handed to another thread emits into the same subscriber list.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{BoxError, BrokerError};

type Callback<R, A> = Arc<dyn Fn(&A) -> Result<R, BoxError> + Send + Sync>;

struct SubscriberSlot<R, A> {
    id: u64,
    callback: Callback<R, A>,
}

/// How the dispatcher reacts to a failing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailurePolicy {
    /// Stop dispatching and surface the first failure to the emitter.
    Propagate,
    /// Keep dispatching; failures are logged and the last success wins.
    Trap,
}

struct Dispatcher<R, A> {
    slots: RwLock<Vec<SubscriberSlot<R, A>>>,
    next_id: AtomicU64,
    policy: FailurePolicy,
}

impl<R, A> Dispatcher<R, A> {
    fn new(policy: FailurePolicy) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            policy,
        }
    }

    fn connect(&self, callback: Callback<R, A>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.write().push(SubscriberSlot { id, callback });
        id
    }

    fn disconnect(&self, id: u64) {
        self.slots.write().retain(|slot| slot.id != id);
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle to a single subscriber registration.
///
/// Dropping the handle disconnects the subscriber. Call [`detach`] to hand
/// the callback's lifetime over to the dispatcher instead, or
/// [`disconnect`] when the intent should be explicit at the call site.
///
/// [`detach`]: Subscription::detach
/// [`disconnect`]: Subscription::disconnect
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new<R, A>(dispatcher: &Arc<Dispatcher<R, A>>, id: u64) -> Self
    where
        R: 'static,
        A: 'static,
    {
        let weak: Weak<Dispatcher<R, A>> = Arc::downgrade(dispatcher);
        Self {
            cancel: Some(Box::new(move || {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.disconnect(id);
                }
            })),
        }
    }

    /// Disconnects the subscriber now. Equivalent to dropping the handle.
    pub fn disconnect(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Leaves the subscriber connected for the dispatcher's lifetime.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A named multicast channel with payload `A` and per-subscriber result `R`.
///
/// Emission is synchronous on the caller's thread and preserves subscriber
/// registration order. For non-`()` results the last subscriber's result is
/// returned; with no subscribers connected, `R::default()` is returned, so a
/// result-less emit never fails just because nobody is listening yet.
pub struct Service<R, A> {
    name: Arc<str>,
    dispatcher: Arc<Dispatcher<R, A>>,
}

impl<R, A> Clone for Service<R, A> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

impl<R, A> fmt::Debug for Service<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<R, A> Service<R, A> {
    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of currently connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.dispatcher.slots.read().len()
    }
}

impl<R, A> Service<R, A>
where
    R: Default + 'static,
    A: 'static,
{
    /// Creates a service with a fresh dispatcher.
    ///
    /// A failing subscriber stops dispatch and the failure is surfaced to
    /// the emitter.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_policy(name, FailurePolicy::Propagate)
    }

    /// Creates a service whose dispatcher traps subscriber failures:
    /// remaining subscribers still run, failures are logged, and the last
    /// successful result wins.
    pub fn new_trapping(name: impl Into<String>) -> Self {
        Self::with_policy(name, FailurePolicy::Trap)
    }

    fn with_policy(name: impl Into<String>, policy: FailurePolicy) -> Self {
        Self {
            name: Arc::from(name.into()),
            dispatcher: Arc::new(Dispatcher::new(policy)),
        }
    }

    /// Subscribes an infallible callback.
    pub fn connect<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.connect_fallible(move |arg| Ok(callback(arg)))
    }

    /// Subscribes a callback that may fail; the failure is surfaced to the
    /// emitter according to the dispatcher's failure policy.
    pub fn connect_fallible<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&A) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        let id = self.dispatcher.connect(Arc::new(callback));
        Subscription::new(&self.dispatcher, id)
    }

    /// Invokes every subscriber in registration order on the caller's thread.
    ///
    /// The subscriber list is snapshotted at entry, so callbacks may connect
    /// or disconnect subscribers on this same service without deadlocking;
    /// such changes take effect on the next emit.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Subscriber`] when a callback fails and the dispatcher
    /// propagates failures (the default).
    pub fn emit(&self, arg: &A) -> Result<R, BrokerError> {
        let snapshot: Vec<Callback<R, A>> = self
            .dispatcher
            .slots
            .read()
            .iter()
            .map(|slot| Arc::clone(&slot.callback))
            .collect();

        let mut last = None;
        let mut last_err = None;
        for callback in snapshot {
            match callback(arg) {
                Ok(result) => last = Some(result),
                Err(source) => match self.dispatcher.policy {
                    FailurePolicy::Propagate => {
                        return Err(BrokerError::Subscriber {
                            name: self.name.to_string(),
                            source,
                        })
                    }
                    FailurePolicy::Trap => {
                        tracing::warn!(service = %self.name, error = %source, "trapped subscriber failure");
                        last_err = Some(source);
                    }
                },
            }
        }

        match (last, last_err) {
            (Some(result), _) => Ok(result),
            (None, Some(source)) => Err(BrokerError::Subscriber {
                name: self.name.to_string(),
                source,
            }),
            (None, None) => Ok(R::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
