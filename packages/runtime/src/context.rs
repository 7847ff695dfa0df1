//! Reusable execution contexts with deferred configuration swap.
//!
//! A [`Context`] is the per-task state a multi-threaded worker pools and
//! reuses across tasks. [`ContextCell`] wraps one context together with its
//! live configuration under a single lock, so configuration pushed while a
//! task runs is committed at the next invocation boundary and a task never
//! observes a half-applied configuration.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use conflux_core::error::BoxError;

/// Per-task processing state, pooled and reused by a multi-threaded worker.
pub trait Context<C>: Send + 'static {
    /// Sub-task input scheduled onto the executor pool.
    type Arg: Send + 'static;
    /// Output handed back to the worker's postprocessing step.
    type Res: Send + 'static;

    /// Processes one sub-task under the context's current configuration.
    ///
    /// # Errors
    ///
    /// Failures travel through the executor pool's result queue and surface
    /// on the owning worker's error service.
    fn run(&mut self, configuration: &C, arg: Self::Arg) -> Result<Self::Res, BoxError>;

    /// Reacts to a committed configuration change. Runs under the same lock
    /// as [`run`](Context::run), so derived state updated here is never
    /// observed mid-task. The default does nothing.
    fn reconfigure(&mut self, _configuration: &C) {}
}

struct Live<X, C> {
    context: X,
    configuration: C,
}

/// One pooled context plus its configuration, with deferred staging.
///
/// The live pair sits under the lock held across [`invoke`](ContextCell::invoke);
/// the staged value has its own lock. Lock order on simultaneous
/// acquisition is live before staged;
/// [`set_configuration`](ContextCell::set_configuration) only ever try-locks
/// the live side.
pub struct ContextCell<X, C> {
    live: Mutex<Live<X, C>>,
    staged: Mutex<C>,
    changed: AtomicBool,
}

impl<X, C> ContextCell<X, C>
where
    X: Context<C>,
    C: Clone + Default + Send + 'static,
{
    /// Wraps a context with a default configuration.
    pub fn new(context: X) -> Self {
        Self {
            live: Mutex::new(Live {
                context,
                configuration: C::default(),
            }),
            staged: Mutex::new(C::default()),
            changed: AtomicBool::new(false),
        }
    }

    /// Commits any pending configuration, then runs one sub-task under the
    /// live lock.
    ///
    /// # Errors
    ///
    /// Whatever [`Context::run`] returns.
    pub fn invoke(&self, arg: X::Arg) -> Result<X::Res, BoxError> {
        if self.changed.load(Ordering::Acquire) {
            self.commit();
        }
        let mut live = self.live.lock();
        let Live {
            context,
            configuration,
        } = &mut *live;
        context.run(configuration, arg)
    }

    /// Stages `configuration`; commits immediately when no task is running,
    /// otherwise defers to the next [`invoke`](ContextCell::invoke).
    pub fn set_configuration(&self, configuration: C) {
        let mut staged = self.staged.lock();
        *staged = configuration;
        match self.live.try_lock() {
            Some(mut live) => {
                live.configuration = staged.clone();
                let Live {
                    context,
                    configuration,
                } = &mut *live;
                context.reconfigure(configuration);
                self.changed.store(false, Ordering::Release);
            }
            None => self.changed.store(true, Ordering::Release),
        }
    }

    /// Returns the most recently staged configuration.
    #[must_use]
    pub fn get_configuration(&self) -> C {
        self.staged.lock().clone()
    }

    /// Whether a staged configuration awaits commit.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    fn commit(&self) {
        let mut live = self.live.lock();
        let staged = self.staged.lock();
        live.configuration = staged.clone();
        drop(staged);
        let Live {
            context,
            configuration,
        } = &mut *live;
        context.reconfigure(configuration);
        self.changed.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
