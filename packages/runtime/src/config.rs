//! Configuration documents and the deferred-staging cell.
//!
//! Workers and contexts are generic over any `Clone + Default + Send`
//! configuration type; [`Configuration`] is the canonical tree-structured
//! document used when nothing more specific is at hand.
//!
//! [`ConfigSlot`] implements the runtime's deferred-configuration protocol:
//! a newly set configuration becomes live immediately when the worker is
//! idle, and otherwise at the next quiescent point between tasks, so one
//! task always executes under exactly one configuration.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Canonical tree-structured configuration document.
pub type Configuration = serde_json::Value;

/// Two-phase configuration holder.
///
/// The live value sits under the lock a worker holds while running a task;
/// the staged value has its own lock so setters never wait on a running
/// task. Lock order on simultaneous acquisition is live before staged —
/// [`set`](ConfigSlot::set) only ever try-locks the live side, so it cannot
/// deadlock against a committing worker.
#[derive(Debug, Default)]
pub struct ConfigSlot<C> {
    live: Mutex<C>,
    staged: Mutex<C>,
    changed: AtomicBool,
}

impl<C> ConfigSlot<C>
where
    C: Clone + Default + Send,
{
    /// Creates a slot holding `C::default()` on both sides.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: Mutex::new(C::default()),
            staged: Mutex::new(C::default()),
            changed: AtomicBool::new(false),
        }
    }

    /// Stages `configuration`, committing it immediately when the live side
    /// is idle and deferring to the next [`commit`](ConfigSlot::commit)
    /// otherwise. Each call overwrites the previous staged value.
    pub fn set(&self, configuration: C) {
        let mut staged = self.staged.lock();
        *staged = configuration;
        match self.live.try_lock() {
            Some(mut live) => {
                *live = staged.clone();
                self.changed.store(false, Ordering::Release);
            }
            None => self.changed.store(true, Ordering::Release),
        }
    }

    /// Returns the most recently set configuration, live or not yet.
    #[must_use]
    pub fn get(&self) -> C {
        self.staged.lock().clone()
    }

    /// Whether a staged configuration is waiting for a commit.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Copies the staged configuration into the live slot. Called by worker
    /// loops at quiescent points, never mid-task.
    pub fn commit(&self) {
        let mut live = self.live.lock();
        let staged = self.staged.lock();
        *live = staged.clone();
        self.changed.store(false, Ordering::Release);
    }

    /// Locks the live configuration for the duration of one task.
    pub fn lock_live(&self) -> MutexGuard<'_, C> {
        self.live.lock()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
