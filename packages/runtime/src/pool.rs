//! Context and executor pools backing the multi-threaded worker.
//!
//! A [`ContextPool`] owns a fixed set of [`ContextCell`]s; an
//! [`ExecutorPool`] runs a fixed number of OS threads, each bound to one of
//! the pooled cells, pulling sub-tasks from a shared queue and pushing
//! results (or failures) onto a result queue the owning worker drains.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use conflux_core::error::{BoxError, BrokerError};
use conflux_core::queue::{PullResult, TaskQueue};

use crate::context::{Context, ContextCell};
use crate::stats::PerformanceStatistics;

// ---------------------------------------------------------------------------
// ContextPool
// ---------------------------------------------------------------------------

/// Fixed set of pooled contexts, shared between the executor pool and the
/// worker that broadcasts configuration to them.
pub struct ContextPool<X, C> {
    cells: Vec<Arc<ContextCell<X, C>>>,
}

impl<X, C> ContextPool<X, C>
where
    X: Context<C>,
    C: Clone + Default + Send + 'static,
{
    /// Builds `size` contexts from `factory` (at least one).
    pub fn new(size: usize, factory: impl Fn() -> X) -> Self {
        Self {
            cells: (0..size.max(1))
                .map(|_| Arc::new(ContextCell::new(factory())))
                .collect(),
        }
    }

    /// The pooled cells, for broadcast operations such as configuration
    /// pushes.
    #[must_use]
    pub fn contexts(&self) -> &[Arc<ContextCell<X, C>>] {
        &self.cells
    }

    /// Number of pooled contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the pool is empty (never true; pools hold at least one cell).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Pushes `configuration` to every pooled context; each cell applies it
    /// through its own deferred protocol.
    pub fn set_configuration(&self, configuration: &C) {
        for cell in &self.cells {
            cell.set_configuration(configuration.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Cheap handle for scheduling sub-tasks onto an executor pool, handed to
/// preprocessing steps so they can split one input into many sub-tasks.
pub struct Scheduler<A> {
    tasks: Arc<TaskQueue<A>>,
}

impl<A> Scheduler<A> {
    /// Enqueues one sub-task. Tasks scheduled during shutdown are dropped.
    pub fn schedule(&self, task: A) {
        let _ = self.tasks.push_back(task);
    }
}

impl<A> Clone for Scheduler<A> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorPool
// ---------------------------------------------------------------------------

/// Fixed-size pool of executor threads over a [`ContextPool`].
///
/// Each thread pulls from the shared task queue, invokes its context cell,
/// and pushes the outcome — success or failure — onto the result queue.
/// Dropping the pool closes the task queue, joins every thread, and then
/// closes the result queue.
pub struct ExecutorPool<X, C>
where
    X: Context<C>,
    C: Clone + Default + Send + 'static,
{
    tasks: Arc<TaskQueue<X::Arg>>,
    results: Arc<TaskQueue<Result<X::Res, BoxError>>>,
    stats: Vec<Arc<Mutex<PerformanceStatistics>>>,
    threads: Vec<JoinHandle<()>>,
    pool: Arc<ContextPool<X, C>>,
}

impl<X, C> ExecutorPool<X, C>
where
    X: Context<C>,
    C: Clone + Default + Send + 'static,
{
    /// Spawns `concurrency` executor threads (at least one) over `pool`.
    /// Threads beyond the pool size share cells; the cell lock serializes
    /// them.
    pub fn new(concurrency: usize, pool: Arc<ContextPool<X, C>>) -> Self {
        let tasks: Arc<TaskQueue<X::Arg>> = Arc::new(TaskQueue::unbounded());
        let results: Arc<TaskQueue<Result<X::Res, BoxError>>> =
            Arc::new(TaskQueue::unbounded());

        let mut stats = Vec::new();
        let mut threads = Vec::new();
        for i in 0..concurrency.max(1) {
            let cell = Arc::clone(&pool.contexts()[i % pool.len()]);
            let timings = Arc::new(Mutex::new(PerformanceStatistics::new()));
            stats.push(Arc::clone(&timings));

            let tasks = Arc::clone(&tasks);
            let results = Arc::clone(&results);
            threads.push(thread::spawn(move || {
                while let Ok(arg) = tasks.pull_front() {
                    let start = Instant::now();
                    let outcome = cell.invoke(arg);
                    timings.lock().update(start.elapsed());
                    if results.push_back(outcome).is_err() {
                        break;
                    }
                }
            }));
        }

        Self {
            tasks,
            results,
            stats,
            threads,
            pool,
        }
    }

    /// Enqueues one sub-task for execution.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Shutdown`] once the pool is dropped.
    pub fn schedule_task(&self, task: X::Arg) -> Result<(), BrokerError> {
        self.tasks.push_back(task)
    }

    /// Handle for scheduling from preprocessing steps.
    #[must_use]
    pub fn scheduler(&self) -> Scheduler<X::Arg> {
        Scheduler {
            tasks: Arc::clone(&self.tasks),
        }
    }

    /// Pulls one completed outcome without blocking.
    pub fn try_pull_result(&self) -> PullResult<Result<X::Res, BoxError>> {
        self.results.try_pull_front()
    }

    /// Shared handle to the result queue.
    #[must_use]
    pub fn results(&self) -> Arc<TaskQueue<Result<X::Res, BoxError>>> {
        Arc::clone(&self.results)
    }

    /// Number of scheduled sub-tasks not yet picked up by an executor.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// The context pool the executors run against.
    #[must_use]
    pub fn context_pool(&self) -> &Arc<ContextPool<X, C>> {
        &self.pool
    }

    /// Execution statistics merged across every executor thread.
    #[must_use]
    pub fn performance_statistics(&self) -> PerformanceStatistics {
        let mut merged = PerformanceStatistics::new();
        for timings in &self.stats {
            merged.merge(&timings.lock());
        }
        merged
    }
}

impl<X, C> Drop for ExecutorPool<X, C>
where
    X: Context<C>,
    C: Clone + Default + Send + 'static,
{
    fn drop(&mut self) {
        self.tasks.close();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.results.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
