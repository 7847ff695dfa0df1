//! Worker fronting an executor pool with a pre/post-processing thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use conflux_core::broker::ServiceBroker;
use conflux_core::error::{BoxError, BrokerError};
use conflux_core::queue::{PullResult, TaskQueue};
use conflux_core::service::Service;

use crate::config::{ConfigSlot, Configuration};
use crate::context::Context;
use crate::pool::{ContextPool, ExecutorPool, Scheduler};
use crate::stats::PerformanceStatistics;
use crate::worker::base::{forward_failure, WorkerCore, WorkerFailure};

/// Number of executor threads (and default pooled contexts) per worker.
const EXECUTOR_THREADS: usize = 4;

/// Poll interval of the pre/post-processing loop. A deliberate
/// simplification over a two-condition-variable design; short enough that
/// input latency stays in the tens of microseconds.
const IDLE_POLL: Duration = Duration::from_micros(50);

/// Pre- and post-processing steps of a [`MultiThreadWorker`].
pub trait Stage<C>: Send + 'static {
    /// Task type pulled from the input queue.
    type Arg: Clone + Default + Send + Sync + 'static;
    /// Result type published on `<name>.result`.
    type Res: Clone + Send + Sync + 'static;
    /// Execution context the pooled sub-tasks run in.
    type Ctx: Context<C>;

    /// Splits one input into zero or more sub-tasks and schedules them.
    ///
    /// # Errors
    ///
    /// Failures are forwarded to `error.<name>` and the worker keeps going.
    fn preprocess(
        &mut self,
        configuration: &C,
        arg: Self::Arg,
        scheduler: &Scheduler<<Self::Ctx as Context<C>>::Arg>,
    ) -> Result<(), BoxError>;

    /// Turns one completed sub-task into a published result.
    ///
    /// # Errors
    ///
    /// Failures are forwarded to `error.<name>` and the worker keeps going.
    fn postprocess(
        &mut self,
        configuration: &C,
        done: <Self::Ctx as Context<C>>::Res,
    ) -> Result<Self::Res, BoxError>;
}

/// Worker that schedules sub-tasks onto a pool of executor threads, each
/// with its own reusable context.
///
/// A single pre/post-processing thread feeds the pool from the input queue
/// and publishes post-processed results on `<name>.result`, so user code in
/// [`Stage`] is never entered concurrently. Context failures surface
/// through the pool's result queue and are forwarded to `error.<name>`.
pub struct MultiThreadWorker<S, C = Configuration>
where
    S: Stage<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    core: WorkerCore<C>,
    result: Service<(), S::Res>,
    input: Arc<TaskQueue<S::Arg>>,
    executors: ExecutorPool<S::Ctx, C>,
    terminate: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<S, C> MultiThreadWorker<S, C>
where
    S: Stage<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    /// Creates a worker with a default pool of four contexts, one per
    /// executor thread.
    ///
    /// # Errors
    ///
    /// Broker registration errors; nothing stays registered on failure.
    pub fn new(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        stage: S,
    ) -> Result<Self, BrokerError>
    where
        S::Ctx: Default,
    {
        Self::with_pool(
            name,
            broker,
            stage,
            ContextPool::new(EXECUTOR_THREADS, S::Ctx::default),
        )
    }

    /// Creates a worker over an explicitly built context pool.
    ///
    /// # Errors
    ///
    /// Broker registration errors; nothing stays registered on failure.
    pub fn with_pool(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        stage: S,
        pool: ContextPool<S::Ctx, C>,
    ) -> Result<Self, BrokerError> {
        let pool = Arc::new(pool);
        let staging_hook = {
            let pool = Arc::clone(&pool);
            Arc::new(move |configuration: &C| pool.set_configuration(configuration))
                as Arc<dyn Fn(&C) + Send + Sync>
        };
        let core = WorkerCore::with_staging_hook(name, Arc::clone(&broker), Some(staging_hook))?;

        let result: Service<(), S::Res> = Service::new(format!("{}.result", core.name()));
        broker.add(&result)?;

        let executors = ExecutorPool::new(EXECUTOR_THREADS, pool);
        let input: Arc<TaskQueue<S::Arg>> = Arc::new(TaskQueue::unbounded());
        let terminate = Arc::new(AtomicBool::new(false));

        let thread = {
            let input = Arc::clone(&input);
            let terminate = Arc::clone(&terminate);
            let slot = Arc::clone(core.configuration_slot());
            let scheduler = executors.scheduler();
            let completed = executors.results();
            let result = result.clone();
            let errors = core.error_channel();
            thread::spawn(move || {
                stage_loop(
                    stage, &input, &terminate, &scheduler, &completed, &result, &errors, &slot,
                );
            })
        };

        Ok(Self {
            core,
            result,
            input,
            executors,
            terminate,
            thread: Some(thread),
        })
    }

    /// Creates a worker subscribed to `<input>.result` for every name in
    /// `inputs`. Missing providers are logged at severe level and skipped.
    ///
    /// # Errors
    ///
    /// Same as [`new`](MultiThreadWorker::new).
    pub fn with_inputs(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        stage: S,
        inputs: &[&str],
    ) -> Result<Self, BrokerError>
    where
        S::Ctx: Default,
    {
        let mut worker = Self::new(name, broker, stage)?;
        for input in inputs {
            let queue = Arc::clone(&worker.input);
            worker.core.register_callback::<(), S::Arg, _>(
                &format!("{input}.result"),
                move |arg: &S::Arg| {
                    let _ = queue.push_back(arg.clone());
                },
            );
        }
        Ok(worker)
    }

    /// Creates a worker fed directly by the given services.
    ///
    /// # Errors
    ///
    /// Same as [`new`](MultiThreadWorker::new).
    pub fn with_services(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        stage: S,
        inputs: &[&Service<(), S::Arg>],
    ) -> Result<Self, BrokerError>
    where
        S::Ctx: Default,
    {
        let mut worker = Self::new(name, broker, stage)?;
        for service in inputs {
            let queue = Arc::clone(&worker.input);
            let subscription = service.connect(move |arg: &S::Arg| {
                let _ = queue.push_back(arg.clone());
            });
            worker.core.adopt(subscription);
        }
        Ok(worker)
    }

    /// The worker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// The `<name>.result` service, for direct downstream wiring.
    #[must_use]
    pub fn result_service(&self) -> &Service<(), S::Res> {
        &self.result
    }

    /// Number of sub-tasks waiting in the executor pool.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.executors.pending()
    }

    /// Execution statistics aggregated across the executor pool.
    #[must_use]
    pub fn performance_statistics(&self) -> PerformanceStatistics {
        self.executors.performance_statistics()
    }

    /// Stages a configuration on the worker and pushes it to every pooled
    /// context. The broadcast is unconditional; each context applies it
    /// through its own deferred protocol, so sub-tasks in flight finish
    /// under the configuration they started with.
    pub fn set_configuration(&self, configuration: C) {
        self.core.set_configuration(configuration);
    }

    /// The most recently set configuration.
    #[must_use]
    pub fn get_configuration(&self) -> C {
        self.core.get_configuration()
    }
}

impl<S, C> Drop for MultiThreadWorker<S, C>
where
    S: Stage<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.core.broker().remove(self.result.name());
        self.terminate.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        // Executor pool drop closes the task queue and joins its threads.
    }
}

#[allow(clippy::too_many_arguments)]
fn stage_loop<S, C>(
    mut stage: S,
    input: &TaskQueue<S::Arg>,
    terminate: &AtomicBool,
    scheduler: &Scheduler<<S::Ctx as Context<C>>::Arg>,
    completed: &TaskQueue<Result<<S::Ctx as Context<C>>::Res, BoxError>>,
    result: &Service<(), S::Res>,
    errors: &Service<(), WorkerFailure>,
    slot: &ConfigSlot<C>,
) where
    S: Stage<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    while !terminate.load(Ordering::SeqCst) {
        if slot.is_changed() {
            slot.commit();
        }

        if let PullResult::Item(arg) = input.try_pull_front() {
            let outcome = {
                let configuration = slot.lock_live();
                stage.preprocess(&configuration, arg, scheduler)
            };
            if let Err(error) = outcome {
                forward_failure(errors, error);
            }
        }

        match completed.try_pull_front() {
            PullResult::Item(Ok(done)) => {
                let outcome = {
                    let configuration = slot.lock_live();
                    stage.postprocess(&configuration, done).and_then(|res| {
                        result
                            .emit(&res)
                            .map_err(|error| Box::new(error) as BoxError)
                    })
                };
                if let Err(error) = outcome {
                    forward_failure(errors, error);
                }
            }
            PullResult::Item(Err(error)) => forward_failure(errors, error),
            PullResult::Empty | PullResult::Closed => {}
        }

        thread::sleep(IDLE_POLL);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
