//! Worker with one dedicated thread pulling tasks from an input queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use conflux_core::broker::ServiceBroker;
use conflux_core::error::{BoxError, BrokerError};
use conflux_core::queue::TaskQueue;
use conflux_core::service::Service;

use crate::config::{ConfigSlot, Configuration};
use crate::stats::PerformanceStatistics;
use crate::worker::base::{forward_failure, WorkerCore, WorkerFailure};

/// User processing step of a [`SingleThreadWorker`].
pub trait Runner<C>: Send + 'static {
    /// Task type pulled from the input queue. The `Default` value doubles
    /// as the shutdown sentinel.
    type Arg: Clone + Default + Send + Sync + 'static;
    /// Result type published on `<name>.result`.
    type Res: Clone + Send + Sync + 'static;

    /// Processes one task under the worker's current configuration.
    ///
    /// # Errors
    ///
    /// Failures are forwarded to `error.<name>` and the worker keeps going.
    fn run(&mut self, configuration: &C, arg: Self::Arg) -> Result<Self::Res, BoxError>;
}

/// Worker that serializes all processing on one dedicated OS thread.
///
/// Tasks arrive on an unbounded input queue — pushed by input-service
/// subscriptions or broker callbacks — and results are published on the
/// worker's `<name>.result` service. Dropping the worker deregisters the
/// result service, wakes the thread with a sentinel task, and joins it;
/// the task in flight is allowed to finish.
pub struct SingleThreadWorker<H, C = Configuration>
where
    H: Runner<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    core: WorkerCore<C>,
    result: Service<(), H::Res>,
    input: Arc<TaskQueue<H::Arg>>,
    terminate: Arc<AtomicBool>,
    timings: Arc<Mutex<PerformanceStatistics>>,
    thread: Option<JoinHandle<()>>,
}

impl<H, C> SingleThreadWorker<H, C>
where
    H: Runner<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    /// Creates a bare worker with no inputs wired yet.
    ///
    /// # Errors
    ///
    /// Broker registration errors; nothing stays registered on failure.
    pub fn new(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        runner: H,
    ) -> Result<Self, BrokerError> {
        let core = WorkerCore::new(name, Arc::clone(&broker))?;
        let result: Service<(), H::Res> = Service::new(format!("{}.result", core.name()));
        broker.add(&result)?;

        let input: Arc<TaskQueue<H::Arg>> = Arc::new(TaskQueue::unbounded());
        let terminate = Arc::new(AtomicBool::new(false));
        let timings = Arc::new(Mutex::new(PerformanceStatistics::new()));

        let thread = {
            let input = Arc::clone(&input);
            let terminate = Arc::clone(&terminate);
            let timings = Arc::clone(&timings);
            let slot = Arc::clone(core.configuration_slot());
            let result = result.clone();
            let errors = core.error_channel();
            thread::spawn(move || {
                worker_loop(runner, &input, &terminate, &timings, &result, &errors, &slot);
            })
        };

        Ok(Self {
            core,
            result,
            input,
            terminate,
            timings,
            thread: Some(thread),
        })
    }

    /// Creates a worker subscribed to `<input>.result` for every name in
    /// `inputs`. Providers that are not registered yet are logged at
    /// severe level and skipped, matching late-binding pipelines.
    ///
    /// # Errors
    ///
    /// Same as [`new`](SingleThreadWorker::new).
    pub fn with_inputs(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        runner: H,
        inputs: &[&str],
    ) -> Result<Self, BrokerError> {
        let mut worker = Self::new(name, broker, runner)?;
        for input in inputs {
            let queue = Arc::clone(&worker.input);
            worker.core.register_callback::<(), H::Arg, _>(
                &format!("{input}.result"),
                move |arg: &H::Arg| {
                    let _ = queue.push_back(arg.clone());
                },
            );
        }
        Ok(worker)
    }

    /// Creates a worker fed directly by the given services, without going
    /// through the broker's namespace.
    ///
    /// # Errors
    ///
    /// Same as [`new`](SingleThreadWorker::new).
    pub fn with_services(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        runner: H,
        inputs: &[&Service<(), H::Arg>],
    ) -> Result<Self, BrokerError> {
        let mut worker = Self::new(name, broker, runner)?;
        for service in inputs {
            let queue = Arc::clone(&worker.input);
            let subscription = service.connect(move |arg: &H::Arg| {
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
    pub fn result_service(&self) -> &Service<(), H::Res> {
        &self.result
    }

    /// Number of queued, not yet processed tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.input.len()
    }

    /// Execution-time statistics over completed tasks.
    #[must_use]
    pub fn performance_statistics(&self) -> PerformanceStatistics {
        self.timings.lock().clone()
    }

    /// Stages a configuration per the deferred protocol.
    pub fn set_configuration(&self, configuration: C) {
        self.core.set_configuration(configuration);
    }

    /// The most recently set configuration.
    #[must_use]
    pub fn get_configuration(&self) -> C {
        self.core.get_configuration()
    }
}

impl<H, C> Drop for SingleThreadWorker<H, C>
where
    H: Runner<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.core.broker().remove(self.result.name());
        self.terminate.store(true, Ordering::SeqCst);
        let _ = self.input.push_back(H::Arg::default());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop<H, C>(
    mut runner: H,
    input: &TaskQueue<H::Arg>,
    terminate: &AtomicBool,
    timings: &Mutex<PerformanceStatistics>,
    result: &Service<(), H::Res>,
    errors: &Service<(), WorkerFailure>,
    slot: &ConfigSlot<C>,
) where
    H: Runner<C>,
    C: Clone + Default + Send + Sync + 'static,
{
    loop {
        if slot.is_changed() {
            slot.commit();
        }
        let Ok(arg) = input.pull_front() else {
            break;
        };
        if terminate.load(Ordering::SeqCst) {
            break;
        }

        // Hold the configuration lock across the task so the configuration
        // cannot change underneath it.
        let configuration = slot.lock_live();
        let start = Instant::now();
        match runner.run(&configuration, arg) {
            Ok(res) => {
                timings.lock().update(start.elapsed());
                if let Err(error) = result.emit(&res) {
                    forward_failure(errors, Box::new(error));
                }
            }
            Err(error) => forward_failure(errors, error),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conflux_core::service::Subscription;

    use super::*;

    struct Upcase;

    impl Runner<String> for Upcase {
        type Arg = String;
        type Res = String;

        fn run(&mut self, _configuration: &String, arg: String) -> Result<String, BoxError> {
            if arg == "poison" {
                return Err("cannot process poison".into());
            }
            Ok(arg.to_uppercase())
        }
    }

    fn collect_results(
        broker: &ServiceBroker,
        name: &str,
    ) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        broker
            .register_callback::<(), String, _>(name, move |value| {
                sink.lock().push(value.clone());
            })
            .unwrap()
            .into_iter()
            .for_each(Subscription::detach);
        seen
    }

    fn wait_for<F: Fn() -> bool>(ready: F) {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    #[test]
    fn processes_tasks_from_an_input_service() {
        let broker = Arc::new(ServiceBroker::new());
        let source: Service<(), String> = Service::new("source.result");

        let worker: SingleThreadWorker<Upcase, String> =
            SingleThreadWorker::with_services("upcase", Arc::clone(&broker), Upcase, &[&source])
                .unwrap();
        let seen = collect_results(&broker, "upcase.result");

        for word in ["alpha", "beta", "gamma"] {
            source.emit(&word.to_string()).unwrap();
        }

        wait_for(|| seen.lock().len() == 3);
        assert_eq!(*seen.lock(), vec!["ALPHA", "BETA", "GAMMA"]);
        assert_eq!(worker.performance_statistics().count(), 3);
    }

    #[test]
    fn subscribes_to_named_providers_through_the_broker() {
        let broker = Arc::new(ServiceBroker::new());
        let provider: Service<(), String> = Service::new("provider.result");
        broker.add(&provider).unwrap();

        let _worker: SingleThreadWorker<Upcase, String> = SingleThreadWorker::with_inputs(
            "upcase",
            Arc::clone(&broker),
            Upcase,
            &["provider"],
        )
        .unwrap();
        let seen = collect_results(&broker, "upcase.result");

        provider.emit(&"delta".to_string()).unwrap();
        wait_for(|| seen.lock().len() == 1);
        assert_eq!(*seen.lock(), vec!["DELTA"]);
    }

    #[test]
    fn runner_failures_land_on_the_error_service() {
        let broker = Arc::new(ServiceBroker::new());
        let source: Service<(), String> = Service::new("source.result");
        let _worker: SingleThreadWorker<Upcase, String> =
            SingleThreadWorker::with_services("upcase", Arc::clone(&broker), Upcase, &[&source])
                .unwrap();

        let failures = Arc::new(Mutex::new(Vec::new()));
        {
            let failures = Arc::clone(&failures);
            broker
                .register_callback::<(), WorkerFailure, _>("error.upcase", move |failure| {
                    failures.lock().push(failure.to_string());
                })
                .unwrap()
                .into_iter()
                .for_each(Subscription::detach);
        }
        let seen = collect_results(&broker, "upcase.result");

        source.emit(&"poison".to_string()).unwrap();
        source.emit(&"ok".to_string()).unwrap();

        // The loop survives the failure and keeps processing.
        wait_for(|| seen.lock().len() == 1);
        assert_eq!(*seen.lock(), vec!["OK"]);
        assert_eq!(*failures.lock(), vec!["cannot process poison"]);
    }

    #[test]
    fn drop_joins_the_thread_and_frees_the_namespace() {
        let broker = Arc::new(ServiceBroker::new());
        {
            let _worker: SingleThreadWorker<Upcase, String> =
                SingleThreadWorker::new("upcase", Arc::clone(&broker), Upcase).unwrap();
            assert_eq!(broker.list("").len(), 5);
        }
        assert!(broker.list("").is_empty());
    }

    #[test]
    fn workers_chain_through_result_services() {
        struct Reverse;
        impl Runner<String> for Reverse {
            type Arg = String;
            type Res = String;
            fn run(&mut self, _configuration: &String, arg: String) -> Result<String, BoxError> {
                Ok(arg.chars().rev().collect())
            }
        }

        let broker = Arc::new(ServiceBroker::new());
        let source: Service<(), String> = Service::new("source.result");
        let first: SingleThreadWorker<Upcase, String> =
            SingleThreadWorker::with_services("first", Arc::clone(&broker), Upcase, &[&source])
                .unwrap();
        let _second: SingleThreadWorker<Reverse, String> = SingleThreadWorker::with_services(
            "second",
            Arc::clone(&broker),
            Reverse,
            &[first.result_service()],
        )
        .unwrap();
        let seen = collect_results(&broker, "second.result");

        source.emit(&"abc".to_string()).unwrap();
        wait_for(|| seen.lock().len() == 1);
        assert_eq!(*seen.lock(), vec!["CBA"]);
    }
}
