//! Shared worker plumbing: standard services, subscriptions, and the
//! deferred-configuration protocol.
//!
//! Every worker registers four services with its broker —
//! `log.<name>`, `error.<name>`, `configuration.set.<name>`, and
//! `configuration.get.<name>` — and owns every subscription it creates.
//! Dropping the core disconnects the subscriptions and deregisters the
//! services, leaving the broker's namespace free for reuse.

use std::sync::Arc;

use conflux_core::broker::ServiceBroker;
use conflux_core::error::{BoxError, BrokerError};
use conflux_core::service::{Service, Subscription};

use crate::config::{ConfigSlot, Configuration};
use crate::log::{forward_to_tracing, LogRecord, Severity};

/// Failure payload carried on `error.<name>` services.
///
/// `Arc`ed so one failure can fan out to any number of subscribers.
pub type WorkerFailure = Arc<dyn std::error::Error + Send + Sync + 'static>;

type StagingHook<C> = Arc<dyn Fn(&C) + Send + Sync>;

/// Lifecycle, logging, error reporting, and configuration staging shared by
/// every worker flavor.
pub struct WorkerCore<C = Configuration>
where
    C: Clone + Default + Send + Sync + 'static,
{
    name: String,
    broker: Arc<ServiceBroker>,
    log: Service<(), LogRecord>,
    error: Service<(), WorkerFailure>,
    configuration: Arc<ConfigSlot<C>>,
    staging_hook: Option<StagingHook<C>>,
    subscriptions: Vec<Subscription>,
    owned_services: Vec<String>,
}

impl<C> WorkerCore<C>
where
    C: Clone + Default + Send + Sync + 'static,
{
    /// Registers the four standard services and wires the configuration
    /// set/get callbacks.
    ///
    /// # Errors
    ///
    /// Directory errors from the broker — typically a [`BrokerError::NameConflict`]
    /// when a worker of the same name already exists. Nothing stays
    /// registered on failure.
    pub fn new(name: impl Into<String>, broker: Arc<ServiceBroker>) -> Result<Self, BrokerError> {
        Self::with_staging_hook(name, broker, None)
    }

    /// Like [`new`](WorkerCore::new), with a hook invoked before every
    /// configuration staging — the multi-threaded worker uses it to push
    /// configuration to its pooled contexts.
    pub(crate) fn with_staging_hook(
        name: impl Into<String>,
        broker: Arc<ServiceBroker>,
        staging_hook: Option<StagingHook<C>>,
    ) -> Result<Self, BrokerError> {
        let name = name.into();
        let log: Service<(), LogRecord> = Service::new(format!("log.{name}"));
        let error: Service<(), WorkerFailure> = Service::new(format!("error.{name}"));
        let on_set: Service<(), C> = Service::new(format!("configuration.set.{name}"));
        let on_get: Service<C, ()> = Service::new(format!("configuration.get.{name}"));

        let mut owned_services = Vec::with_capacity(4);
        add_or_unwind(&broker, &log, &mut owned_services)?;
        add_or_unwind(&broker, &error, &mut owned_services)?;
        add_or_unwind(&broker, &on_set, &mut owned_services)?;
        add_or_unwind(&broker, &on_get, &mut owned_services)?;

        let configuration = Arc::new(ConfigSlot::new());
        let mut subscriptions = Vec::new();
        {
            let slot = Arc::clone(&configuration);
            let hook = staging_hook.clone();
            subscriptions.push(on_set.connect(move |value: &C| {
                if let Some(hook) = &hook {
                    hook(value);
                }
                slot.set(value.clone());
            }));
        }
        {
            let slot = Arc::clone(&configuration);
            subscriptions.push(on_get.connect(move |_: &()| slot.get()));
        }

        Ok(Self {
            name,
            broker,
            log,
            error,
            configuration,
            staging_hook,
            subscriptions,
            owned_services,
        })
    }

    /// The worker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The broker this worker registered with.
    #[must_use]
    pub fn broker(&self) -> &Arc<ServiceBroker> {
        &self.broker
    }

    /// Emits a record on `log.<name>` and mirrors it to `tracing`.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let record = LogRecord::new(severity, message);
        forward_to_tracing(&self.name, &record);
        let _ = self.log.emit(&record);
    }

    /// Emits a failure on `error.<name>`.
    pub fn report(&self, failure: BoxError) {
        forward_failure(&self.error, failure);
    }

    /// Stages a configuration; it becomes live immediately when the worker
    /// is idle, otherwise at the next quiescent point between tasks.
    pub fn set_configuration(&self, configuration: C) {
        if let Some(hook) = &self.staging_hook {
            hook(&configuration);
        }
        self.configuration.set(configuration);
    }

    /// The most recently set configuration.
    #[must_use]
    pub fn get_configuration(&self) -> C {
        self.configuration.get()
    }

    /// Whether a staged configuration awaits commit.
    #[must_use]
    pub fn configuration_changed(&self) -> bool {
        self.configuration.is_changed()
    }

    /// Commits the staged configuration. Worker loops call this between
    /// tasks; it is safe from any thread.
    pub fn update_configuration(&self) {
        self.configuration.commit();
    }

    /// Subscribes `callback` to every service under `name` via the broker,
    /// keeping the subscriptions for the core's lifetime. Registration
    /// failures are logged at [`Severity::Severe`] and otherwise ignored,
    /// so a worker can come up before its upstream providers.
    pub fn register_callback<R, A, F>(&mut self, name: &str, callback: F)
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        match self.broker.register_callback::<R, A, F>(name, callback) {
            Ok(subscriptions) => self.subscriptions.extend(subscriptions),
            Err(error) => self.log(
                Severity::Severe,
                format!("cannot register callback on '{name}': {error}"),
            ),
        }
    }

    /// Keeps a directly created subscription alive for the core's lifetime.
    pub fn adopt(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Clone of the error service, for worker threads to report through.
    pub(crate) fn error_channel(&self) -> Service<(), WorkerFailure> {
        self.error.clone()
    }

    /// The shared configuration slot, for worker loops.
    pub(crate) fn configuration_slot(&self) -> &Arc<ConfigSlot<C>> {
        &self.configuration
    }
}

impl<C> Drop for WorkerCore<C>
where
    C: Clone + Default + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.subscriptions.clear();
        for name in &self.owned_services {
            self.broker.remove(name);
        }
    }
}

/// Adds one service, rolling back the previously added ones on failure.
fn add_or_unwind<R, A>(
    broker: &ServiceBroker,
    service: &Service<R, A>,
    added: &mut Vec<String>,
) -> Result<(), BrokerError>
where
    R: Default + Send + 'static,
    A: Send + Sync + 'static,
{
    match broker.add(service) {
        Ok(()) => {
            added.push(service.name().to_string());
            Ok(())
        }
        Err(error) => {
            for name in added.drain(..) {
                broker.remove(&name);
            }
            Err(error)
        }
    }
}

/// Emits a failure on an error service, falling back to `tracing` when the
/// error channel itself has a failing subscriber.
pub(crate) fn forward_failure(errors: &Service<(), WorkerFailure>, failure: BoxError) {
    let failure: WorkerFailure = Arc::from(failure);
    if let Err(error) = errors.emit(&failure) {
        tracing::warn!(service = %errors.name(), %error, "error channel subscriber failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
