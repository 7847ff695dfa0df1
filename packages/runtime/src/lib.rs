//! Conflux Runtime — configurable concurrent workers over the conflux
//! service broker.
//!
//! Workers pull typed tasks from input queues fed by broker services, run
//! user code on dedicated OS threads (directly, or through an executor pool
//! of reusable contexts), and publish results back onto named services.
//! Every worker carries uniform logging, error reporting, and a deferred
//! configuration protocol that guarantees one task sees one configuration.
//!
//! The channel primitives live in `conflux-core` and are re-exported here,
//! so applications normally depend on this crate alone.

pub mod config;
pub mod context;
pub mod log;
pub mod pool;
pub mod stats;
pub mod worker;

pub use conflux_core::broker::ServiceBroker;
pub use conflux_core::combiner::Combiner;
pub use conflux_core::concat::{Concat, Keyed, Slot};
pub use conflux_core::error::{BoxError, BrokerError};
pub use conflux_core::queue::{PullResult, TaskQueue};
pub use conflux_core::service::{Service, Subscription};

pub use config::{ConfigSlot, Configuration};
pub use context::{Context, ContextCell};
pub use log::{LogRecord, Severity};
pub use pool::{ContextPool, ExecutorPool, Scheduler};
pub use stats::{PerformanceStatistics, StatisticsSummary};
pub use worker::{MultiThreadWorker, Runner, SingleThreadWorker, Stage, WorkerCore, WorkerFailure};
