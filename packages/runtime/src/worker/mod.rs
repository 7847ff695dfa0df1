//! Worker skeletons over the service broker.
//!
//! [`WorkerCore`] carries the lifecycle every worker shares — standard
//! services, subscriptions, deferred configuration. [`SingleThreadWorker`]
//! adds one processing thread over an input queue;
//! [`MultiThreadWorker`] adds a pre/post-processing thread over an executor
//! pool of reusable contexts.

mod base;
mod multi;
mod single;

pub use base::{WorkerCore, WorkerFailure};
pub use multi::{MultiThreadWorker, Stage};
pub use single::{Runner, SingleThreadWorker};
