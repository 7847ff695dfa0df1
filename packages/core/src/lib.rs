//! Conflux Core — typed multicast services, a hierarchical service broker,
//! keyed stream joins, and blocking queues.
//!
//! These are the channel primitives under the conflux worker runtime:
//!
//! - [`Service`] — a named signal/slot channel typed by payload and result
//! - [`ServiceDirectory`] / [`ServiceBroker`] — a dotted-name registry of
//!   heterogeneous services with group subscription and group calls
//! - [`Concat`] — a keyed N-way join assembling tuples from several streams
//! - [`Combiner`] — glue holding the subscriptions of a multi-input merge
//! - [`TaskQueue`] — the blocking MPMC queue everything above drains into

pub mod broker;
pub mod combiner;
pub mod concat;
pub mod directory;
pub mod error;
pub mod queue;
pub mod service;

pub use broker::ServiceBroker;
pub use combiner::Combiner;
pub use concat::{Concat, JoinEntry, JoinSlots, Keyed, Slot};
pub use directory::{normalize, NodeType, ServiceDirectory};
pub use error::{BoxError, BrokerError};
pub use queue::{PullResult, TaskQueue};
pub use service::{Service, Subscription};
