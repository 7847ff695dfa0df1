//! Type-erased registry of services, addressed by dotted name or group.
//!
//! The broker pairs a [`ServiceDirectory`] with a map of erased
//! [`Service`] handles. Single services are fetched back with their exact
//! signature; groups support bulk subscription and bulk invocation in
//! directory order. Directory mutations take an exclusive lock; lookups and
//! calls share it, and user callbacks always run outside broker locks.

use std::any::{type_name, Any};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::directory::{NodeType, ServiceDirectory};
use crate::error::BrokerError;
use crate::service::{Service, Subscription};

struct Registered {
    /// The erased `Service<R, A>` value.
    service: Box<dyn Any + Send + Sync>,
    /// Human-readable signature for type mismatch diagnostics.
    signature: &'static str,
}

/// Registry of heterogeneous typed services with group operations.
#[derive(Default)]
pub struct ServiceBroker {
    directory: RwLock<ServiceDirectory>,
    services: DashMap<String, Registered>,
}

impl ServiceBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide broker.
    ///
    /// Opt-in convenience only: every API in this crate takes a broker
    /// handle explicitly, and sharing one implicit namespace across
    /// unrelated components invites name collisions.
    pub fn global() -> Arc<ServiceBroker> {
        static GLOBAL: OnceLock<Arc<ServiceBroker>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ServiceBroker::new())))
    }

    /// Registers a service under its own name.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NameInvalid`] or [`BrokerError::NameConflict`] from
    /// the directory; on error nothing is registered.
    pub fn add<R, A>(&self, service: &Service<R, A>) -> Result<(), BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
    {
        let mut directory = self.directory.write();
        directory.add(service.name())?;
        self.services.insert(
            crate::directory::normalize(service.name()),
            Registered {
                service: Box::new(service.clone()),
                signature: type_name::<Service<R, A>>(),
            },
        );
        Ok(())
    }

    /// Drops every service under `name` and tombstones the subtree.
    /// Returns how many services were removed; unknown names remove zero.
    pub fn remove(&self, name: &str) -> usize {
        let mut directory = self.directory.write();
        let removed = directory.list(name);
        for leaf in &removed {
            self.services.remove(leaf);
        }
        directory.remove(name);
        removed.len()
    }

    /// Fetches a single service with its exact signature.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotFound`] when no service is registered under `name`;
    /// [`BrokerError::TypeMismatch`] when the signature differs.
    pub fn get<R, A>(&self, name: &str) -> Result<Service<R, A>, BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
    {
        let name = crate::directory::normalize(name);
        let entry = self.services.get(&name).ok_or(BrokerError::NotFound {
            name: name.clone(),
        })?;
        downcast(&entry, &name)
    }

    /// Subscribes `callback` to every service under `name`.
    ///
    /// The whole group is type-checked before the first subscription, so a
    /// single mismatching member fails the call without side effects.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotFound`] when no services exist under `name`;
    /// [`BrokerError::TypeMismatch`] on the first mismatching member.
    pub fn register_callback<R, A, F>(
        &self,
        name: &str,
        callback: F,
    ) -> Result<Vec<Subscription>, BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let services = self.resolve::<R, A>(name)?;
        let callback = Arc::new(callback);
        Ok(services
            .into_iter()
            .map(|service| {
                let callback = Arc::clone(&callback);
                service.connect(move |arg: &A| callback(arg))
            })
            .collect())
    }

    /// Like [`register_callback`](Self::register_callback), but skips group
    /// members whose signature differs instead of failing.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotFound`] when no member matched the signature.
    pub fn register_callback_masked<R, A, F>(
        &self,
        name: &str,
        callback: F,
    ) -> Result<Vec<Subscription>, BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let leaves = self.leaves(name)?;
        let mut services = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let Some(entry) = self.services.get(&leaf) else {
                continue;
            };
            match downcast::<R, A>(&entry, &leaf) {
                Ok(service) => services.push(service),
                Err(_) => {
                    tracing::debug!(service = %leaf, "skipping group member with different signature");
                }
            }
        }
        if services.is_empty() {
            return Err(BrokerError::NotFound {
                name: crate::directory::normalize(name),
            });
        }

        let callback = Arc::new(callback);
        Ok(services
            .into_iter()
            .map(|service| {
                let callback = Arc::clone(&callback);
                service.connect(move |arg: &A| callback(arg))
            })
            .collect())
    }

    /// Emits `arg` on every service under `name`, collecting the results in
    /// directory order. The group is resolved and type-checked up front;
    /// subscribers then run outside all broker locks.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotFound`], [`BrokerError::TypeMismatch`], or the
    /// first [`BrokerError::Subscriber`] failure.
    pub fn call<R, A>(&self, name: &str, arg: &A) -> Result<Vec<R>, BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
    {
        let services = self.resolve::<R, A>(name)?;
        services.iter().map(|service| service.emit(arg)).collect()
    }

    /// Emits on every service under `name` and folds the collected results
    /// with `combiner`.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub fn call_combine<R, A, F>(
        &self,
        name: &str,
        combiner: F,
        arg: &A,
    ) -> Result<R, BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
        F: FnOnce(Vec<R>) -> R,
    {
        Ok(combiner(self.call(name, arg)?))
    }

    /// Lists the fully-qualified names of all services under `name`
    /// (`""` for the whole directory).
    #[must_use]
    pub fn list(&self, name: &str) -> Vec<String> {
        self.directory.read().list(name)
    }

    /// Reports whether `name` is currently a group or a service.
    #[must_use]
    pub fn node_type(&self, name: &str) -> Option<NodeType> {
        self.directory.read().node_type(name)
    }

    /// Physically drops tombstoned directory entries.
    pub fn prune(&self) {
        self.directory.write().prune();
    }

    /// Removes every service and directory entry.
    pub fn clear(&self) {
        let mut directory = self.directory.write();
        directory.clear();
        self.services.clear();
    }

    /// Leaf names under `name`, or `NotFound` when there are none.
    fn leaves(&self, name: &str) -> Result<Vec<String>, BrokerError> {
        let leaves = self.directory.read().list(name);
        if leaves.is_empty() {
            return Err(BrokerError::NotFound {
                name: crate::directory::normalize(name),
            });
        }
        Ok(leaves)
    }

    /// Resolves and downcasts every leaf under `name`, failing fast on the
    /// first signature mismatch.
    fn resolve<R, A>(&self, name: &str) -> Result<Vec<Service<R, A>>, BrokerError>
    where
        R: Default + Send + 'static,
        A: Send + Sync + 'static,
    {
        let leaves = {
            let directory = self.directory.read();
            let leaves = directory.list(name);
            if leaves.is_empty() {
                return Err(BrokerError::NotFound {
                    name: crate::directory::normalize(name),
                });
            }
            leaves
        };

        let mut services = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let entry = self.services.get(&leaf).ok_or(BrokerError::NotFound {
                name: leaf.clone(),
            })?;
            services.push(downcast::<R, A>(&entry, &leaf)?);
        }
        Ok(services)
    }
}

fn downcast<R, A>(entry: &Registered, name: &str) -> Result<Service<R, A>, BrokerError>
where
    R: Default + Send + 'static,
    A: Send + Sync + 'static,
{
    entry
        .service
        .downcast_ref::<Service<R, A>>()
        .cloned()
        .ok_or(BrokerError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<Service<R, A>>(),
            found: entry.signature,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
