//! Wires several input services into one consumer.
//!
//! A [`Combiner`] owns the subscriptions that feed a merging consumer —
//! typically the `put` side of a [`Concat`](crate::concat::Concat) shared
//! behind an `Arc`. It exists so a worker that merges several input streams
//! has a single value to hold and drop.

use crate::service::{Service, Subscription};

/// Holds the subscriptions of a multi-input merge.
///
/// ```
/// use std::sync::Arc;
/// use conflux_core::combiner::Combiner;
/// use conflux_core::concat::{Concat, Keyed, Slot};
/// use conflux_core::service::Service;
///
/// #[derive(Clone, Copy, Default)]
/// struct Frame { id: u32 }
/// #[derive(Clone, Copy, Default)]
/// struct Meta { id: u32 }
/// # impl Keyed for Frame { type Key = u32; fn key(&self) -> u32 { self.id } }
/// # impl Keyed for Meta { type Key = u32; fn key(&self) -> u32 { self.id } }
/// # impl Slot for Frame {}
/// # impl Slot for Meta {}
///
/// let frames: Service<(), Frame> = Service::new("camera.result");
/// let metas: Service<(), Meta> = Service::new("parser.result");
/// let join: Arc<Concat<(Frame, Meta)>> = Arc::new(Concat::new());
///
/// let mut combiner = Combiner::new();
/// let sink = Arc::clone(&join);
/// combiner.attach(&frames, move |frame: &Frame| sink.put(*frame));
/// let sink = Arc::clone(&join);
/// combiner.attach(&metas, move |meta: &Meta| sink.put(*meta));
///
/// frames.emit(&Frame { id: 7 }).unwrap();
/// metas.emit(&Meta { id: 7 }).unwrap();
/// assert!(join.try_get().is_some());
/// ```
#[derive(Debug, Default)]
pub struct Combiner {
    subscriptions: Vec<Subscription>,
}

impl Combiner {
    /// Creates a combiner with no inputs yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `consume` to one input service. Chainable; call once per
    /// input stream.
    pub fn attach<R, A, F>(&mut self, service: &Service<R, A>, consume: F) -> &mut Self
    where
        R: Default + 'static,
        A: 'static,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.subscriptions.push(service.connect(consume));
        self
    }

    /// Number of attached inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no inputs are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Hands every input subscription over to its dispatcher, keeping the
    /// callbacks connected after this combiner is gone.
    pub fn detach_all(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.detach();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::concat::{Concat, Keyed, Slot};

    use super::*;

    #[derive(Debug, Clone, Copy, Default)]
    struct Left {
        id: u32,
    }
    #[derive(Debug, Clone, Copy, Default)]
    struct Right {
        id: u32,
    }

    impl Keyed for Left {
        type Key = u32;
        fn key(&self) -> u32 {
            self.id
        }
    }
    impl Keyed for Right {
        type Key = u32;
        fn key(&self) -> u32 {
            self.id
        }
    }
    impl Slot for Left {}
    impl Slot for Right {}

    #[test]
    fn attached_inputs_feed_the_join() {
        let left: Service<(), Left> = Service::new("left.result");
        let right: Service<(), Right> = Service::new("right.result");
        let join: Arc<Concat<(Left, Right)>> = Arc::new(Concat::new());

        let mut combiner = Combiner::new();
        let sink = Arc::clone(&join);
        combiner.attach(&left, move |value: &Left| sink.put(*value));
        let sink = Arc::clone(&join);
        combiner.attach(&right, move |value: &Right| sink.put(*value));
        assert_eq!(combiner.len(), 2);

        left.emit(&Left { id: 4 }).unwrap();
        right.emit(&Right { id: 4 }).unwrap();

        let (l, r) = join.try_get().unwrap();
        assert_eq!((l.id, r.id), (4, 4));
    }

    #[test]
    fn dropping_the_combiner_disconnects_inputs() {
        let left: Service<(), Left> = Service::new("left.result");
        {
            let mut combiner = Combiner::new();
            combiner.attach(&left, |_: &Left| {});
            assert_eq!(left.subscriber_count(), 1);
        }
        assert_eq!(left.subscriber_count(), 0);
    }

    #[test]
    fn detach_all_keeps_inputs_connected() {
        let left: Service<(), Left> = Service::new("left.result");
        {
            let mut combiner = Combiner::new();
            combiner.attach(&left, |_: &Left| {});
            combiner.detach_all();
            assert!(combiner.is_empty());
        }
        assert_eq!(left.subscriber_count(), 1);
    }
}
