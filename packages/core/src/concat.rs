//! Keyed N-way join of heterogeneous streams.
//!
//! A [`Concat`] assembles tuples out of values arriving on several input
//! streams, matching them up by a key extracted from each value. Slots are
//! addressed positionally with [`put_at`](Concat::put_at) or, when the
//! payload type appears at exactly one position, by type with
//! [`put`](Concat::put) — a type appearing at zero or two positions fails to
//! compile. Completion and eviction are pluggable predicates over the entry;
//! the defaults emit a tuple once every slot has been filled at least once
//! and then drop the entry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::BrokerError;
use crate::queue::{PullResult, TaskQueue};

/// Key extraction, implemented once per joined value type.
pub trait Keyed {
    /// Key shared by all streams feeding one join.
    type Key: Eq + Hash + Clone + Send + 'static;

    /// Extracts this value's join key.
    fn key(&self) -> Self::Key;
}

/// How a new occurrence folds into an already-stored slot value.
///
/// The default overwrites; implement `assign` to accumulate instead (for
/// example extending a buffer across multiple occurrences of one slot).
pub trait Slot: Sized {
    /// Folds `value` into `self`.
    fn assign(&mut self, value: Self) {
        *self = value;
    }
}

/// Tuple of joinable slot types sharing one key type.
///
/// Implemented for tuples of arity 2 through 6 whose members are
/// [`Keyed`] + [`Slot`].
pub trait JoinSlots: Clone + Default + Send + 'static {
    /// Key type shared across every slot.
    type Key: Eq + Hash + Clone + Send + 'static;
    /// Per-slot occurrence counters (`[u16; N]`).
    type Counts: AsRef<[u16]> + AsMut<[u16]> + Default + Clone + Send + 'static;
    /// Number of slots in the tuple.
    const ARITY: usize;
}

/// Positional access to slot `I` of a join tuple.
pub trait SlotAt<const I: usize>: JoinSlots {
    /// Payload type stored at position `I`.
    type Value: Keyed<Key = Self::Key> + Slot;

    /// Folds `value` into position `I`.
    fn store(&mut self, value: Self::Value);
}

/// Access to the unique slot holding payload type `V`.
///
/// `P` is an inference-only position marker: when `V` occurs at exactly one
/// position the marker resolves uniquely, while duplicate occurrences make
/// the obligation ambiguous and absent types leave it unsatisfiable — both
/// are compile-time errors, matching the intent of a by-type `put`.
pub trait SlotOf<V, P>: JoinSlots
where
    V: Keyed<Key = Self::Key>,
{
    /// The position `V` occupies.
    const INDEX: usize;

    /// Folds `value` into that position.
    fn store_unique(&mut self, value: V);
}

/// Position markers backing [`SlotOf`] inference.
pub struct At0;
pub struct At1;
pub struct At2;
pub struct At3;
pub struct At4;
pub struct At5;

macro_rules! impl_join_arity {
    ($arity:literal; $( ($T:ident, $idx:tt, $At:ident) ),+ $(,)?) => {
        impl<K, $($T),+> JoinSlots for ($($T,)+)
        where
            K: Eq + Hash + Clone + Send + 'static,
            $($T: Keyed<Key = K> + Slot + Clone + Default + Send + 'static,)+
        {
            type Key = K;
            type Counts = [u16; $arity];
            const ARITY: usize = $arity;
        }

        impl_join_arity!(@each ($( ($T, $idx, $At) ),+); $( ($T, $idx, $At) ),+);
    };
    (@each $all:tt; $( ($V:ident, $idx:tt, $At:ident) ),+) => {
        $( impl_join_arity!(@one $all; $V, $idx, $At); )+
    };
    (@one ($( ($T:ident, $_idx:tt, $_At:ident) ),+); $V:ident, $idx:tt, $At:ident) => {
        impl<K, $($T),+> SlotAt<$idx> for ($($T,)+)
        where
            K: Eq + Hash + Clone + Send + 'static,
            $($T: Keyed<Key = K> + Slot + Clone + Default + Send + 'static,)+
        {
            type Value = $V;

            fn store(&mut self, value: $V) {
                self.$idx.assign(value);
            }
        }

        impl<K, $($T),+> SlotOf<$V, $At> for ($($T,)+)
        where
            K: Eq + Hash + Clone + Send + 'static,
            $($T: Keyed<Key = K> + Slot + Clone + Default + Send + 'static,)+
        {
            const INDEX: usize = $idx;

            fn store_unique(&mut self, value: $V) {
                self.$idx.assign(value);
            }
        }
    };
}

impl_join_arity!(2; (T0, 0, At0), (T1, 1, At1));
impl_join_arity!(3; (T0, 0, At0), (T1, 1, At1), (T2, 2, At2));
impl_join_arity!(4; (T0, 0, At0), (T1, 1, At1), (T2, 2, At2), (T3, 3, At3));
impl_join_arity!(5; (T0, 0, At0), (T1, 1, At1), (T2, 2, At2), (T3, 3, At3), (T4, 4, At4));
impl_join_arity!(6; (T0, 0, At0), (T1, 1, At1), (T2, 2, At2), (T3, 3, At3), (T4, 4, At4), (T5, 5, At5));

// ---------------------------------------------------------------------------
// Join entries
// ---------------------------------------------------------------------------

/// One in-flight join entry, visible to completion and eviction predicates.
pub struct JoinEntry<T: JoinSlots> {
    created_at: Instant,
    counts: T::Counts,
    values: T,
    was_complete: bool,
}

impl<T: JoinSlots> JoinEntry<T> {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            counts: T::Counts::default(),
            values: T::default(),
            was_complete: false,
        }
    }

    /// When the first value for this key arrived.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the first value for this key arrived.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// How many values each slot has absorbed so far.
    #[must_use]
    pub fn counts(&self) -> &[u16] {
        self.counts.as_ref()
    }

    /// The partially assembled tuple.
    #[must_use]
    pub fn values(&self) -> &T {
        &self.values
    }
}

type JoinPolicy<T> = Arc<dyn Fn(&JoinEntry<T>) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Concat
// ---------------------------------------------------------------------------

/// Multi-stream indexed join, safe for concurrent producers.
///
/// Each `put` runs under a single store mutex: it finds or creates the entry
/// for the value's key, folds the value into its slot, bumps the slot count,
/// emits a copy of the tuple to the output queue when the completion
/// predicate transitions to true, and drops the entry when the eviction
/// predicate fires. Consumers drain the output queue with
/// [`get`](Concat::get) / [`try_get`](Concat::try_get).
pub struct Concat<T: JoinSlots> {
    entries: Mutex<HashMap<T::Key, JoinEntry<T>>>,
    output: TaskQueue<T>,
    complete: JoinPolicy<T>,
    erase: JoinPolicy<T>,
}

impl<T: JoinSlots> Default for Concat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: JoinSlots> Concat<T> {
    /// Creates a join with the default policies: a tuple is emitted once
    /// every slot holds at least one value, and the entry is erased as it
    /// is emitted.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policies(all_slots_filled, all_slots_filled)
    }

    /// Creates a join with explicit completion and eviction predicates.
    ///
    /// An entry is emitted whenever `complete` transitions from false to
    /// true, at most once per transition, and dropped from the store when
    /// `erase` returns true.
    pub fn with_policies<Fc, Fe>(complete: Fc, erase: Fe) -> Self
    where
        Fc: Fn(&JoinEntry<T>) -> bool + Send + Sync + 'static,
        Fe: Fn(&JoinEntry<T>) -> bool + Send + Sync + 'static,
    {
        Self {
            entries: Mutex::new(HashMap::new()),
            output: TaskQueue::unbounded(),
            complete: Arc::new(complete),
            erase: Arc::new(erase),
        }
    }

    /// Feeds a value into slot `I`.
    pub fn put_at<const I: usize>(&self, value: <T as SlotAt<I>>::Value)
    where
        T: SlotAt<I>,
    {
        let key = value.key();
        self.absorb(key, I, move |values: &mut T| values.store(value));
    }

    /// Feeds a value into the unique slot of its type.
    ///
    /// Only compiles when the payload type occurs at exactly one position
    /// in the tuple; use [`put_at`](Concat::put_at) for duplicated types.
    pub fn put<V, P>(&self, value: V)
    where
        T: SlotOf<V, P>,
        V: Keyed<Key = T::Key>,
    {
        let key = value.key();
        self.absorb(key, <T as SlotOf<V, P>>::INDEX, move |values: &mut T| {
            values.store_unique(value);
        });
    }

    fn absorb(&self, key: T::Key, index: usize, store: impl FnOnce(&mut T)) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(JoinEntry::new);

        store(&mut entry.values);
        let counts = entry.counts.as_mut();
        counts[index] = counts[index].saturating_add(1);

        let now_complete = (self.complete)(entry);
        if now_complete && !entry.was_complete {
            // Dropped only if a consumer closed the output during shutdown.
            let _ = self.output.push_back(entry.values.clone());
        }
        entry.was_complete = now_complete;

        if (self.erase)(entry) {
            entries.remove(&key);
        }
    }

    /// Pulls one completed tuple without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        match self.output.try_pull_front() {
            PullResult::Item(values) => Some(values),
            PullResult::Empty | PullResult::Closed => None,
        }
    }

    /// Pulls one completed tuple, blocking until one is available.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Shutdown`] after [`close`](Concat::close) once the
    /// output drains.
    pub fn get(&self) -> Result<T, BrokerError> {
        self.output.pull_front()
    }

    /// Number of in-flight (not yet erased) entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Closes the output queue, waking blocked consumers.
    pub fn close(&self) {
        self.output.close();
    }
}

fn all_slots_filled<T: JoinSlots>(entry: &JoinEntry<T>) -> bool {
    entry.counts().iter().all(|&count| count >= 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    struct A {
        id: i32,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    struct B {
        id: i32,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    struct C {
        id: i32,
    }

    impl Keyed for A {
        type Key = i32;
        fn key(&self) -> i32 {
            self.id
        }
    }
    impl Keyed for B {
        type Key = i32;
        fn key(&self) -> i32 {
            self.id
        }
    }
    impl Keyed for C {
        type Key = i32;
        fn key(&self) -> i32 {
            self.id
        }
    }

    impl Slot for A {}
    impl Slot for B {}
    impl Slot for C {}

    #[test]
    fn emits_only_once_every_slot_is_filled() {
        let concat: Concat<(A, A, B, C)> = Concat::new();

        concat.put_at::<0>(A { id: 1 });
        assert!(concat.try_get().is_none());
        concat.put_at::<1>(A { id: 1 });
        assert!(concat.try_get().is_none());
        concat.put(B { id: 1 });
        assert!(concat.try_get().is_none());
        concat.put(C { id: 1 });

        let (a0, a1, b, c) = concat.try_get().unwrap();
        assert_eq!((a0.id, a1.id, b.id, c.id), (1, 1, 1, 1));
        assert_eq!(concat.size(), 0);
    }

    #[test]
    fn keys_are_joined_independently() {
        let concat: Concat<(A, B)> = Concat::new();
        concat.put(A { id: 1 });
        concat.put(A { id: 2 });
        assert_eq!(concat.size(), 2);

        concat.put(B { id: 2 });
        let (a, b) = concat.try_get().unwrap();
        assert_eq!((a.id, b.id), (2, 2));
        assert_eq!(concat.size(), 1);
    }

    #[test]
    fn blocking_get_waits_for_the_missing_slots() {
        let concat: Arc<Concat<(A, A, B, C)>> = Arc::new(Concat::new());
        concat.put_at::<0>(A { id: 1 });
        concat.put_at::<1>(A { id: 1 });

        let producer = {
            let concat = Arc::clone(&concat);
            thread::spawn(move || {
                concat.put(B { id: 1 });
                concat.put(C { id: 1 });
            })
        };

        let (a0, a1, b, c) = concat.get().unwrap();
        assert_eq!(a0.id, 1);
        assert_eq!(a1.id, 1);
        assert_eq!(b.id, 1);
        assert_eq!(c.id, 1);
        producer.join().unwrap();
    }

    #[test]
    fn four_producers_ten_thousand_keys() {
        let concat: Arc<Concat<(A, A, B, C)>> = Arc::new(Concat::new());
        const KEYS: i32 = 10_000;

        let mut producers = Vec::new();
        for slot in 0..2 {
            let concat = Arc::clone(&concat);
            producers.push(thread::spawn(move || {
                for id in 0..KEYS {
                    if slot == 0 {
                        concat.put_at::<0>(A { id });
                    } else {
                        concat.put_at::<1>(A { id });
                    }
                }
            }));
        }
        {
            let concat = Arc::clone(&concat);
            producers.push(thread::spawn(move || {
                for id in 0..KEYS {
                    concat.put(B { id });
                }
            }));
        }
        {
            let concat = Arc::clone(&concat);
            producers.push(thread::spawn(move || {
                for id in 0..KEYS {
                    concat.put(C { id });
                }
            }));
        }

        for _ in 0..KEYS {
            let (a0, a1, b, c) = concat.get().unwrap();
            assert_eq!(a0.id, a1.id);
            assert_eq!(a0.id, b.id);
            assert_eq!(a0.id, c.id);
        }

        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(concat.size(), 0);
    }

    #[test]
    fn custom_completion_can_demand_repeated_slots() {
        // Two occurrences of the first slot before the pair is ready.
        let concat: Concat<(A, B)> = Concat::with_policies(
            |entry| entry.counts()[0] >= 2 && entry.counts()[1] >= 1,
            |entry| entry.counts()[0] >= 2 && entry.counts()[1] >= 1,
        );

        concat.put(A { id: 9 });
        concat.put(B { id: 9 });
        assert!(concat.try_get().is_none());

        concat.put(A { id: 9 });
        assert!(concat.try_get().is_some());
        assert_eq!(concat.size(), 0);
    }

    #[test]
    fn sticky_entries_emit_once_per_completion_transition() {
        // Entries are never erased; completion must still emit only once.
        let concat: Concat<(A, B)> = Concat::with_policies(
            |entry| entry.counts().iter().all(|&count| count >= 1),
            |_| false,
        );

        concat.put(A { id: 3 });
        concat.put(B { id: 3 });
        assert!(concat.try_get().is_some());

        concat.put(A { id: 3 });
        assert!(concat.try_get().is_none());
        assert_eq!(concat.size(), 1);
    }

    #[test]
    fn slot_assignment_can_accumulate() {
        #[derive(Debug, Clone, Copy, Default)]
        struct Tally {
            id: i32,
            total: i32,
        }
        impl Keyed for Tally {
            type Key = i32;
            fn key(&self) -> i32 {
                self.id
            }
        }
        impl Slot for Tally {
            fn assign(&mut self, value: Self) {
                self.id = value.id;
                self.total += value.total;
            }
        }

        let concat: Concat<(Tally, B)> = Concat::with_policies(
            |entry| entry.counts()[0] >= 2 && entry.counts()[1] >= 1,
            |entry| entry.counts()[0] >= 2 && entry.counts()[1] >= 1,
        );

        concat.put(Tally { id: 1, total: 10 });
        concat.put(Tally { id: 1, total: 5 });
        concat.put(B { id: 1 });

        let (tally, _) = concat.try_get().unwrap();
        assert_eq!(tally.total, 15);
    }

    #[test]
    fn close_unblocks_a_waiting_consumer() {
        let concat: Arc<Concat<(A, B)>> = Arc::new(Concat::new());
        let consumer = {
            let concat = Arc::clone(&concat);
            thread::spawn(move || concat.get())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        concat.close();
        assert!(matches!(
            consumer.join().unwrap(),
            Err(BrokerError::Shutdown)
        ));
    }

    #[test]
    fn entry_age_starts_at_first_value() {
        let concat: Concat<(A, B)> = Concat::with_policies(
            |entry| {
                assert!(entry.age() >= Duration::ZERO);
                assert!(entry.created_at() <= Instant::now());
                entry.counts().iter().all(|&count| count >= 1)
            },
            all_slots_filled,
        );
        concat.put(A { id: 1 });
        concat.put(B { id: 1 });
        assert!(concat.try_get().is_some());
    }
}
