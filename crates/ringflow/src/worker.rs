use crate::invariants::debug_assert_no_in_flight;
use crate::ring::RingBuffer;
use crate::status::Status;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::error;

/// The kind of loop a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Calls the produce callback and appends the result to the buffer.
    Producer,
    /// Pops from the buffer and hands each item to the consume callback.
    Consumer,
    /// Pops from one pipeline, transforms, and appends to another.
    Chain,
}

/// Per-worker descriptor handed to every callback invocation.
///
/// `id` is the worker's position in the pipeline (from 1, in registration
/// order); `sub_id` numbers the worker within its role (from 1). The cleaner
/// spawned during a stop uses the sentinel id 0. Counters reflect completed
/// rounds as of the call: `rounds` counts callback invocations, `items`
/// counts items that actually moved, so `items <= rounds` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub role: Role,
    pub id: u32,
    pub sub_id: u32,
    pub rounds: u64,
    pub items: u64,
}

impl WorkerInfo {
    pub(crate) fn new(role: Role, id: u32, sub_id: u32) -> Self {
        Self {
            role,
            id,
            sub_id,
            rounds: 0,
            items: 0,
        }
    }
}

/// Outcome of one produce callback invocation.
pub enum Produced<T> {
    /// One item was produced; it will be appended to the buffer.
    Item(T),
    /// Nothing this round; the worker will ask again.
    Empty,
    /// Terminal failure: retire the pipeline's producing side. Every
    /// producer winds down after flushing its in-flight item; consumers and
    /// the stop drain are unaffected.
    Halt,
}

pub type ProduceFn<T, A> = dyn Fn(&A, &WorkerInfo) -> Produced<T> + Send + Sync;
pub type ConsumeFn<T, A> = dyn Fn(&A, &WorkerInfo, T) + Send + Sync;

/// Shared state of one pipeline: the buffer, the run-state word, and the
/// per-role callback gates.
///
/// Workers of the same role take the role's gate around every callback
/// invocation, so a non-reentrant user callback is never entered twice
/// concurrently. Chain workers take the source's consumer gate (they consume
/// from the source).
pub(crate) struct Core<T> {
    pub(crate) ring: RingBuffer<T>,
    pub(crate) status: Status,
    pub(crate) producer_gate: Mutex<()>,
    pub(crate) consumer_gate: Mutex<()>,
}

impl<T> Core<T> {
    pub(crate) fn new(max_items: usize) -> Self {
        Self {
            ring: RingBuffer::new(max_items),
            status: Status::new(),
            producer_gate: Mutex::new(()),
            consumer_gate: Mutex::new(()),
        }
    }
}

/// Takes a callback gate, surviving poisoning.
///
/// A callback that panicked under the gate must not take the whole role down
/// with it; the guard protects user state, and the panic was already
/// contained at the callback boundary.
pub(crate) fn serialize(gate: &Mutex<()>) -> MutexGuard<'_, ()> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Invokes a fallible piece of user code, containing a panic.
///
/// Panics never cross a worker thread boundary: a panicking callback costs
/// the round (and whatever item it held) and the loop moves on.
pub(crate) fn contained<R>(f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!("user callback panicked; counting a failed round");
            None
        }
    }
}

/// Producer body: two-phase so a produced item survives shutdown.
///
/// An item returned by the callback is held in the local in-flight slot and
/// appended on the next pass; the loop only exits once the slot is clear, so
/// clearing the run flag never discards a produced item.
pub(crate) fn produce_loop<T, A>(
    core: &Core<T>,
    produce: &ProduceFn<T, A>,
    arg: &A,
    mut info: WorkerInfo,
) -> WorkerInfo {
    let mut slot: Option<T> = None;

    while slot.is_some() || core.status.producers_running() {
        match slot.take() {
            Some(item) => core.ring.push(item),
            None => {
                let outcome = {
                    let _serial = serialize(&core.producer_gate);
                    contained(|| produce(arg, &info))
                };
                info.rounds += 1;
                match outcome {
                    Some(Produced::Item(item)) => {
                        info.items += 1;
                        slot = Some(item);
                    }
                    Some(Produced::Empty) | None => {}
                    Some(Produced::Halt) => core.status.clear(Status::PRODUCERS),
                }
            }
        }
    }

    debug_assert_no_in_flight!(slot);
    info
}

/// Consumer body: pop, deliver, repeat until the consumer flag drops.
///
/// `pop_while` parks on the buffer and hands back `None` once the flag is
/// cleared and the stop broadcast lands, which is how the loop gets a chance
/// to observe shutdown.
pub(crate) fn consume_loop<T, A>(
    core: &Core<T>,
    consume: &ConsumeFn<T, A>,
    arg: &A,
    mut info: WorkerInfo,
) -> WorkerInfo {
    let mut slot: Option<T> = None;

    while slot.is_some() || core.status.consumers_running() {
        match slot.take() {
            None => slot = core.ring.pop_while(|| core.status.consumers_running()),
            Some(item) => {
                let delivered = {
                    let _serial = serialize(&core.consumer_gate);
                    contained(|| consume(arg, &info, item))
                };
                info.rounds += 1;
                if delivered.is_some() {
                    info.items += 1;
                }
            }
        }
    }

    debug_assert_no_in_flight!(slot);
    info
}
