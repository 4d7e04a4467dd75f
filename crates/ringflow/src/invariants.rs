//! Debug assertion macros for pipeline invariants.
//!
//! Each macro states one invariant of the buffer or the worker lifecycle.
//! They compile to `debug_assert!`, so release builds carry no overhead.

/// Assert that a slot inside the readable window actually holds an item.
///
/// **Invariant**: `slots[i]` is occupied for every index in `[head, tail)`.
///
/// Used in: `RingBuffer::pop_while` after taking from `head`
macro_rules! debug_assert_slot_occupied {
    ($item:expr, $slot:expr) => {
        debug_assert!(
            $item.is_some(),
            "ring slot {} inside the readable window was empty",
            $slot
        )
    };
}

/// Assert that a role loop exits with its in-flight slot clear.
///
/// **Invariant**: a worker never abandons an item it has popped or produced;
/// the item is handed to the buffer or a callback before the loop ends.
///
/// Used in: the producer, consumer, chain and cleaner loops
macro_rules! debug_assert_no_in_flight {
    ($slot:expr) => {
        debug_assert!(
            $slot.is_none(),
            "worker loop exited with an undelivered item in flight"
        )
    };
}

/// Assert the post-stop state: nothing buffered, nothing running.
///
/// **Invariant**: after `stop` returns, the ring is empty and every status
/// bit is clear.
///
/// Used in: `Pipeline::stop_with` before returning
macro_rules! debug_assert_stopped_clean {
    ($ring:expr, $status:expr) => {
        debug_assert!(
            $ring.is_empty() && !$status.any_running(),
            "stop returned with items buffered or status bits still set"
        )
    };
}

pub(crate) use debug_assert_no_in_flight;
pub(crate) use debug_assert_slot_occupied;
pub(crate) use debug_assert_stopped_clean;
