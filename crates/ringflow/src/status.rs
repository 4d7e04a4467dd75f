use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, Ordering};

/// Coordinator run-state bitset.
///
/// Written by the thread driving `start`/`stop`, polled by every worker
/// between items. The word is cache-padded because all workers read it on
/// their hot path.
pub(crate) struct Status {
    bits: CachePadded<AtomicU32>,
}

impl Status {
    pub(crate) const PRODUCERS: u32 = 0x0001;
    pub(crate) const CONSUMERS: u32 = 0x0002;
    pub(crate) const CLEANING: u32 = 0x8000;
    pub(crate) const ALL: u32 = Self::PRODUCERS | Self::CONSUMERS | Self::CLEANING;

    pub(crate) fn new() -> Self {
        Self {
            bits: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn set(&self, mask: u32) {
        self.bits.fetch_or(mask, Ordering::AcqRel);
    }

    pub(crate) fn clear(&self, mask: u32) {
        self.bits.fetch_and(!mask, Ordering::AcqRel);
    }

    pub(crate) fn producers_running(&self) -> bool {
        self.bits.load(Ordering::Acquire) & Self::PRODUCERS != 0
    }

    pub(crate) fn consumers_running(&self) -> bool {
        self.bits.load(Ordering::Acquire) & Self::CONSUMERS != 0
    }

    pub(crate) fn cleaning(&self) -> bool {
        self.bits.load(Ordering::Acquire) & Self::CLEANING != 0
    }

    pub(crate) fn any_running(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }
}
