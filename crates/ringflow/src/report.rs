use crate::worker::WorkerInfo;

/// Per-worker accounting returned by a successful stop.
///
/// Producers land in `producers`, consumers and chain workers in `consumers`
/// (chain workers consume from the pipeline being stopped), and the cleaner,
/// if one ran, in `cleaner`.
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub producers: Vec<WorkerInfo>,
    pub consumers: Vec<WorkerInfo>,
    pub cleaner: Option<WorkerInfo>,
}

impl StopReport {
    /// Total items handed to the buffer by producers.
    pub fn produced(&self) -> u64 {
        self.producers.iter().map(|w| w.items).sum()
    }

    /// Total items delivered to consumer and chain callbacks.
    pub fn consumed(&self) -> u64 {
        self.consumers.iter().map(|w| w.items).sum()
    }

    /// Items drained by the cleaner during stop.
    pub fn cleaned(&self) -> u64 {
        self.cleaner.map_or(0, |w| w.items)
    }
}
