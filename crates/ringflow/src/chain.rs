use crate::invariants::debug_assert_no_in_flight;
use crate::worker::{contained, serialize, Core, WorkerInfo};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Chain transform: consumes an item from the source pipeline, returns the
/// item to append to the destination. `arg` is the source pipeline's start
/// argument.
pub type ChainFn<T, U, A> = dyn Fn(&A, &WorkerInfo, T) -> U + Send + Sync;

/// Spawn hook for a registered chain worker.
///
/// The destination payload type is erased here: the pipeline's worker list
/// only knows the source type, while the boxed job remembers the destination
/// core and the typed transform.
pub(crate) trait ChainSpawn<T, A>: Send {
    fn spawn(
        self: Box<Self>,
        src: Arc<Core<T>>,
        arg: Arc<A>,
        info: WorkerInfo,
    ) -> JoinHandle<WorkerInfo>;
}

pub(crate) struct ChainWorker<T, U, A> {
    pub(crate) dst: Arc<Core<U>>,
    pub(crate) func: Arc<ChainFn<T, U, A>>,
}

impl<T, U, A> ChainSpawn<T, A> for ChainWorker<T, U, A>
where
    T: Send + 'static,
    U: Send + 'static,
    A: Send + Sync + 'static,
{
    fn spawn(
        self: Box<Self>,
        src: Arc<Core<T>>,
        arg: Arc<A>,
        info: WorkerInfo,
    ) -> JoinHandle<WorkerInfo> {
        thread::Builder::new()
            .name(format!("chain-{}", info.sub_id))
            .spawn(move || chain_loop(&src, &self.dst, &*self.func, &arg, info))
            .expect("failed to spawn chain worker thread")
    }
}

/// Chain body: consumer of the source, producer of the destination.
///
/// The loop runs while either an item is in flight or both sides are still
/// up: the source's consumer flag and the destination's producer flag. An
/// item popped before the destination winds down is still appended; the
/// destination's own drain delivers it. Chained pipelines must be started
/// destination-first and stopped source-first.
fn chain_loop<T, U, A>(
    src: &Core<T>,
    dst: &Core<U>,
    func: &ChainFn<T, U, A>,
    arg: &A,
    mut info: WorkerInfo,
) -> WorkerInfo {
    let mut slot: Option<U> = None;

    while slot.is_some()
        || (src.status.consumers_running() && dst.status.producers_running())
    {
        match slot.take() {
            Some(item) => dst.ring.push(item),
            None => {
                if let Some(item) = src.ring.pop_while(|| src.status.consumers_running()) {
                    let out = {
                        let _serial = serialize(&src.consumer_gate);
                        contained(|| func(arg, &info, item))
                    };
                    info.rounds += 1;
                    if let Some(out) = out {
                        info.items += 1;
                        slot = Some(out);
                    }
                }
            }
        }
    }

    debug_assert_no_in_flight!(slot);
    info
}
