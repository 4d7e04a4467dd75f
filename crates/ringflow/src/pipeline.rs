use crate::chain::{ChainFn, ChainSpawn, ChainWorker};
use crate::error::PipelineError;
use crate::invariants::{debug_assert_no_in_flight, debug_assert_stopped_clean};
use crate::report::StopReport;
use crate::status::Status;
use crate::worker::{
    consume_loop, contained, produce_loop, serialize, ConsumeFn, Core, Produced, ProduceFn, Role,
    WorkerInfo,
};
use std::panic;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// A pool of producer, consumer and chain workers coordinated over one
/// bounded ring buffer.
///
/// `T` is the item type flowing through the buffer; `A` is the shared
/// argument handed to every callback (the value passed to [`start`]).
/// Workers are registered while the pipeline is idle, spawned by [`start`],
/// and drained, joined and discarded by [`stop`].
///
/// The stop drain never loses an item: producers flush their in-flight item
/// before exiting, consumers are released only once the buffer is empty, and
/// a pipeline with no consumers drains through a cleanup callback instead.
///
/// [`start`]: Pipeline::start
/// [`stop`]: Pipeline::stop
pub struct Pipeline<T, A = ()>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    core: Arc<Core<T>>,
    workers: Vec<Worker<T, A>>,
    producer_count: u32,
    consumer_count: u32,
}

struct Worker<T, A> {
    role: Role,
    /// Consumed when the worker is spawned.
    job: Option<Job<T, A>>,
    /// Present from start until the worker is joined during stop.
    thread: Option<thread::JoinHandle<WorkerInfo>>,
}

enum Job<T, A> {
    Produce(Arc<ProduceFn<T, A>>),
    Consume(Arc<ConsumeFn<T, A>>),
    Chain(Box<dyn ChainSpawn<T, A>>),
}

impl<T, A> Pipeline<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    /// Creates an idle pipeline whose buffer holds at most `max_items`.
    ///
    /// # Panics
    ///
    /// Panics if `max_items` is zero.
    pub fn new(max_items: usize) -> Self {
        Self {
            core: Arc::new(Core::new(max_items)),
            workers: Vec::new(),
            producer_count: 0,
            consumer_count: 0,
        }
    }

    // ---------------------------------------------------------------------
    // REGISTRATION
    // ---------------------------------------------------------------------

    /// Registers `count` producer workers sharing one produce callback.
    ///
    /// Producer callbacks of a pipeline are serialized against each other,
    /// so `func` need not be reentrant. No threads run until [`start`].
    ///
    /// [`start`]: Pipeline::start
    pub fn add_producer<F>(&mut self, func: F, count: usize) -> Result<(), PipelineError>
    where
        F: Fn(&A, &WorkerInfo) -> Produced<T> + Send + Sync + 'static,
    {
        if self.core.status.any_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        let func: Arc<ProduceFn<T, A>> = Arc::new(func);
        for _ in 0..count {
            self.workers.push(Worker {
                role: Role::Producer,
                job: Some(Job::Produce(Arc::clone(&func))),
                thread: None,
            });
        }
        Ok(())
    }

    /// Registers `count` consumer workers sharing one consume callback.
    ///
    /// The callback takes ownership of each item. Consumer callbacks of a
    /// pipeline (including chain transforms) are serialized against each
    /// other.
    pub fn add_consumer<F>(&mut self, func: F, count: usize) -> Result<(), PipelineError>
    where
        F: Fn(&A, &WorkerInfo, T) + Send + Sync + 'static,
    {
        if self.core.status.any_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        let func: Arc<ConsumeFn<T, A>> = Arc::new(func);
        for _ in 0..count {
            self.workers.push(Worker {
                role: Role::Consumer,
                job: Some(Job::Consume(Arc::clone(&func))),
                thread: None,
            });
        }
        Ok(())
    }

    /// Registers `count` chain workers that consume from this pipeline,
    /// apply `func`, and append the result to `dst`.
    ///
    /// Chain workers count as consumers of this pipeline and run while both
    /// this pipeline's consuming side and `dst`'s producing side are up.
    /// Start `dst` before this pipeline and stop this pipeline before `dst`;
    /// stopping in the reverse order can strand a chain worker on a
    /// destination nobody drains.
    pub fn chain_into<U, B, F>(
        &mut self,
        dst: &Pipeline<U, B>,
        func: F,
        count: usize,
    ) -> Result<(), PipelineError>
    where
        U: Send + 'static,
        B: Send + Sync + 'static,
        F: Fn(&A, &WorkerInfo, T) -> U + Send + Sync + 'static,
    {
        if self.core.status.any_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        let func: Arc<ChainFn<T, U, A>> = Arc::new(func);
        for _ in 0..count {
            let job = ChainWorker {
                dst: Arc::clone(&dst.core),
                func: Arc::clone(&func),
            };
            self.workers.push(Worker {
                role: Role::Chain,
                job: Some(Job::Chain(Box::new(job))),
                thread: None,
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Spawns every registered worker and hands each callback a reference to
    /// `arg`.
    ///
    /// Workers are numbered in registration order (`id` from 1) and within
    /// their role (`sub_id` from 1). Returns once all threads are launched.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlreadyRunning`] if the pipeline was started
    /// and not yet stopped.
    pub fn start(&mut self, arg: Arc<A>) -> Result<(), PipelineError> {
        if self.core.status.any_running() || self.workers.iter().any(|w| w.thread.is_some()) {
            return Err(PipelineError::AlreadyRunning);
        }
        self.core.status.set(Status::PRODUCERS | Status::CONSUMERS);

        let mut producers = 0u32;
        let mut consumers = 0u32;

        for (slot, worker) in self.workers.iter_mut().enumerate() {
            let id = slot as u32 + 1;
            let Some(job) = worker.job.take() else { continue };

            match job {
                Job::Produce(func) => {
                    producers += 1;
                    let info = WorkerInfo::new(Role::Producer, id, producers);
                    let core = Arc::clone(&self.core);
                    let arg = Arc::clone(&arg);
                    let handle = thread::Builder::new()
                        .name(format!("producer-{producers}"))
                        .spawn(move || produce_loop(&core, &*func, &arg, info))
                        .expect("failed to spawn producer worker thread");
                    debug!(id, sub_id = info.sub_id, "producer worker started");
                    worker.thread = Some(handle);
                }
                Job::Consume(func) => {
                    consumers += 1;
                    let info = WorkerInfo::new(Role::Consumer, id, consumers);
                    let core = Arc::clone(&self.core);
                    let arg = Arc::clone(&arg);
                    let handle = thread::Builder::new()
                        .name(format!("consumer-{consumers}"))
                        .spawn(move || consume_loop(&core, &*func, &arg, info))
                        .expect("failed to spawn consumer worker thread");
                    debug!(id, sub_id = info.sub_id, "consumer worker started");
                    worker.thread = Some(handle);
                }
                Job::Chain(job) => {
                    consumers += 1;
                    let info = WorkerInfo::new(Role::Chain, id, consumers);
                    let handle = job.spawn(Arc::clone(&self.core), Arc::clone(&arg), info);
                    debug!(id, sub_id = info.sub_id, "chain worker started");
                    worker.thread = Some(handle);
                }
            }
        }

        self.producer_count = producers;
        self.consumer_count = consumers;
        info!(producers, consumers, "pipeline started");
        Ok(())
    }

    /// Stops the pipeline, dropping any items nobody consumed.
    ///
    /// Equivalent to [`stop_with`](Pipeline::stop_with) with a cleanup that
    /// drops each leftover item. With consumers attached there are no
    /// leftovers: the drain delivers everything before releasing them.
    pub fn stop(&mut self) -> Result<StopReport, PipelineError> {
        self.stop_with(drop)
    }

    /// Stops the pipeline, draining leftover items through `cleanup`.
    ///
    /// The drain runs in phases: retire producers and join them once their
    /// in-flight items are flushed; wait until the buffer is empty and every
    /// consumer is parked; release and join consumers and chain workers. If
    /// the pipeline has no consumers, a cleaner runs alongside the producer
    /// joins, feeding every leftover item to `cleanup` exactly once and
    /// releasing any producer parked on a full buffer.
    ///
    /// A stopped pipeline has no workers; calling `stop` again is a no-op
    /// returning an empty report.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotStarted`] if workers are registered but
    /// [`start`](Pipeline::start) was never called.
    pub fn stop_with<F>(&mut self, cleanup: F) -> Result<StopReport, PipelineError>
    where
        F: FnMut(T) + Send,
    {
        if self.workers.is_empty() {
            // A start with nothing registered still sets the run bits.
            self.core.status.clear(Status::ALL);
            return Ok(StopReport::default());
        }
        if !self.workers.iter().any(|w| w.thread.is_some()) {
            return Err(PipelineError::NotStarted);
        }

        // Producers exit as soon as the flag drops and their slot is clear.
        self.core.status.clear(Status::PRODUCERS);

        let consumer_count = self.consumer_count as usize;
        let mut report = StopReport::default();
        let core = Arc::clone(&self.core);

        thread::scope(|scope| {
            // With no consumers attached nothing would drain the buffer or
            // make room for parked producers; the cleaner covers both.
            let cleaner = if consumer_count == 0 {
                core.status.set(Status::CLEANING);
                let cleaner_core = Arc::clone(&core);
                Some(scope.spawn(move || clean_loop(&cleaner_core, cleanup)))
            } else {
                None
            };

            for worker in &mut self.workers {
                if worker.role != Role::Producer {
                    continue;
                }
                if let Some(handle) = worker.thread.take() {
                    let info = collect(handle.join());
                    debug!(
                        id = info.id,
                        sub_id = info.sub_id,
                        rounds = info.rounds,
                        items = info.items,
                        "producer worker joined"
                    );
                    report.producers.push(info);
                }
            }

            core.ring.wait_drained(consumer_count);

            // The flag flip rides the buffer mutex so no consumer can park
            // between observing the flag and the broadcast.
            core.ring.locked(|| core.status.clear(Status::CONSUMERS));
            core.ring.wake_consumers();

            for worker in &mut self.workers {
                if worker.role == Role::Producer {
                    continue;
                }
                if let Some(handle) = worker.thread.take() {
                    let info = collect(handle.join());
                    debug!(
                        id = info.id,
                        sub_id = info.sub_id,
                        rounds = info.rounds,
                        items = info.items,
                        role = ?info.role,
                        "consumer worker joined"
                    );
                    report.consumers.push(info);
                }
            }

            if let Some(handle) = cleaner {
                core.ring.locked(|| core.status.clear(Status::CLEANING));
                core.ring.wake_consumers();
                let info = collect(handle.join());
                debug!(rounds = info.rounds, items = info.items, "cleaner joined");
                report.cleaner = Some(info);
            }
        });

        self.workers.clear();
        self.producer_count = 0;
        self.consumer_count = 0;

        info!(
            producers = report.producers.len(),
            consumers = report.consumers.len(),
            cleaned = report.cleaned(),
            "pipeline stopped"
        );
        debug_assert_stopped_clean!(self.core.ring, self.core.status);
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // INTROSPECTION
    // ---------------------------------------------------------------------

    /// Returns true if the pipeline has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.core.status.any_running()
    }

    /// Returns the number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Returns the number of items currently buffered.
    pub fn buffered(&self) -> usize {
        self.core.ring.len()
    }

    /// Returns the buffer capacity.
    pub fn capacity(&self) -> usize {
        self.core.ring.capacity()
    }

    /// Returns the number of workers currently parked on the buffer.
    pub fn parked_workers(&self) -> usize {
        self.core.ring.waiters()
    }
}

impl<T, A> Drop for Pipeline<T, A>
where
    T: Send + 'static,
    A: Send + Sync + 'static,
{
    fn drop(&mut self) {
        // A running pipeline is drained and joined rather than leaked;
        // leftover items are dropped.
        if self.workers.iter().any(|w| w.thread.is_some()) {
            let _ = self.stop_with(drop);
        }
    }
}

/// Cleaner body: drains leftover items through the cleanup callback while
/// keeping parked producers from wedging on a buffer nobody else empties.
///
/// Runs only while the pipeline has no consumers of its own. Popping is the
/// priority: every pop signals `not_full`, which is what actually releases a
/// parked producer; the broadcast on an emptied buffer flushes any stragglers
/// in one go.
fn clean_loop<T, F>(core: &Core<T>, mut cleanup: F) -> WorkerInfo
where
    F: FnMut(T),
{
    let mut info = WorkerInfo::new(Role::Consumer, 0, 0);
    let mut slot: Option<T> = None;

    while slot.is_some() || core.status.cleaning() {
        match slot.take() {
            Some(item) => {
                let delivered = {
                    let _serial = serialize(&core.consumer_gate);
                    contained(|| cleanup(item))
                };
                info.rounds += 1;
                if delivered.is_some() {
                    info.items += 1;
                }
            }
            None => {
                if core.ring.is_empty() && core.ring.waiters() > 0 {
                    core.ring.wake_producers();
                }
                slot = core.ring.pop_while(|| core.status.cleaning());
            }
        }
    }

    debug_assert_no_in_flight!(slot);
    info
}

fn collect(result: thread::Result<WorkerInfo>) -> WorkerInfo {
    match result {
        Ok(info) => info,
        Err(payload) => panic::resume_unwind(payload),
    }
}
