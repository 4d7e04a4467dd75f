use ringflow::{Pipeline, Produced, Role};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Shared argument for tests that number their items from a global counter
/// and record everything delivered.
struct Feed {
    next: AtomicU64,
    seen: Mutex<Vec<u64>>,
}

impl Feed {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }
}

/// Asserts that `values` is a permutation of `0..n`: every produced item was
/// delivered exactly once.
fn assert_each_exactly_once(mut values: Vec<u64>, n: u64) {
    values.sort_unstable();
    assert_eq!(values.len() as u64, n, "delivered count mismatch");
    for (i, v) in values.iter().enumerate() {
        assert_eq!(*v, i as u64, "value {} missing or duplicated", i);
    }
}

#[test]
fn test_many_producers_many_consumers_conserve_items() {
    let mut line = Pipeline::<u64, Feed>::new(4);
    line.add_producer(
        |feed: &Feed, _| Produced::Item(feed.next.fetch_add(1, Ordering::Relaxed)),
        6,
    )
    .unwrap();
    line.add_consumer(
        |feed: &Feed, _, item| feed.seen.lock().unwrap().push(item),
        10,
    )
    .unwrap();

    let feed = Arc::new(Feed::new());
    line.start(Arc::clone(&feed)).unwrap();
    thread::sleep(Duration::from_millis(5));
    let report = line.stop().unwrap();

    assert_eq!(report.produced(), report.consumed());
    assert_eq!(report.cleaned(), 0);
    assert_each_exactly_once(feed.seen.lock().unwrap().clone(), report.produced());

    // Worker numbering: ids follow registration order, sub-ids the role.
    for (i, info) in report.producers.iter().enumerate() {
        assert_eq!(info.role, Role::Producer);
        assert_eq!(info.id, i as u32 + 1);
        assert_eq!(info.sub_id, i as u32 + 1);
    }
    for (i, info) in report.consumers.iter().enumerate() {
        assert_eq!(info.role, Role::Consumer);
        assert_eq!(info.id, i as u32 + 7);
        assert_eq!(info.sub_id, i as u32 + 1);
    }
    for info in report.producers.iter().chain(report.consumers.iter()) {
        assert!(info.items <= info.rounds);
    }
}

#[test]
fn test_chained_pipelines_deliver_everything_downstream() {
    struct Source {
        next: AtomicU64,
        xmit_seq: AtomicU64,
    }
    struct Sink {
        seen: Mutex<Vec<(u64, u64)>>,
    }

    let mut upstream = Pipeline::<u64, Source>::new(10);
    let mut downstream = Pipeline::<(u64, u64), Sink>::new(10);

    upstream
        .add_producer(
            |src: &Source, _| Produced::Item(src.next.fetch_add(1, Ordering::Relaxed)),
            2,
        )
        .unwrap();
    upstream
        .chain_into(
            &downstream,
            |src: &Source, _, n| (n, src.xmit_seq.fetch_add(1, Ordering::Relaxed)),
            1,
        )
        .unwrap();
    downstream
        .add_consumer(
            |sink: &Sink, _, pair| sink.seen.lock().unwrap().push(pair),
            3,
        )
        .unwrap();

    // Destination first up, source first down.
    let sink = Arc::new(Sink {
        seen: Mutex::new(Vec::new()),
    });
    downstream.start(Arc::clone(&sink)).unwrap();
    let source = Arc::new(Source {
        next: AtomicU64::new(0),
        xmit_seq: AtomicU64::new(0),
    });
    upstream.start(Arc::clone(&source)).unwrap();

    thread::sleep(Duration::from_millis(5));

    let up = upstream.stop().unwrap();
    let down = downstream.stop().unwrap();

    // Everything upstream produced crossed the chain and reached a
    // downstream consumer.
    assert_eq!(up.produced(), down.consumed());
    assert_eq!(down.cleaned(), 0);

    let ns: Vec<u64> = sink.seen.lock().unwrap().iter().map(|(n, _)| *n).collect();
    assert_each_exactly_once(ns, up.produced());

    let chain = up
        .consumers
        .iter()
        .find(|w| w.role == Role::Chain)
        .expect("chain worker missing from report");
    assert!(chain.rounds >= chain.items);
    assert_eq!(chain.items, up.produced());
}

#[test]
fn test_tight_buffer_preserves_fifo() {
    const N: u64 = 100;

    let mut line = Pipeline::<u64, Feed>::new(1);
    line.add_producer(
        |feed: &Feed, _| {
            let n = feed.next.fetch_add(1, Ordering::Relaxed);
            if n < N {
                Produced::Item(n)
            } else {
                Produced::Halt
            }
        },
        1,
    )
    .unwrap();
    line.add_consumer(
        |feed: &Feed, _, item| feed.seen.lock().unwrap().push(item),
        1,
    )
    .unwrap();

    let feed = Arc::new(Feed::new());
    line.start(Arc::clone(&feed)).unwrap();

    let deadline = Instant::now() + DRAIN_DEADLINE;
    while (feed.seen.lock().unwrap().len() as u64) < N {
        assert!(Instant::now() < deadline, "consumer did not drain in time");
        thread::sleep(Duration::from_millis(1));
    }
    let report = line.stop().unwrap();
    assert_eq!(report.produced(), N);

    // One producer, one consumer, one-slot buffer: exact FIFO.
    let seen = feed.seen.lock().unwrap();
    for (i, v) in seen.iter().enumerate() {
        assert_eq!(*v, i as u64, "out-of-order delivery at position {}", i);
    }
}

#[test]
fn test_cleaner_drains_when_no_consumers() {
    struct Counter {
        next: AtomicU64,
    }

    let mut line = Pipeline::<u64, Counter>::new(8);
    line.add_producer(
        |c: &Counter, _| Produced::Item(c.next.fetch_add(1, Ordering::Relaxed)),
        4,
    )
    .unwrap();
    line.start(Arc::new(Counter {
        next: AtomicU64::new(0),
    }))
    .unwrap();
    thread::sleep(Duration::from_millis(5));

    let cleaned = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&cleaned);
    let report = line
        .stop_with(move |item| sink.lock().unwrap().push(item))
        .unwrap();

    let cleaner = report.cleaner.expect("no cleaner ran");
    assert_eq!(cleaner.id, 0);
    assert_eq!(report.consumed(), 0);
    assert_eq!(report.produced(), report.cleaned());
    assert_each_exactly_once(cleaned.lock().unwrap().clone(), report.cleaned());
    assert_eq!(line.buffered(), 0);
}

#[test]
fn test_slow_consumer_parks_producers() {
    let mut line = Pipeline::<u64, Feed>::new(2);
    line.add_producer(
        |feed: &Feed, _| Produced::Item(feed.next.fetch_add(1, Ordering::Relaxed)),
        3,
    )
    .unwrap();
    line.add_consumer(
        |feed: &Feed, _, item| {
            thread::sleep(Duration::from_millis(10));
            feed.seen.lock().unwrap().push(item);
        },
        1,
    )
    .unwrap();

    let feed = Arc::new(Feed::new());
    line.start(Arc::clone(&feed)).unwrap();

    // Three fast producers against a two-slot buffer and one slow consumer:
    // someone has to park.
    let deadline = Instant::now() + DRAIN_DEADLINE;
    let mut observed_backpressure = false;
    while Instant::now() < deadline {
        if line.parked_workers() > 0 {
            observed_backpressure = true;
            break;
        }
        thread::yield_now();
    }
    assert!(observed_backpressure, "producers never parked on the buffer");

    let report = line.stop().unwrap();
    assert_eq!(report.produced(), report.consumed());
    assert_each_exactly_once(feed.seen.lock().unwrap().clone(), report.produced());
}

#[test]
fn test_start_on_running_pipeline_is_invalid() {
    let mut line = Pipeline::<u64, Feed>::new(4);
    line.add_producer(
        |feed: &Feed, _| Produced::Item(feed.next.fetch_add(1, Ordering::Relaxed)),
        1,
    )
    .unwrap();
    line.add_consumer(|_, _, _| {}, 1).unwrap();

    line.start(Arc::new(Feed::new())).unwrap();
    assert_eq!(
        line.start(Arc::new(Feed::new())),
        Err(ringflow::PipelineError::AlreadyRunning)
    );
    line.stop().unwrap();

    // After a full stop the pipeline is inert; stopping again is a no-op.
    let report = line.stop().unwrap();
    assert_eq!(report.produced(), 0);
}

#[test]
fn test_halt_retires_the_producing_side() {
    const QUOTA: u64 = 50;

    let mut line = Pipeline::<u64, Feed>::new(4);
    line.add_producer(
        |feed: &Feed, _| {
            let n = feed.next.fetch_add(1, Ordering::Relaxed);
            if n < QUOTA {
                Produced::Item(n)
            } else {
                Produced::Halt
            }
        },
        3,
    )
    .unwrap();
    line.add_consumer(
        |feed: &Feed, _, item| feed.seen.lock().unwrap().push(item),
        2,
    )
    .unwrap();

    let feed = Arc::new(Feed::new());
    line.start(Arc::clone(&feed)).unwrap();

    // Every value below the quota is drawn by exactly one producer and
    // flushed before that producer retires, halted or not.
    let deadline = Instant::now() + DRAIN_DEADLINE;
    while (feed.seen.lock().unwrap().len() as u64) < QUOTA {
        assert!(Instant::now() < deadline, "halted pipeline did not drain");
        thread::sleep(Duration::from_millis(1));
    }

    let report = line.stop().unwrap();
    assert_eq!(report.produced(), QUOTA);
    assert_eq!(report.consumed(), QUOTA);
    assert_each_exactly_once(feed.seen.lock().unwrap().clone(), QUOTA);
}
