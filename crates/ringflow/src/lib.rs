//! ringflow - Threaded Producer/Consumer Pipeline Stages
//!
//! A small in-process pipeline framework: pools of producer, consumer and
//! chain workers coordinated over a bounded blocking ring buffer. Producers
//! call a user callback and append the result; consumers pop and deliver to a
//! user callback; chain workers bridge two pipelines, consuming from one and
//! producing into the other through a typed transform.
//!
//! # Key properties
//!
//! - Bounded occupancy: appends block instead of growing the buffer
//! - Loss-free shutdown: `stop` drains in phases so every produced item
//!   reaches exactly one consumer, chain transform, or cleanup callback
//! - Per-role callback serialization: non-reentrant callbacks are safe
//! - Per-worker accounting (rounds and items) returned from `stop`
//!
//! # Example
//!
//! ```
//! use ringflow::{Pipeline, Produced};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::{Arc, Mutex};
//!
//! struct Feed {
//!     next: AtomicU64,
//!     seen: Mutex<Vec<u64>>,
//! }
//!
//! let mut line = Pipeline::<u64, Feed>::new(8);
//! line.add_producer(
//!     |feed: &Feed, _| {
//!         let n = feed.next.fetch_add(1, Ordering::Relaxed);
//!         if n < 100 { Produced::Item(n) } else { Produced::Halt }
//!     },
//!     2,
//! )?;
//! line.add_consumer(|feed: &Feed, _, item| feed.seen.lock().unwrap().push(item), 3)?;
//!
//! let feed = Arc::new(Feed {
//!     next: AtomicU64::new(0),
//!     seen: Mutex::new(Vec::new()),
//! });
//! line.start(Arc::clone(&feed))?;
//! let report = line.stop()?;
//!
//! // The drain is loss-free: everything produced was delivered.
//! assert_eq!(report.produced(), report.consumed());
//! assert_eq!(feed.seen.lock().unwrap().len() as u64, report.consumed());
//! # Ok::<(), ringflow::PipelineError>(())
//! ```

mod chain;
mod error;
mod invariants;
mod pipeline;
mod report;
mod ring;
mod status;
mod worker;

pub use error::PipelineError;
pub use pipeline::Pipeline;
pub use report::StopReport;
pub use ring::RingBuffer;
pub use worker::{Produced, Role, WorkerInfo};
