//! Traffic statistics engine
//!
//! Frames delivered by a frame source (pcap file, live interface) are
//! classified into `PacketDescriptor`s, handed over through a bounded
//! queue, and aggregated by a single worker into `TrafficStats`.
//! `SnapshotReader` serves consistent, cumulative reads for export.
//!
//! ```text
//! frame source -> IngestPipeline (FrameClassifier) -> queue -> StatsAggregator <- SnapshotReader
//! ```

#[macro_use]
extern crate tracing;

mod aggregator;
mod analyzer;
mod classifier;
mod config;
mod descriptor;
mod duration;
mod engine;
mod error;
mod flow;
mod frame;
mod pipeline;
mod queue;
mod snapshot;
mod stats;

pub use aggregator::*;
pub use analyzer::*;
pub use classifier::*;
pub use config::Config;
pub use descriptor::*;
pub use duration::Duration;
pub use engine::*;
pub use error::*;
pub use flow::*;
pub use frame::Frame;
pub use pipeline::*;
pub use queue::{OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
pub use snapshot::*;
pub use stats::*;

pub use pcap_parser;
