use crate::config::Config;
use crate::descriptor::PacketDescriptor;
use crate::error::Error;
use crate::flow::{FlowEviction, DEFAULT_FLOW_CAPACITY};
use crate::queue::{IngestQueue, Job, Offer, OverflowPolicy, DEFAULT_QUEUE_CAPACITY};
use crate::snapshot::CountingMode;
use crate::stats::{Snapshot, TrafficStats};
use crossbeam_channel::{bounded, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

/// Settings of the aggregation pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub flows: FlowEviction,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            flows: FlowEviction::default(),
        }
    }
}

impl AggregatorConfig {
    /// Read settings from the `queue` and `flows` configuration sections
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let queue_capacity = config
            .get_usize("queue.capacity")
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(Error::config("queue.capacity", queue_capacity));
        }
        let overflow = match config.get("queue.overflow") {
            Some(s) => s.parse()?,
            None => OverflowPolicy::default(),
        };
        let capacity = config
            .get_usize("flows.capacity")
            .unwrap_or(DEFAULT_FLOW_CAPACITY);
        let idle_timeout = match config.get_usize("flows.idle_timeout") {
            Some(t) => Some(u32::try_from(t).map_err(|_| Error::config("flows.idle_timeout", t))?),
            None => None,
        };
        Ok(AggregatorConfig {
            queue_capacity,
            overflow,
            flows: FlowEviction {
                capacity,
                idle_timeout,
            },
        })
    }
}

/// Outcome of a successful submission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Queued, will be reflected in statistics
    Accepted,
    /// Rejected by the overflow policy, counted as an ingest drop
    Dropped,
}

/// Owner of the traffic statistics
///
/// Descriptors are submitted through a bounded queue and applied by a
/// single worker thread. Every mutation and every snapshot holds the same
/// lock, so snapshots are consistent across all fields.
///
/// `StatsAggregator` is `Sync`: wrap it in an `Arc` to share it between
/// submitters and readers.
pub struct StatsAggregator {
    stats: Arc<Mutex<TrafficStats>>,
    queue: IngestQueue,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl StatsAggregator {
    /// Create the aggregate and start the worker thread
    pub fn new(config: &AggregatorConfig) -> Result<Self, Error> {
        let stats = Arc::new(Mutex::new(TrafficStats::new(config.flows)));
        let (queue, receiver) = IngestQueue::new(config.queue_capacity, config.overflow);
        let worker_stats = stats.clone();
        let handler = thread::Builder::new()
            .name("aggregator".to_owned())
            .spawn(move || run_worker(receiver, worker_stats))?;
        debug!(
            "aggregator started (queue capacity {}, overflow policy {})",
            queue.capacity(),
            queue.policy()
        );
        Ok(StatsAggregator {
            stats,
            queue,
            worker: Mutex::new(Some(handler)),
        })
    }

    /// Hand a descriptor over to the worker.
    ///
    /// Depending on the overflow policy, blocks while the queue is full or
    /// drops the descriptor. Fails with `Error::Closed` after `close()`.
    pub fn submit(&self, d: PacketDescriptor) -> Result<Admission, Error> {
        match self.queue.offer(d, || self.lock().record_ingest_drop())? {
            Offer::Queued => Ok(Admission::Accepted),
            Offer::Full => {
                trace!("ingest queue full, descriptor dropped");
                Ok(Admission::Dropped)
            }
        }
    }

    /// Count one frame in the capture tally
    pub fn record_capture(&self, caplen: u32) {
        self.lock().record_capture(caplen);
    }

    /// Return a consistent view of all statistics
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    /// Same as `snapshot`, with packet/byte totals chosen by `mode`
    pub fn snapshot_as(&self, mode: CountingMode) -> Snapshot {
        self.lock().snapshot_as(mode)
    }

    /// Clear all statistics.
    ///
    /// Descriptors still queued are applied after the reset.
    pub fn reset(&self) {
        self.lock().reset();
        debug!("statistics reset");
    }

    /// Wait until every descriptor submitted before this call is applied
    pub fn sync(&self) -> Result<(), Error> {
        let (ack, done) = bounded(1);
        self.queue.control(Job::Wait(ack))?;
        done.recv().map_err(|_| Error::Closed)
    }

    /// Number of descriptors waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop accepting descriptors, apply all queued ones, and stop the worker.
    ///
    /// Returns the final snapshot. Calling `close` again has no effect.
    pub fn close(&self) -> Snapshot {
        if self.queue.close() {
            debug!("aggregator closing, draining {} queued jobs", self.queue.len());
        }
        let handler = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            if handler.join().is_err() {
                warn!("aggregator worker panicked");
            }
        }
        self.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, TrafficStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StatsAggregator {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(receiver: Receiver<Job>, stats: Arc<Mutex<TrafficStats>>) {
    debug!("aggregator worker starting");
    for job in receiver.iter() {
        match job {
            Job::New(d) => {
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .update(&d);
            }
            Job::Wait(ack) => {
                let _ = ack.send(());
            }
            Job::Exit => break,
        }
    }
    debug!("aggregator worker exiting");
}
