//! Bounded hand-off between classification and aggregation

use crate::descriptor::PacketDescriptor;
use crate::error::Error;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

/// Default queue capacity, in descriptors
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Behavior of `submit` when the queue is full
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until space is available. Capture may stall under sustained overload.
    Block,
    /// Reject the new descriptor and count it as an ingest drop
    #[default]
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(OverflowPolicy::Block),
            "drop" | "drop-newest" => Ok(OverflowPolicy::DropNewest),
            _ => Err(Error::config("queue.overflow", s)),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OverflowPolicy::Block => f.write_str("block"),
            OverflowPolicy::DropNewest => f.write_str("drop"),
        }
    }
}

/// Message sent to the aggregation worker
pub(crate) enum Job {
    /// Apply a descriptor
    New(PacketDescriptor),
    /// Acknowledge once all previous jobs are processed
    Wait(Sender<()>),
    /// Stop after all previous jobs are processed
    Exit,
}

/// Outcome of offering a descriptor to the queue
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Offer {
    Queued,
    /// Queue full, descriptor dropped (`DropNewest` only)
    Full,
}

/// Bounded FIFO queue of descriptors, with an explicit overflow policy
///
/// Once closed, every offer fails with `Error::Closed`. Closing waits for
/// in-progress offers, so that no descriptor can be queued after the
/// final `Job::Exit`.
pub(crate) struct IngestQueue {
    sender: Sender<Job>,
    policy: OverflowPolicy,
    capacity: usize,
    closed: RwLock<bool>,
}

impl IngestQueue {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> (Self, Receiver<Job>) {
        let (sender, receiver) = bounded(capacity);
        let queue = IngestQueue {
            sender,
            policy,
            capacity,
            closed: RwLock::new(false),
        };
        (queue, receiver)
    }

    /// Queue a descriptor according to the overflow policy.
    ///
    /// `on_full` runs when the descriptor is dropped, before the close gate
    /// is released: a drop is always accounted before `close()` returns.
    pub(crate) fn offer<F: FnOnce()>(&self, d: PacketDescriptor, on_full: F) -> Result<Offer, Error> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(Error::Closed);
        }
        match self.policy {
            OverflowPolicy::Block => {
                self.sender.send(Job::New(d)).map_err(|_| Error::Closed)?;
                Ok(Offer::Queued)
            }
            OverflowPolicy::DropNewest => match self.sender.try_send(Job::New(d)) {
                Ok(()) => Ok(Offer::Queued),
                Err(TrySendError::Full(_)) => {
                    on_full();
                    Ok(Offer::Full)
                }
                Err(TrySendError::Disconnected(_)) => Err(Error::Closed),
            },
        }
    }

    /// Send a control job, waiting for space regardless of the overflow policy
    pub(crate) fn control(&self, job: Job) -> Result<(), Error> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(Error::Closed);
        }
        self.sender.send(job).map_err(|_| Error::Closed)
    }

    /// Mark the queue closed and enqueue the final `Job::Exit`.
    ///
    /// Returns false if the queue was already closed.
    pub(crate) fn close(&self) -> bool {
        {
            let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return false;
            }
            *closed = true;
        }
        // fails only if the worker is gone, in which case there is nothing to stop
        let _ = self.sender.send(Job::Exit);
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued jobs
    pub(crate) fn len(&self) -> usize {
        self.sender.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn descriptor() -> PacketDescriptor {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        PacketDescriptor::udp(ip, ip, 1, 2, 3)
    }

    #[test]
    fn queue_drop_newest_when_full() {
        let (queue, receiver) = IngestQueue::new(2, OverflowPolicy::DropNewest);
        let mut full = 0;
        assert_eq!(queue.offer(descriptor(), || full += 1).ok(), Some(Offer::Queued));
        assert_eq!(queue.offer(descriptor(), || full += 1).ok(), Some(Offer::Queued));
        assert_eq!(queue.offer(descriptor(), || full += 1).ok(), Some(Offer::Full));
        assert_eq!(full, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(receiver.len(), 2);
    }

    #[test]
    fn queue_rejects_after_close() {
        let (queue, receiver) = IngestQueue::new(4, OverflowPolicy::Block);
        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());
        assert!(matches!(queue.offer(descriptor(), || ()), Err(Error::Closed)));
        assert!(matches!(queue.control(Job::Exit), Err(Error::Closed)));
        assert!(matches!(receiver.try_recv(), Ok(Job::Exit)));
    }

    #[test]
    fn queue_policy_names() {
        assert_eq!("block".parse::<OverflowPolicy>().ok(), Some(OverflowPolicy::Block));
        assert_eq!("drop".parse::<OverflowPolicy>().ok(), Some(OverflowPolicy::DropNewest));
        assert!("lossy".parse::<OverflowPolicy>().is_err());
        assert_eq!(OverflowPolicy::default().to_string(), "drop");
    }
}
