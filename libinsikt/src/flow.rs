//! Per-direction TCP sequence tracking

use crate::duration::Duration;
use fnv::FnvHashMap;
use std::net::IpAddr;

/// Default maximum number of tracked flows
pub const DEFAULT_FLOW_CAPACITY: usize = 65536;

/// One direction of a TCP conversation
///
/// A -> B and B -> A are distinct keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl FlowKey {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        FlowKey { src, dst }
    }
}

/// Result of checking a sequence number against the previous one of its flow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqCheck {
    /// First packet of the flow (or first after eviction)
    New,
    /// Sequence number is exactly the previous one plus one
    InOrder,
    /// Any other value: gap, duplicate, retransmission or reordering
    Gap,
}

#[derive(Debug)]
struct FlowState {
    last_seq: u32,
    last_seen: Duration,
    /// Recency rank, used for eviction
    touched: u64,
}

/// Eviction policy of the flow table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowEviction {
    /// Maximum number of flows, 0 for unbounded
    pub capacity: usize,
    /// Flows idle for this many seconds (capture time) are expired first
    pub idle_timeout: Option<u32>,
}

impl Default for FlowEviction {
    fn default() -> Self {
        FlowEviction {
            capacity: DEFAULT_FLOW_CAPACITY,
            idle_timeout: None,
        }
    }
}

impl FlowEviction {
    pub fn unbounded() -> Self {
        FlowEviction {
            capacity: 0,
            idle_timeout: None,
        }
    }
}

/// Last observed TCP sequence number, per flow key
///
/// When the table is full, inserting a new flow first expires idle flows,
/// then evicts the least recently seen eighth of the table.
pub struct FlowTable {
    flows: FnvHashMap<FlowKey, FlowState>,
    eviction: FlowEviction,
    tick: u64,
    evicted: u64,
}

impl Default for FlowTable {
    fn default() -> Self {
        FlowTable::new(FlowEviction::default())
    }
}

impl FlowTable {
    pub fn new(eviction: FlowEviction) -> Self {
        FlowTable {
            flows: FnvHashMap::default(),
            eviction,
            tick: 0,
            evicted: 0,
        }
    }

    /// Record `seq` as the last sequence number of `key`, and compare it to
    /// the previous one.
    pub fn observe(&mut self, key: FlowKey, seq: u32, ts: Duration) -> SeqCheck {
        self.tick += 1;
        if let Some(state) = self.flows.get_mut(&key) {
            let check = if seq == state.last_seq.wrapping_add(1) {
                SeqCheck::InOrder
            } else {
                SeqCheck::Gap
            };
            state.last_seq = seq;
            state.last_seen = ts;
            state.touched = self.tick;
            return check;
        }
        self.make_room(ts);
        self.flows.insert(
            key,
            FlowState {
                last_seq: seq,
                last_seen: ts,
                touched: self.tick,
            },
        );
        SeqCheck::New
    }

    /// Return the last sequence number seen for `key`
    pub fn last_seq(&self, key: &FlowKey) -> Option<u32> {
        self.flows.get(key).map(|s| s.last_seq)
    }

    /// Return the number of tracked flows
    #[inline]
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Returns true if no flow is tracked
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Number of flows removed by the eviction policy
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Remove all flows and reset counters
    pub fn clear(&mut self) {
        self.flows.clear();
        self.tick = 0;
        self.evicted = 0;
    }

    fn make_room(&mut self, now: Duration) {
        let capacity = self.eviction.capacity;
        if capacity == 0 || self.flows.len() < capacity {
            return;
        }
        let before = self.flows.len();
        if let Some(timeout) = self.eviction.idle_timeout {
            self.flows
                .retain(|_, s| now.secs.saturating_sub(s.last_seen.secs) < timeout);
        }
        if self.flows.len() >= capacity {
            let mut ranks: Vec<u64> = self.flows.values().map(|s| s.touched).collect();
            let n = (capacity / 8).clamp(1, ranks.len());
            let (_, &mut cutoff, _) = ranks.select_nth_unstable(n - 1);
            self.flows.retain(|_, s| s.touched > cutoff);
        }
        let removed = before - self.flows.len();
        self.evicted += removed as u64;
        debug!("flow table full: evicted {} flows", removed);
    }
}
