use crate::descriptor::{PacketDescriptor, Protocol};
use crate::flow::{FlowEviction, FlowKey, FlowTable, SeqCheck};
use crate::snapshot::{CaptureTally, CountingMode};
use fnv::FnvHashSet;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Traffic statistics aggregate
///
/// Counters only grow between resets, and sets only grow between resets.
/// This type is not synchronized: `StatsAggregator` owns the single
/// instance and serializes all access.
pub struct TrafficStats {
    total_packets: u64,
    total_bytes: u64,
    ips: FnvHashSet<IpAddr>,
    ports: FnvHashSet<u16>,
    flows: FlowTable,
    packet_drops: u64,
    ingest_drops: u64,
    capture: CaptureTally,
}

impl Default for TrafficStats {
    fn default() -> Self {
        TrafficStats::new(FlowEviction::default())
    }
}

impl TrafficStats {
    pub fn new(eviction: FlowEviction) -> Self {
        TrafficStats {
            total_packets: 0,
            total_bytes: 0,
            ips: FnvHashSet::default(),
            ports: FnvHashSet::default(),
            flows: FlowTable::new(eviction),
            packet_drops: 0,
            ingest_drops: 0,
            capture: CaptureTally::default(),
        }
    }

    /// Account for one descriptor
    pub fn update(&mut self, d: &PacketDescriptor) {
        self.total_packets += 1;
        self.total_bytes += d.payload_len as u64;

        self.ips.insert(d.src);
        self.ips.insert(d.dst);
        self.ports.insert(d.src_port);
        self.ports.insert(d.dst_port);

        if d.protocol == Protocol::Tcp {
            // a TCP descriptor always carries a sequence number
            let seq = d.seq.unwrap_or_default();
            let key = FlowKey::new(d.src, d.dst);
            if self.flows.observe(key, seq, d.ts) == SeqCheck::Gap {
                trace!("sequence gap: {}", d);
                self.packet_drops += 1;
            }
        }
    }

    /// Account for one descriptor rejected by the ingest queue
    pub fn record_ingest_drop(&mut self) {
        self.ingest_drops += 1;
    }

    /// Account for one captured frame, classified or not
    pub fn record_capture(&mut self, caplen: u32) {
        self.capture.record(caplen);
    }

    /// Return all counters and cardinalities, with packet/byte totals
    /// chosen by `mode`
    pub fn snapshot_as(&self, mode: CountingMode) -> Snapshot {
        let snapshot = self.snapshot();
        match mode {
            CountingMode::Strict => snapshot,
            CountingMode::Raw => Snapshot {
                total_packets: self.capture.frames,
                total_bytes: self.capture.bytes,
                ..snapshot
            },
        }
    }

    /// Return all counters and cardinalities
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            total_packets: self.total_packets,
            total_bytes: self.total_bytes,
            unique_ips: self.ips.len() as u64,
            unique_ports: self.ports.len() as u64,
            packet_drops: self.packet_drops,
            ingest_drops: self.ingest_drops,
            tracked_flows: self.flows.len() as u64,
            evicted_flows: self.flows.evicted(),
        }
    }

    /// Clear all counters, sets and flows
    pub fn reset(&mut self) {
        self.total_packets = 0;
        self.total_bytes = 0;
        self.ips.clear();
        self.ports.clear();
        self.flows.clear();
        self.packet_drops = 0;
        self.ingest_drops = 0;
        self.capture = CaptureTally::default();
    }
}

/// Point-in-time statistics, cumulative since start or last reset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub unique_ips: u64,
    pub unique_ports: u64,
    /// Sequence gap events (heuristic, one per out-of-order TCP segment)
    pub packet_drops: u64,
    /// Descriptors rejected because the ingest queue was full
    pub ingest_drops: u64,
    pub tracked_flows: u64,
    pub evicted_flows: u64,
}

impl Snapshot {
    /// Counter increase since `previous`.
    ///
    /// Counters are subtracted; gauges (unique IPs/ports, tracked flows) keep
    /// their current value. A counter lower than in `previous` (after a
    /// reset) yields its current value.
    pub fn since(&self, previous: &Snapshot) -> Snapshot {
        let delta = |cur: u64, prev: u64| if cur >= prev { cur - prev } else { cur };
        Snapshot {
            total_packets: delta(self.total_packets, previous.total_packets),
            total_bytes: delta(self.total_bytes, previous.total_bytes),
            unique_ips: self.unique_ips,
            unique_ports: self.unique_ports,
            packet_drops: delta(self.packet_drops, previous.packet_drops),
            ingest_drops: delta(self.ingest_drops, previous.ingest_drops),
            tracked_flows: self.tracked_flows,
            evicted_flows: delta(self.evicted_flows, previous.evicted_flows),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "packets={} bytes={} unique_ips={} unique_ports={} packet_drops={} ingest_drops={}",
            self.total_packets,
            self.total_bytes,
            self.unique_ips,
            self.unique_ports,
            self.packet_drops,
            self.ingest_drops
        )
    }
}
