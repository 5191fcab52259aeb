//! Read path: consistent snapshots for periodic export

use crate::aggregator::StatsAggregator;
use crate::config::Config;
use crate::error::Error;
use crate::stats::Snapshot;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which packet/byte totals are reported
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountingMode {
    /// Only classified frames (descriptor payload bytes)
    #[default]
    Strict,
    /// All captured frames (captured frame bytes), classified or not
    Raw,
}

impl FromStr for CountingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(CountingMode::Strict),
            "raw" => Ok(CountingMode::Raw),
            _ => Err(Error::config("stats.counting", s)),
        }
    }
}

impl fmt::Display for CountingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CountingMode::Strict => f.write_str("strict"),
            CountingMode::Raw => f.write_str("raw"),
        }
    }
}

impl CountingMode {
    /// Read the `stats.counting` configuration key
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        config
            .get("stats.counting")
            .map_or(Ok(CountingMode::default()), str::parse)
    }
}

/// Capture-level totals: every frame seen by the frame source
///
/// Kept inside the aggregate, so that raw totals are read under the same
/// lock as every other field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureTally {
    pub frames: u64,
    pub bytes: u64,
}

impl CaptureTally {
    pub fn record(&mut self, caplen: u32) {
        self.frames += 1;
        self.bytes += u64::from(caplen);
    }
}

/// Read-only access to the statistics
///
/// Every snapshot is taken under the aggregator lock. In `Raw` mode, the
/// packet and byte totals are the capture tally instead of the descriptor
/// totals.
#[derive(Clone)]
pub struct SnapshotReader {
    aggregator: Arc<StatsAggregator>,
    mode: CountingMode,
}

impl SnapshotReader {
    pub fn new(aggregator: Arc<StatsAggregator>, mode: CountingMode) -> Self {
        SnapshotReader { aggregator, mode }
    }

    pub fn mode(&self) -> CountingMode {
        self.mode
    }

    pub fn read(&self) -> Snapshot {
        self.aggregator.snapshot_as(self.mode)
    }

    /// Reset the aggregate, including the capture tally
    pub fn reset(&self) {
        self.aggregator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::descriptor::PacketDescriptor;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn snapshot_counting_modes() {
        let aggregator =
            Arc::new(StatsAggregator::new(&AggregatorConfig::default()).expect("aggregator"));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1));

        // two frames captured, one of them classified
        aggregator.record_capture(60);
        aggregator.record_capture(1514);
        aggregator
            .submit(PacketDescriptor::udp(ip, ip, 1, 2, 18))
            .expect("submit");
        aggregator.sync().expect("sync");

        let strict = SnapshotReader::new(aggregator.clone(), CountingMode::Strict);
        let raw = SnapshotReader::new(aggregator, CountingMode::Raw);
        let s = strict.read();
        assert_eq!((s.total_packets, s.total_bytes), (1, 18));
        let r = raw.read();
        assert_eq!((r.total_packets, r.total_bytes), (2, 1574));
        assert_eq!(r.unique_ips, s.unique_ips);

        raw.reset();
        assert_eq!(raw.read(), Snapshot::default());
    }

    #[test]
    fn capture_tally_record() {
        let mut tally = CaptureTally::default();
        tally.record(60);
        tally.record(40);
        assert_eq!(tally, CaptureTally { frames: 2, bytes: 100 });
    }

    #[test]
    fn counting_mode_config() {
        let mut config = Config::default();
        assert_eq!(CountingMode::from_config(&config).ok(), Some(CountingMode::Strict));
        config.set("stats.counting", "raw");
        assert_eq!(CountingMode::from_config(&config).ok(), Some(CountingMode::Raw));
        config.set("stats.counting", "both");
        assert!(CountingMode::from_config(&config).is_err());
    }
}
