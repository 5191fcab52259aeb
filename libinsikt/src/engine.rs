use crate::analyzer::FrameAnalyzer;
use crate::config::Config;
use crate::duration::Duration;
use crate::error::Error;
use crate::frame::Frame;
use pcap_parser::data::get_packetdata;
use pcap_parser::{build_ts_resolution, Block, Linktype, PcapBlockOwned, PcapError};
use std::io::Read;

/// Information related to a capture interface
#[derive(Clone, Copy, Debug)]
struct InterfaceInfo {
    link_type: Linktype,
    /// Timestamp unit, in ticks per second
    ts_unit: u64,
    ts_offset: i64,
    snaplen: u32,
}

/// pcap/pcap-ng file engine
///
/// `PcapFileEngine` reads a pcap or pcap-ng stream, builds a `Frame` for
/// each packet block and hands it to a `FrameAnalyzer`.
///
/// ## example
///
/// ```
/// use libinsikt::{Config, Error, Frame, FrameAnalyzer, PcapFileEngine};
/// #[derive(Default)]
/// pub struct FrameCounter {
///     frames: usize,
/// }
///
/// impl FrameAnalyzer for FrameCounter {
///     fn handle_frame(&mut self, _frame: &Frame) -> Result<(), Error> {
///         self.frames += 1;
///         Ok(())
///     }
/// }
///
/// let config = Config::default();
/// let mut engine = PcapFileEngine::new(FrameCounter::default(), &config);
///
/// // `engine.run()` can take any `Read` as input
/// use std::io::Cursor;
/// let mut input = Cursor::new(vec![1, 2, 3, 4, 5]);
/// let res = engine.run(&mut input);
/// ```
pub struct PcapFileEngine<A: FrameAnalyzer> {
    analyzer: A,
    capacity: usize,
}

impl<A: FrameAnalyzer> PcapFileEngine<A> {
    pub fn new(analyzer: A, config: &Config) -> Self {
        let capacity = config
            .get_usize("buffer_initial_capacity")
            .unwrap_or(128 * 1024);
        PcapFileEngine { analyzer, capacity }
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn analyzer_mut(&mut self) -> &mut A {
        &mut self.analyzer
    }

    pub fn into_analyzer(self) -> A {
        self.analyzer
    }

    /// Read all pcap data and call the analyzer for each frame
    pub fn run(&mut self, reader: &mut (dyn Read + Send)) -> Result<(), Error> {
        let mut reader = pcap_parser::create_reader(self.capacity, reader)
            .map_err(|e| Error::Pcap(e.to_owned_vec()))?;

        self.analyzer.init()?;
        let mut interfaces: Vec<InterfaceInfo> = Vec::new();
        let mut index = 0;
        let mut last_incomplete_index = 0;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let res = match block {
                        PcapBlockOwned::LegacyHeader(ref hdr) => {
                            let ts_unit = if hdr.is_nanosecond_precision() {
                                1_000_000_000
                            } else {
                                1_000_000
                            };
                            trace!("Legacy pcap, link type: {}", hdr.network);
                            interfaces.push(InterfaceInfo {
                                link_type: hdr.network,
                                ts_unit,
                                ts_offset: 0,
                                snaplen: hdr.snaplen,
                            });
                            Ok(())
                        }
                        PcapBlockOwned::Legacy(ref b) => {
                            index += 1;
                            let if_info = interfaces
                                .first()
                                .ok_or(Error::Generic("Legacy packet before pcap header"))?;
                            let ts = Duration::from_fraction(b.ts_sec, u64::from(b.ts_usec), if_info.ts_unit);
                            self.handle_data(if_info, ts, b.data, b.caplen, b.origlen, index)
                        }
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            debug!("pcap-ng: new section");
                            interfaces.clear();
                            Ok(())
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(ref idb)) => {
                            let ts_unit = build_ts_resolution(idb.if_tsresol)
                                .ok_or(Error::Generic("Invalid interface timestamp resolution"))?;
                            interfaces.push(InterfaceInfo {
                                link_type: idb.linktype,
                                ts_unit,
                                ts_offset: idb.if_tsoffset,
                                snaplen: idb.snaplen,
                            });
                            Ok(())
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(ref epb)) => {
                            index += 1;
                            let if_info = interfaces
                                .get(epb.if_id as usize)
                                .ok_or(Error::Generic("Enhanced packet with unknown interface"))?;
                            let ts = ng_timestamp(if_info, epb.ts_high, epb.ts_low)?;
                            self.handle_data(if_info, ts, epb.data, epb.caplen, epb.origlen, index)
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(ref spb)) => {
                            index += 1;
                            let if_info = interfaces
                                .first()
                                .ok_or(Error::Generic("Simple packet before interface description"))?;
                            let caplen = std::cmp::min(spb.origlen, if_info.snaplen);
                            let caplen = std::cmp::min(caplen as usize, spb.data.len()) as u32;
                            self.handle_data(if_info, Duration::default(), spb.data, caplen, spb.origlen, index)
                        }
                        PcapBlockOwned::NG(_) => {
                            trace!("ignoring pcap-ng block");
                            Ok(())
                        }
                    };
                    res?;
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    if last_incomplete_index == index && index > 0 {
                        warn!("Could not read complete data block (index={})", index);
                        warn!("Hint: the reader buffer size may be too small, or the input file may be truncated.");
                        break;
                    }
                    last_incomplete_index = index;
                    trace!("need refill");
                    reader.refill().map_err(|e| Error::Pcap(e.to_owned_vec()))?;
                }
                Err(e) => {
                    let e = e.to_owned_vec();
                    error!("error while reading: {:?}", e);
                    return Err(Error::Pcap(e));
                }
            }
        }

        self.analyzer.teardown();
        Ok(())
    }

    fn handle_data(
        &mut self,
        if_info: &InterfaceInfo,
        ts: Duration,
        data: &[u8],
        caplen: u32,
        origlen: u32,
        index: usize,
    ) -> Result<(), Error> {
        let blen = std::cmp::min(caplen as usize, data.len());
        let data = match get_packetdata(data, if_info.link_type, blen) {
            Some(data) => data,
            None => {
                // not an error: the frame will be skipped by classification
                pcap_parser::data::PacketData::Unsupported(&data[..blen])
            }
        };
        let frame = Frame {
            ts,
            data,
            caplen,
            origlen,
            index,
        };
        self.analyzer.handle_frame(&frame)
    }
}

/// Convert a pcap-ng timestamp, shifted by the interface `if_tsoffset`
fn ng_timestamp(if_info: &InterfaceInfo, ts_high: u32, ts_low: u32) -> Result<Duration, Error> {
    let ticks = (u64::from(ts_high) << 32) | u64::from(ts_low);
    let secs = i64::try_from(ticks / if_info.ts_unit)
        .ok()
        .and_then(|secs| secs.checked_add(if_info.ts_offset))
        .and_then(|secs| u32::try_from(secs).ok())
        .ok_or(Error::Generic("Packet timestamp out of range"))?;
    Ok(Duration::from_fraction(secs, ticks % if_info.ts_unit, if_info.ts_unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Collector {
        frames: Vec<(usize, Duration, u32)>,
        torn_down: bool,
    }

    impl FrameAnalyzer for Collector {
        fn handle_frame(&mut self, frame: &Frame) -> Result<(), Error> {
            assert!(frame.network_layer().is_some());
            self.frames.push((frame.index, frame.ts, frame.caplen));
            Ok(())
        }

        fn teardown(&mut self) {
            self.torn_down = true;
        }
    }

    fn legacy_pcap(records: &[(u32, u32, &[u8])]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        v.extend_from_slice(&2u16.to_le_bytes());
        v.extend_from_slice(&4u16.to_le_bytes());
        v.extend_from_slice(&0i32.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(&65535u32.to_le_bytes());
        // LINKTYPE_RAW
        v.extend_from_slice(&101u32.to_le_bytes());
        for (secs, usecs, data) in records {
            v.extend_from_slice(&secs.to_le_bytes());
            v.extend_from_slice(&usecs.to_le_bytes());
            v.extend_from_slice(&(data.len() as u32).to_le_bytes());
            v.extend_from_slice(&(data.len() as u32).to_le_bytes());
            v.extend_from_slice(data);
        }
        v
    }

    #[test]
    fn engine_reads_legacy_pcap() {
        let ip = [0x45u8; 20];
        let input = legacy_pcap(&[(10, 1, &ip), (11, 2, &ip)]);
        let mut engine = PcapFileEngine::new(Collector::default(), &Config::default());
        engine.run(&mut Cursor::new(input)).expect("valid pcap");
        let collector = engine.into_analyzer();
        assert!(collector.torn_down);
        assert_eq!(
            collector.frames,
            vec![(1, Duration::new(10, 1), 20), (2, Duration::new(11, 2), 20)]
        );
    }

    #[test]
    fn engine_rejects_garbage() {
        let mut engine = PcapFileEngine::new(Collector::default(), &Config::default());
        let res = engine.run(&mut Cursor::new(vec![0u8; 64]));
        assert!(matches!(res, Err(Error::Pcap(_))));
    }

    fn ng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
        let len = (12 + body.len()) as u32;
        let mut v = Vec::new();
        v.extend_from_slice(&block_type.to_le_bytes());
        v.extend_from_slice(&len.to_le_bytes());
        v.extend_from_slice(body);
        v.extend_from_slice(&len.to_le_bytes());
        v
    }

    /// Section header, one LINKTYPE_RAW interface and one 20-byte packet
    fn pcapng(if_options: &[u8], ts_low: u32) -> Vec<u8> {
        let mut shb = Vec::new();
        shb.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
        shb.extend_from_slice(&1u16.to_le_bytes());
        shb.extend_from_slice(&0u16.to_le_bytes());
        shb.extend_from_slice(&(-1i64).to_le_bytes());

        let mut idb = Vec::new();
        idb.extend_from_slice(&101u16.to_le_bytes());
        idb.extend_from_slice(&0u16.to_le_bytes());
        idb.extend_from_slice(&65535u32.to_le_bytes());
        idb.extend_from_slice(if_options);
        // opt_endofopt
        idb.extend_from_slice(&[0, 0, 0, 0]);

        let mut epb = Vec::new();
        epb.extend_from_slice(&0u32.to_le_bytes());
        epb.extend_from_slice(&0u32.to_le_bytes());
        epb.extend_from_slice(&ts_low.to_le_bytes());
        epb.extend_from_slice(&20u32.to_le_bytes());
        epb.extend_from_slice(&20u32.to_le_bytes());
        epb.extend_from_slice(&[0x45u8; 20]);

        let mut v = ng_block(0x0a0d_0d0a, &shb);
        v.extend(ng_block(1, &idb));
        v.extend(ng_block(6, &epb));
        v
    }

    fn if_tsoffset(offset: i64) -> Vec<u8> {
        let mut opt = Vec::new();
        opt.extend_from_slice(&14u16.to_le_bytes());
        opt.extend_from_slice(&8u16.to_le_bytes());
        opt.extend_from_slice(&offset.to_le_bytes());
        opt
    }

    #[test]
    fn engine_reads_pcapng_with_offset() {
        let input = pcapng(&if_tsoffset(100), 2_500_000);
        let mut engine = PcapFileEngine::new(Collector::default(), &Config::default());
        engine.run(&mut Cursor::new(input)).expect("valid pcap-ng");
        let collector = engine.into_analyzer();
        assert_eq!(collector.frames, vec![(1, Duration::new(102, 500_000), 20)]);
    }

    #[test]
    fn engine_rejects_timestamp_overflow() {
        let input = pcapng(&if_tsoffset(i64::MAX), 2_000_000);
        let mut engine = PcapFileEngine::new(Collector::default(), &Config::default());
        let res = engine.run(&mut Cursor::new(input));
        assert!(matches!(res, Err(Error::Generic(_))));
        assert!(engine.analyzer().frames.is_empty());

        let input = pcapng(&if_tsoffset(-10), 2_000_000);
        let mut engine = PcapFileEngine::new(Collector::default(), &Config::default());
        assert!(engine.run(&mut Cursor::new(input)).is_err());
    }

    #[test]
    fn engine_rejects_invalid_ts_resolution() {
        // if_tsresol = 10^-30
        let opt = [9u8, 0, 1, 0, 30, 0, 0, 0];
        let input = pcapng(&opt, 0);
        let mut engine = PcapFileEngine::new(Collector::default(), &Config::default());
        assert!(engine.run(&mut Cursor::new(input)).is_err());
        assert!(engine.analyzer().frames.is_empty());
    }
}
