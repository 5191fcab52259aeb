use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use libinsikt::pcap_parser::{self, Linktype};
use libinsikt::{Config, Duration, Error, Frame, FrameAnalyzer};
use pcap::{Active, Capture, Precision};
use tracing::{debug, info, trace};

/// Snap length of the reference capture
pub const DEFAULT_SNAPLEN: usize = 1600;

fn capture_error(e: pcap::Error) -> Error {
    Error::Capture(e.to_string())
}

/// Live capture on a network interface
///
/// Frames are read in non-blocking mode and handed to the analyzer until
/// the `running` flag is cleared.
pub struct PcapLiveDataEngine<A: FrameAnalyzer> {
    analyzer: A,

    interface: String,
    cap: Capture<Active>,
    link_type: Linktype,
    precision: Precision,
    sleep_interval: u64,
}

impl<A: FrameAnalyzer> PcapLiveDataEngine<A> {
    pub fn new(interface_name: &str, analyzer: A, config: &Config) -> Result<Self, Error> {
        let interfaces = pcap::Device::list().map_err(|e| {
            Error::Capture(format!(
                "could not list network interfaces: {e} (are you running with CAP_NET_RAW?)"
            ))
        })?;

        let immediate = config.get_bool("live.immediate").unwrap_or(true);
        let precision = match config.get("live.precision") {
            None | Some("micro") => Precision::Micro,
            Some("nano") => Precision::Nano,
            Some(s) => {
                return Err(Error::Config {
                    key: "live.precision".to_owned(),
                    value: s.to_owned(),
                })
            }
        };
        let promisc = config.get_bool("live.promisc").unwrap_or(false);
        let snaplen = config.get_usize("live.snaplen").unwrap_or(DEFAULT_SNAPLEN);
        let snaplen = i32::try_from(snaplen).map_err(|_| Error::Config {
            key: "live.snaplen".to_owned(),
            value: snaplen.to_string(),
        })?;
        let sleep_interval = config.get_usize("live.sleep").unwrap_or(500) as u64;

        let dev = interfaces
            .into_iter()
            .find(|iface| iface.name == interface_name)
            .ok_or_else(|| Error::Capture(format!("no such interface: {interface_name}")))?;

        let cap = Capture::from_device(dev)
            .map_err(capture_error)?
            .immediate_mode(immediate)
            .promisc(promisc)
            .snaplen(snaplen)
            .precision(precision);
        let cap = cap
            .open()
            .map_err(capture_error)?
            .setnonblock()
            .map_err(capture_error)?;

        // convert from `pcap` crate format to `pcap_parser` format
        let link_type = Linktype(cap.get_datalink().0);
        debug!("Live mode: capturing on {interface_name}, link type {link_type}");

        Ok(PcapLiveDataEngine {
            analyzer,
            interface: interface_name.to_owned(),
            cap,
            link_type,
            precision,
            sleep_interval,
        })
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

    /// Capture frames until `running` is cleared.
    ///
    /// A read error other than a timeout ends the capture session and is
    /// returned.
    pub fn run(&mut self, running: Arc<AtomicBool>) -> Result<(), Error> {
        debug!("Live mode: waiting for packets");
        self.analyzer.init()?;
        let mut index = 0;
        let res = loop {
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }
            match self.cap.next_packet() {
                Ok(packet) => {
                    index += 1;
                    let header = packet.header;
                    let ts_sec = header.ts.tv_sec as u32;
                    let ts = if self.precision == Precision::Micro {
                        Duration::new(ts_sec, header.ts.tv_usec as u32)
                    } else {
                        Duration::new(ts_sec, header.ts.tv_usec as u32 / 1000)
                    };
                    let blen = std::cmp::min(header.caplen as usize, packet.data.len());
                    let data = pcap_parser::data::get_packetdata(packet.data, self.link_type, blen)
                        .unwrap_or(pcap_parser::data::PacketData::Unsupported(&packet.data[..blen]));
                    let frame = Frame {
                        ts,
                        data,
                        caplen: header.caplen,
                        origlen: header.len,
                        index,
                    };
                    trace!("Live: frame {}, time {}.{:06}", index, ts.secs, ts.micros);
                    if let Err(e) = self.analyzer.handle_frame(&frame) {
                        break Err(e);
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {
                    thread::sleep(StdDuration::from_micros(self.sleep_interval));
                }
                Err(e) => {
                    debug!("Live mode: getting next packet failed: {e:?}");
                    break Err(capture_error(e));
                }
            }
        };

        if let Ok(stats) = self.cap.stats() {
            info!(
                "capture on {}: {} received, {} dropped by kernel, {} dropped by interface",
                self.interface, stats.received, stats.dropped, stats.if_dropped
            );
        }
        self.analyzer.teardown();
        res
    }
}
