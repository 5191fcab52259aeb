use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use libinsikt::{Config, Error, Snapshot, SnapshotReader};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Reference export cadence, in seconds
pub const DEFAULT_REPORT_INTERVAL: u64 = 10;

#[derive(Clone, Copy, Debug)]
pub struct ReportOptions {
    pub interval: Duration,
    pub json: bool,
}

impl ReportOptions {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let secs = config
            .get_usize("report.interval")
            .unwrap_or(DEFAULT_REPORT_INTERVAL as usize) as u64;
        if secs == 0 {
            return Err(Error::Config {
                key: "report.interval".to_owned(),
                value: secs.to_string(),
            });
        }
        Ok(ReportOptions {
            interval: Duration::from_secs(secs),
            json: config.get_bool("report.json").unwrap_or(false),
        })
    }
}

/// Format one report line: cumulative values, and counter increase over the interval
pub fn format_report(current: &Snapshot, previous: &Snapshot, json: bool) -> String {
    let delta = current.since(previous);
    if json {
        serde_json::json!({
            "total": current,
            "interval": delta,
        })
        .to_string()
    } else {
        format!(
            "Processed {} packets, {} bytes (+{} packets, +{} bytes). Unique IPs: {}, Unique Ports: {}, Packet Drops: {}, Ingest Drops: {}",
            current.total_packets,
            current.total_bytes,
            delta.total_packets,
            delta.total_bytes,
            current.unique_ips,
            current.unique_ports,
            current.packet_drops,
            current.ingest_drops
        )
    }
}

/// Periodic snapshot printer, running in its own thread
pub struct Reporter {
    stop: Sender<()>,
    handler: thread::JoinHandle<()>,
}

impl Reporter {
    pub fn start(reader: SnapshotReader, options: ReportOptions) -> Result<Self, Error> {
        let (stop, stopped) = bounded::<()>(1);
        let handler = thread::Builder::new()
            .name("reporter".to_owned())
            .spawn(move || {
                debug!("reporter starting, interval {:?}", options.interval);
                let mut previous = Snapshot::default();
                loop {
                    match stopped.recv_timeout(options.interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let current = reader.read();
                            let line = format_report(&current, &previous, options.json);
                            info!("{}", line);
                            println!("{line}");
                            previous = current;
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("reporter exiting");
            })?;
        Ok(Reporter { stop, handler })
    }

    pub fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handler.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_line() {
        let previous = Snapshot {
            total_packets: 10,
            total_bytes: 1000,
            ..Snapshot::default()
        };
        let current = Snapshot {
            total_packets: 12,
            total_bytes: 1500,
            unique_ips: 3,
            unique_ports: 4,
            packet_drops: 1,
            ..Snapshot::default()
        };
        let line = format_report(&current, &previous, false);
        assert_eq!(
            line,
            "Processed 12 packets, 1500 bytes (+2 packets, +500 bytes). Unique IPs: 3, Unique Ports: 4, Packet Drops: 1, Ingest Drops: 0"
        );
        let v: serde_json::Value =
            serde_json::from_str(&format_report(&current, &previous, true)).expect("json");
        assert_eq!(v["total"]["unique_ips"], 3);
        assert_eq!(v["interval"]["total_bytes"], 500);
    }

    #[test]
    fn report_options() {
        let mut config = Config::default();
        let options = ReportOptions::from_config(&config).expect("defaults");
        assert_eq!(options.interval, Duration::from_secs(10));
        assert!(!options.json);
        config.set("report.interval", 0);
        assert!(ReportOptions::from_config(&config).is_err());
    }
}
