use pcap_parser::PcapError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Generic(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("pcap parsing error: {0:?}")]
    Pcap(PcapError<&'static [u8]>),
    #[error("invalid value '{value}' for configuration key '{key}'")]
    Config { key: String, value: String },
    /// The frame source could not be opened, or failed while reading
    #[error("capture error: {0}")]
    Capture(String),
    /// Submission after the aggregator was closed
    #[error("aggregator is closed")]
    Closed,
}

impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Error::Generic(s)
    }
}

impl From<PcapError<&'static [u8]>> for Error {
    fn from(e: PcapError<&'static [u8]>) -> Self {
        Error::Pcap(e)
    }
}

impl Error {
    pub(crate) fn config<K: Into<String>, V: ToString>(key: K, value: V) -> Self {
        Error::Config {
            key: key.into(),
            value: value.to_string(),
        }
    }
}
