use crate::aggregator::{Admission, StatsAggregator};
use crate::analyzer::FrameAnalyzer;
use crate::classifier::{ClassifierStats, FrameClassifier};
use crate::error::Error;
use crate::frame::Frame;
use std::sync::Arc;

/// Producer side of the statistics engine
///
/// Counts every frame in the aggregator capture tally, classifies it, and
/// submits the resulting descriptor to the aggregator.
pub struct IngestPipeline {
    classifier: FrameClassifier,
    aggregator: Arc<StatsAggregator>,
    dropped: u64,
}

impl IngestPipeline {
    pub fn new(aggregator: Arc<StatsAggregator>) -> Self {
        IngestPipeline {
            classifier: FrameClassifier::new(),
            aggregator,
            dropped: 0,
        }
    }

    pub fn classifier_stats(&self) -> &ClassifierStats {
        self.classifier.stats()
    }

    /// Number of descriptors dropped by the ingest queue during this capture
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameAnalyzer for IngestPipeline {
    fn handle_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        self.aggregator.record_capture(frame.caplen);
        if let Some(d) = self.classifier.classify(frame) {
            if self.aggregator.submit(d)? == Admission::Dropped {
                if self.dropped == 0 {
                    warn!("ingest queue full, dropping descriptors");
                }
                self.dropped += 1;
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        let stats = self.classifier.stats();
        debug!(
            "classifier: {} frames accepted, {} skipped ({} unsupported link, {} not IPv4, {} truncated, {} fragments)",
            stats.accepted,
            stats.skipped(),
            stats.unsupported_link,
            stats.not_ipv4,
            stats.truncated,
            stats.fragments
        );
        if self.dropped > 0 {
            warn!("{} descriptors dropped by the ingest queue", self.dropped);
        }
    }
}
