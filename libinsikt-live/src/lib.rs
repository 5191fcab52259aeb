use std::sync::Arc;

use libinsikt::{Config, Error, IngestPipeline, StatsAggregator};

pub use crate::data_engine::{PcapLiveDataEngine, DEFAULT_SNAPLEN};

mod data_engine;

/// Open `interface_name` and build a live engine feeding `aggregator`
pub fn create_engine_live(
    interface_name: &str,
    aggregator: Arc<StatsAggregator>,
    config: &Config,
) -> Result<PcapLiveDataEngine<IngestPipeline>, Error> {
    let pipeline = IngestPipeline::new(aggregator);
    PcapLiveDataEngine::new(interface_name, pipeline, config)
}
