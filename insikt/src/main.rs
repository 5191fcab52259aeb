#![warn(clippy::all)]

use clap::{crate_version, Parser};
use tracing::{debug, error, info, warn, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use libinsikt::*;

mod report;
use report::{ReportOptions, Reporter};

/// Network traffic statistics monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Capture live on this network interface
    #[cfg(feature = "live")]
    #[arg(short, long)]
    interface: Option<String>,

    /// Ingest queue capacity, in descriptors
    #[arg(long)]
    queue_size: Option<u32>,

    /// Behavior when the ingest queue is full: block or drop
    #[arg(long, value_name = "POLICY")]
    overflow: Option<String>,

    /// Reported packet/byte totals: strict (classified frames) or raw (all frames)
    #[arg(long, value_name = "MODE")]
    counting: Option<String>,

    /// Report interval, in seconds
    #[arg(long)]
    interval: Option<u32>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// Input pcap or pcap-ng file ("-" for stdin)
    input: Option<String>,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("INSIKT_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(level.into()));
    match config.get("log_file") {
        Some(log_file) => {
            let output_dir = config.get("output_dir").unwrap_or(".");
            let file_appender = RollingFileAppender::new(Rotation::NEVER, output_dir, log_file);
            tracing_subscriber::fmt()
                .with_writer(file_appender)
                .with_env_filter(env_filter)
                .with_ansi(false)
                .compact()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(io::stderr)
                .with_env_filter(env_filter)
                .compact()
                .init();
        }
    }
}

fn open_input(input_filename: &str) -> Result<Box<dyn io::Read + Send>, io::Error> {
    if input_filename == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let path = Path::new(input_filename);
    let file = File::open(path)?;
    let reader: Box<dyn io::Read + Send> = if input_filename.ends_with(".gz") {
        Box::new(GzDecoder::new(file))
    } else if input_filename.ends_with(".xz") {
        Box::new(XzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(reader)
}

#[cfg(feature = "live")]
fn run_live(
    interface: &str,
    aggregator: Arc<StatsAggregator>,
    config: &Config,
) -> Result<(), Error> {
    use std::sync::atomic::{AtomicBool, Ordering};

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| Error::Capture(format!("cannot install signal handler: {e}")))?;

    let mut engine = libinsikt_live::create_engine_live(interface, aggregator, config)?;
    info!("capturing on {interface}, press Ctrl-C to stop");
    engine.run(running)
}

fn run_file(
    input_filename: &str,
    aggregator: Arc<StatsAggregator>,
    config: &Config,
) -> Result<(), Error> {
    let mut input_reader = open_input(input_filename)?;
    let pipeline = IngestPipeline::new(aggregator);
    let mut engine = PcapFileEngine::new(pipeline, config);
    engine.run(&mut input_reader)
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        load_config(&mut config, filename)?;
    }
    // override config options from command-line arguments
    if let Some(size) = args.queue_size {
        config.set("queue.capacity", i64::from(size));
    }
    if let Some(policy) = args.overflow.as_ref() {
        config.set("queue.overflow", policy.as_str());
    }
    if let Some(mode) = args.counting.as_ref() {
        config.set("stats.counting", mode.as_str());
    }
    if let Some(secs) = args.interval {
        config.set("report.interval", i64::from(secs));
    }
    if args.json {
        config.set("report.json", true);
    }

    init_logging(&config, args.verbose);
    info!("insikt {}", crate_version!());
    if let Some(filename) = args.config.as_ref() {
        debug!("Loaded configuration {filename}");
    }

    let aggregator_config = AggregatorConfig::from_config(&config)?;
    let mode = CountingMode::from_config(&config)?;
    let options = ReportOptions::from_config(&config)?;
    debug!("{aggregator_config:?}, counting mode {mode}");

    let aggregator = Arc::new(StatsAggregator::new(&aggregator_config)?);
    let reader = SnapshotReader::new(aggregator.clone(), mode);
    let reporter = Reporter::start(reader.clone(), options)?;

    #[cfg(feature = "live")]
    let live_interface = args.interface.clone();
    #[cfg(not(feature = "live"))]
    let live_interface: Option<String> = None;

    let res = match (live_interface, args.input.as_ref()) {
        #[cfg(feature = "live")]
        (Some(interface), _) => run_live(&interface, aggregator.clone(), &config),
        (_, Some(input_filename)) => run_file(input_filename, aggregator.clone(), &config),
        _ => Err(Error::Generic("no input: give an input file or an interface")),
    };

    reporter.stop();
    aggregator.close();
    let last = reader.read();
    if options.json {
        println!("{}", serde_json::to_string(&last).unwrap_or_default());
    } else {
        println!("Final: {last}");
    }

    if let Err(ref e) = res {
        error!("capture failed: {e}");
    } else if last.ingest_drops > 0 {
        warn!("{} descriptors dropped by the ingest queue", last.ingest_drops);
    }
    info!("insikt: done, exiting");
    res
}
