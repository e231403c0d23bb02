use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use pcap_scanner::capture::{FileDiscoverer, ParserBackend};
use pcap_scanner::config::{Config, ConfigOverrides};
use pcap_scanner::formatting::{format_elapsed, format_rate};
use pcap_scanner::report::ReportWriter;
use pcap_scanner::scan::{Orchestrator, RunSummary};
use pcap_scanner::AnalyserPipeline;

#[derive(Parser)]
#[command(name = "pcap-scanner")]
#[command(about = "Batch host and conversation statistics over a directory of pcap files")]
struct Cli {
    #[arg(help = "Directory to scan for capture files")]
    input_dir: Option<PathBuf>,

    #[arg(short, long, help = "Directory the CSV reports are written to")]
    output_dir: Option<PathBuf>,

    #[arg(short, long, help = "Number of files processed in parallel")]
    workers: Option<usize>,

    #[arg(short, long, value_enum, help = "Packet parser backend")]
    parser: Option<ParserBackend>,

    #[arg(short = 't', long, value_name = "SECS", help = "Give up on a single file after this many seconds")]
    file_timeout: Option<u64>,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable debug logging")]
    debug: bool,

    #[arg(long, help = "Print the effective configuration and exit")]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            worker_count: self.workers,
            parser_backend: self.parser,
            file_timeout_secs: self.file_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let base = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    let config = base.merge(cli.overrides());

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    config.validate()?;

    let started = Instant::now();
    let input_dir = config.input_dir()?;
    let files = FileDiscoverer::new()?
        .discover(input_dir)
        .with_context(|| format!("Cannot scan {}", input_dir.display()))?;

    let parser = config.parser_backend.parser();
    let orchestrator = Orchestrator::new(parser, config.worker_count).with_file_timeout(config.file_timeout());

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight files");
            cancel.cancel();
        }
    });

    let pipeline = Arc::new(AnalyserPipeline::with_default_analysers());
    let summary = orchestrator.run(files, Arc::clone(&pipeline)).await;

    let report = ReportWriter::new(&config.output_dir).flush(&pipeline, &summary.ledger);
    print_summary(&summary, started);

    if !report.is_ok() {
        bail!("{} report file(s) could not be written", report.failures.len());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, started: Instant) {
    let elapsed = started.elapsed();
    println!();
    println!("Processing {} pcaps took {}", summary.processed, format_elapsed(elapsed));
    println!(
        "  processed: {}, ignored: {}, skipped: {}",
        summary.processed, summary.failed, summary.skipped
    );
    println!("  records: {} ({})", summary.records, format_rate(summary.records, elapsed));
}
