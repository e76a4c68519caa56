use std::path::PathBuf;

use clap::Parser;
use failure::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fpv_trim::config::{AnalysisSize, FallbackPolicy, Normalization, Region};
use fpv_trim::ffmpeg::FfmpegBackend;
use fpv_trim::{scan, BatchRunner, CancelToken, TrimConfig};

#[derive(Parser, Debug)]
#[command(name = "fpv_trim")]
#[command(about = "Cut the idle ground lead-in from FPV drone clips")]
#[command(version)]
struct Args {
    /// Directory holding the clips to trim
    #[arg(short, long, default_value = "input")]
    input: PathBuf,

    /// Directory the trimmed clips are written to
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Analyse every Nth frame
    #[arg(long)]
    stride: Option<u32>,

    /// Resolution used for motion analysis, e.g. 384x216
    #[arg(long)]
    analysis_size: Option<AnalysisSize>,

    /// Seconds at the start of each clip that are never analysed
    #[arg(long)]
    skip_lead_in: Option<f64>,

    /// Intensity that starts a possible takeoff
    #[arg(long)]
    t_high: Option<f64>,

    /// Intensity that must be held while the takeoff is confirmed
    #[arg(long)]
    t_low: Option<f64>,

    /// Samples above the low threshold needed to confirm a takeoff
    #[arg(long)]
    dwell: Option<u32>,

    /// Moving-average window applied to the motion series
    #[arg(long)]
    smoothing: Option<u32>,

    /// Seconds kept before the detected takeoff
    #[arg(long)]
    margin: Option<f64>,

    /// What to do with clips without a detected takeoff
    #[arg(long, value_enum)]
    fallback: Option<FallbackPolicy>,

    /// Region of interest, `full` or LEFT,TOP,RIGHT,BOTTOM fractions
    #[arg(long)]
    region: Option<Region>,

    /// Scale intensities so thresholds carry across resolutions and frame rates
    #[arg(long, value_enum)]
    normalize: Option<Normalization>,

    /// Prefix for output file names
    #[arg(long)]
    prefix: Option<String>,

    /// Detect and report without writing any file
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Log per-frame progress
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Result<TrimConfig, Error> {
        let mut config = match &self.config {
            Some(path) => TrimConfig::from_file(path)?,
            None => TrimConfig::default(),
        };
        if let Some(v) = self.stride {
            config.sampling.stride = v;
        }
        if let Some(v) = self.analysis_size {
            config.sampling.analysis_size = v;
        }
        if let Some(v) = self.skip_lead_in {
            config.sampling.skip_lead_in_secs = v;
        }
        if let Some(v) = self.t_high {
            config.detector.t_high = v;
        }
        if let Some(v) = self.t_low {
            config.detector.t_low = v;
        }
        if let Some(v) = self.dwell {
            config.detector.dwell = v;
        }
        if let Some(v) = self.smoothing {
            config.detector.smoothing_window = v;
        }
        if let Some(v) = self.margin {
            config.planner.margin_secs = v;
        }
        if let Some(v) = self.fallback {
            config.planner.fallback = v;
        }
        if let Some(v) = self.region {
            config.flow.region = v;
        }
        if let Some(v) = self.normalize {
            config.normalize = v;
        }
        if let Some(v) = &self.prefix {
            config.output_prefix = v.clone();
        }
        config.dry_run |= self.dry_run;
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    let default_filter = if args.verbose { "fpv_trim=debug" } else { "fpv_trim=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.to_config()?;
    let jobs = scan::discover_clips(&args.input, &args.output, &config.output_prefix)?;
    if jobs.is_empty() {
        tracing::warn!("no clips found in {}", args.input.display());
        return Ok(());
    }
    if !config.dry_run {
        std::fs::create_dir_all(&args.output)?;
    }

    let cancel = CancelToken::new();
    let interrupted = cancel.clone();
    ctrlc::set_handler(move || {
        if interrupted.is_cancelled() {
            std::process::exit(130);
        }
        tracing::warn!("interrupted, stopping the batch; press Ctrl-C again to exit at once");
        interrupted.cancel();
    })?;

    let backend = FfmpegBackend::new()?;
    let runner = BatchRunner::new(&backend, &config, cancel);
    let report = runner.run(&jobs);

    println!("{}", report.summary());
    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
