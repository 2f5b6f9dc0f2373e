//! CLI entry point for the delivery time analytics job.
//!
//! `analyze` runs the full pipeline once over the given exports and writes
//! results into the output directory; `inspect` reloads a previously written
//! statistics table.

use anyhow::Result;
use clap::{Parser, Subcommand};
use delivery_time_analytics::config::{
    AggregatorConfig, AnalysisConfig, CalculatorConfig, ChartStyle, ColumnMap, Dimension,
    DurationUnit, Granularity, LoaderConfig, StdDevKind, WriterConfig,
};
use delivery_time_analytics::output::{print_json, read_group_table};
use delivery_time_analytics::pipeline::run;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "delivery_time_analytics")]
#[command(about = "Delivery duration statistics and charts from delivery exports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load delivery exports, aggregate durations and write results
    Analyze(AnalyzeArgs),
    /// Print a previously written statistics table
    Inspect {
        /// Path to a duration_stats.csv file
        #[arg(value_name = "TABLE")]
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct AnalyzeArgs {
    /// CSV exports to read (`.csv` or `.csv.gz`), concatenated in order
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Directory results are written to
    #[arg(short, long, env = "DELIVERY_OUTPUT_DIR", default_value = "results")]
    output_dir: PathBuf,

    /// Time bucket width
    #[arg(short, long, value_enum, env = "DELIVERY_GRANULARITY", default_value_t = Granularity::Day)]
    granularity: Granularity,

    /// Categorical columns to group by (comma separated)
    #[arg(long, value_enum, value_delimiter = ',')]
    group_by: Vec<Dimension>,

    /// Percentiles to report (comma separated, each in (0, 100])
    #[arg(short, long, value_delimiter = ',', default_value = "90")]
    percentiles: Vec<f64>,

    /// Unit durations are reported in
    #[arg(short, long, value_enum, default_value_t = DurationUnit::Hours)]
    unit: DurationUnit,

    /// Use sample (n - 1) instead of population standard deviation
    #[arg(long, default_value_t = false)]
    sample_stddev: bool,

    /// Abort on the first delivery that completed before it was placed
    #[arg(long, env = "DELIVERY_STRICT", default_value_t = false)]
    strict: bool,

    /// Largest tolerated share of unparseable rows before the run fails
    #[arg(long, default_value_t = 1.0)]
    max_skip_ratio: f64,

    /// Durations at or below this value (in --unit) count as on time
    #[arg(long)]
    on_time_threshold: Option<f64>,

    /// Also write the per-delivery audit table
    #[arg(long, default_value_t = false)]
    keep_records: bool,

    #[arg(long, default_value_t = 1200)]
    chart_width: u32,

    #[arg(long, default_value_t = 600)]
    chart_height: u32,

    #[arg(long, default_value = "delivery_id")]
    id_column: String,

    #[arg(long, default_value = "placed_at")]
    placed_column: String,

    #[arg(long, default_value = "delivered_at")]
    completed_column: String,

    #[arg(long, default_value = "carrier")]
    carrier_column: String,

    #[arg(long, default_value = "region")]
    region_column: String,

    #[arg(long, default_value = "product_class")]
    product_class_column: String,
}

impl From<AnalyzeArgs> for AnalysisConfig {
    fn from(args: AnalyzeArgs) -> Self {
        AnalysisConfig {
            loader: LoaderConfig {
                inputs: args.inputs,
                columns: ColumnMap {
                    id: args.id_column,
                    placed: args.placed_column,
                    completed: args.completed_column,
                    carrier: args.carrier_column,
                    region: args.region_column,
                    product_class: args.product_class_column,
                },
                required_dimensions: args.group_by.clone(),
                max_skip_ratio: args.max_skip_ratio,
            },
            calculator: CalculatorConfig {
                unit: args.unit,
                granularity: args.granularity,
                strict: args.strict,
            },
            aggregator: AggregatorConfig {
                granularity: args.granularity,
                dimensions: args.group_by,
                percentiles: args.percentiles,
                std_dev: if args.sample_stddev {
                    StdDevKind::Sample
                } else {
                    StdDevKind::Population
                },
                on_time_threshold: args.on_time_threshold,
            },
            chart: ChartStyle {
                width: args.chart_width,
                height: args.chart_height,
                unit: args.unit,
                ..Default::default()
            },
            writer: WriterConfig {
                output_dir: args.output_dir,
                keep_records: args.keep_records,
            },
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/delivery_time.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("delivery_time.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => {
            let config = AnalysisConfig::from(args);
            let summary = run(&config)?;
            print_json(&summary)?;
        }
        Commands::Inspect { path } => {
            let table = read_group_table(&path)?;
            info!(
                groups = table.groups.len(),
                dimensions = ?table.dimensions,
                "Statistics table loaded"
            );
            for group in &table.groups {
                info!(
                    bucket = %group.key.bucket_start,
                    group = %group.key.category_label(),
                    count = group.stats.count,
                    mean = group.stats.mean,
                    median = group.stats.median,
                    stddev = group.stats.std_dev,
                    "Group"
                );
            }
        }
    }

    Ok(())
}
