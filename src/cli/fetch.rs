//! `fetch` command: ingest one or more symbols into CSV files

use chrono::Utc;
use clap::Args;
use futures::stream::{self, StreamExt};
use indicatif::MultiProgress;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::progress::ProgressObserver;
use super::time::{parse_days_ago, resolve_range};
use super::{CliError, OutputFormat};
use crate::downloader::config::{
    API_MAX_BARS, DEFAULT_BASE_URL, MAX_RETRIES, POLITENESS_DELAY_MS, RATE_LIMIT_WEIGHT,
};
use crate::downloader::{IngestConfig, IngestJob, IngestReport, PaginationCursorEngine};
use crate::fetcher::http::ReqwestTransport;
use crate::fetcher::RateLimitedRequestExecutor;
use crate::metrics::{init_metrics, MetricsObserver};
use crate::observer::{FanoutObserver, IngestObserver, TracingObserver};
use crate::output::csv::CsvSeriesSink;
use crate::output::OutputError;
use crate::shutdown::SharedShutdown;

/// Maximum allowed concurrency to prevent self-inflicted rate limiting
const MAX_CONCURRENCY: usize = 32;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Arguments for `fetch`
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Trading symbols (repeat or comma-separate for several jobs)
    #[arg(long = "symbol", value_delimiter = ',', default_value = "BTCUSDT")]
    pub symbols: Vec<String>,

    /// Bar interval (1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d, 3d, 1w, 1M)
    #[arg(long, default_value = "1m")]
    pub interval: String,

    /// Start (YYYY-MM-DD or RFC3339)
    #[arg(long)]
    pub start: Option<String>,

    /// Exclusive end (YYYY-MM-DD includes that day, or RFC3339); defaults to now
    #[arg(long)]
    pub end: Option<String>,

    /// Relative range START[,END] in days before now, e.g. 30 or 30,7
    #[arg(long, value_parser = parse_days_ago)]
    pub days_ago: Option<(u32, u32)>,

    /// Output file (single symbol only)
    #[arg(long, conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Output directory; each job writes {SYMBOL}_{interval}.csv (1M as 1mo)
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Discard existing output instead of resuming after its last row
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Number of symbols fetched concurrently (max: 32)
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Maximum number of retries for failed requests (range: 0-20)
    #[arg(long, default_value_t = MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Rows per request (1-1000)
    #[arg(long, default_value_t = API_MAX_BARS, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub max_bars: u32,

    /// Pause between chunks in milliseconds
    #[arg(long, default_value_t = POLITENESS_DELAY_MS)]
    pub politeness_ms: u64,

    /// Request weight budget per minute shared by all jobs
    #[arg(long, default_value_t = RATE_LIMIT_WEIGHT)]
    pub rate_limit_weight: usize,

    /// REST base URL
    #[arg(long, env = "KLINE_BACKFILL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API key forwarded in the X-MBX-APIKEY header
    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Serve Prometheus metrics on this address (e.g. 0.0.0.0:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Hide progress bars
    #[arg(long, short, default_value_t = false)]
    pub quiet: bool,
}

/// One job and where it writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    /// Job
    pub job: IngestJob,
    /// CSV output path
    pub output: PathBuf,
}

/// Result of one planned job
#[derive(Debug)]
pub struct JobOutcome {
    /// Job that ran
    pub planned: PlannedJob,
    /// Report or error
    pub result: Result<IngestReport, CliError>,
}

/// Options shared by every job of a run
#[derive(Clone)]
pub struct RunOptions {
    /// Jobs in flight at once
    pub concurrency: usize,
    /// Truncate outputs instead of resuming
    pub fresh: bool,
    /// Show progress bars
    pub progress: Option<MultiProgress>,
}

/// Default output file name for a job
///
/// `1M` is written as `1mo` so it cannot collide with `1m` on
/// case-insensitive filesystems.
pub fn output_file_name(symbol: &str, interval: &str) -> String {
    let token = match interval {
        "1M" => "1mo",
        other => other,
    };
    format!("{}_{}.csv", symbol.to_uppercase(), token)
}

impl FetchArgs {
    /// Build the shared configuration
    pub fn to_config(&self) -> Result<IngestConfig, CliError> {
        let mut config = IngestConfig {
            base_url: self.base_url.clone(),
            max_bars: self.max_bars,
            politeness_delay: Duration::from_millis(self.politeness_ms),
            api_key: self.api_key.clone().filter(|key| !key.trim().is_empty()),
            ..IngestConfig::default()
        };
        config.retry.max_retries = self.max_retries;
        config.rate_limit.max_weight = self.rate_limit_weight;
        config.validate()?;
        Ok(config)
    }

    /// Expand arguments into jobs and output paths
    pub fn plan(&self) -> Result<Vec<PlannedJob>, CliError> {
        let (start, end) = resolve_range(
            self.start.as_deref(),
            self.end.as_deref(),
            self.days_ago,
            Utc::now(),
        )?;

        let mut symbols: Vec<String> = Vec::new();
        for symbol in &self.symbols {
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return Err(CliError::InvalidArgument("empty symbol".to_string()));
            }
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }

        if self.output.is_some() && symbols.len() > 1 {
            return Err(CliError::InvalidArgument(
                "--output takes a single symbol; use --output-dir for several".to_string(),
            ));
        }

        Ok(symbols
            .into_iter()
            .map(|symbol| {
                let output = match &self.output {
                    Some(path) => path.clone(),
                    None => self
                        .output_dir
                        .join(output_file_name(&symbol, &self.interval)),
                };
                PlannedJob {
                    job: IngestJob::new(symbol, self.interval.clone(), start, end),
                    output,
                }
            })
            .collect())
    }

    /// Execute the fetch command
    pub async fn execute(
        &self,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<(), CliError> {
        let config = Arc::new(self.to_config()?);
        let planned = self.plan()?;

        let mut fanout = FanoutObserver::new().with(Arc::new(TracingObserver));
        if let Some(addr) = self.metrics_addr {
            init_metrics(addr)?;
            fanout = fanout.with(Arc::new(MetricsObserver));
        }
        let observer: Arc<dyn IngestObserver> = Arc::new(fanout);

        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let executor = Arc::new(RateLimitedRequestExecutor::new(
            transport,
            config.clone(),
            observer.clone(),
        ));

        info!(
            "Fetching {} job(s) of {} with concurrency {}",
            planned.len(),
            self.interval,
            self.concurrency
        );

        let options = RunOptions {
            concurrency: self.concurrency,
            fresh: self.fresh,
            progress: (!self.quiet).then(MultiProgress::new),
        };
        let outcomes = run_jobs(planned, executor, config, observer, shutdown, options).await;

        let total = outcomes.len();
        let mut failed = 0;
        for outcome in &outcomes {
            match format {
                OutputFormat::Json => print_json(outcome),
                OutputFormat::Human => print_human(outcome),
            }
            if outcome.result.is_err() {
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(CliError::JobsFailed { failed, total });
        }
        Ok(())
    }
}

/// Run planned jobs concurrently against one shared executor.
///
/// Each job opens its own sink (resuming unless `fresh`) and gets its own engine;
/// only the executor, and with it the rate-limit budget, is shared.
pub async fn run_jobs(
    planned: Vec<PlannedJob>,
    executor: Arc<RateLimitedRequestExecutor>,
    config: Arc<IngestConfig>,
    observer: Arc<dyn IngestObserver>,
    shutdown: SharedShutdown,
    options: RunOptions,
) -> Vec<JobOutcome> {
    let concurrency = options.concurrency.max(1);

    stream::iter(planned)
        .map(|planned| {
            let executor = executor.clone();
            let config = config.clone();
            let observer = observer.clone();
            let shutdown = shutdown.clone();
            let options = options.clone();

            async move {
                let progress = match &options.progress {
                    Some(multi) => {
                        ProgressObserver::new(multi, &planned.job.symbol, &planned.job.interval)
                    }
                    None => ProgressObserver::hidden(),
                };
                let job_observer: Arc<dyn IngestObserver> =
                    Arc::new(FanoutObserver::new().with(observer).with(Arc::new(progress)));
                let engine = PaginationCursorEngine::new(executor, config, job_observer)
                    .with_shutdown(shutdown);

                let result = run_one(&engine, &planned, options.fresh).await;
                JobOutcome { planned, result }
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await
}

async fn run_one(
    engine: &PaginationCursorEngine,
    planned: &PlannedJob,
    fresh: bool,
) -> Result<IngestReport, CliError> {
    // Bad jobs must not leave an empty output behind
    planned.job.validate()?;
    let mut sink = open_sink(&planned.output, fresh)?;
    let report = engine.run(&planned.job, &mut sink).await?;
    Ok(report)
}

fn open_sink(path: &Path, fresh: bool) -> Result<CsvSeriesSink, OutputError> {
    if fresh {
        CsvSeriesSink::create(path)
    } else {
        CsvSeriesSink::open(path)
    }
}

fn print_json(outcome: &JobOutcome) {
    let job = &outcome.planned.job;
    let output = match &outcome.result {
        Ok(report) => serde_json::json!({
            "success": true,
            "symbol": report.symbol,
            "interval": report.interval,
            "output_path": outcome.planned.output.display().to_string(),
            "effective_start": report.effective_start,
            "candles_ingested": report.candles_ingested,
            "requests": report.requests,
            "final_cursor": report.final_cursor,
            "end_reason": report.end_reason,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "symbol": job.symbol,
            "interval": job.interval,
            "output_path": outcome.planned.output.display().to_string(),
            "error": e.to_string(),
            "window": window_of(e).map(|w| [w.start, w.end]),
        }),
    };
    println!("{output}");
}

fn print_human(outcome: &JobOutcome) {
    let job = &outcome.planned.job;
    match &outcome.result {
        Ok(report) => {
            println!("\n{} {} completed: {}", report.symbol, report.interval, report.end_reason);
            println!("Output: {}", outcome.planned.output.display());
            println!("Candles ingested: {}", report.candles_ingested);
            println!("Requests: {}", report.requests);
        }
        Err(e) => {
            eprintln!("\n{} {} failed!", job.symbol, job.interval);
            eprintln!("Error: {e}");
            eprintln!("Re-run the same command to resume after the last persisted row.");
            error!(symbol = %job.symbol, "Fetch failed: {}", e);
        }
    }
}

fn window_of(error: &CliError) -> Option<crate::FetchWindow> {
    match error {
        CliError::IngestError(e) => e.window(),
        _ => None,
    }
}
