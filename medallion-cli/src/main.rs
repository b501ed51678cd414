//! Medallion CLI — drive the Bronze → Silver → Gold pipeline from the shell.
//!
//! Commands:
//! - `ingest`: store raw bars as an immutable Bronze batch
//! - `process`: ingest then Silver and Gold over every row
//! - `train`: leakage-free train/test tensors for one or more symbols
//! - `infer`: latest normalized window using saved training parameters
//! - `validate`: dry-run quality report, nothing persisted
//! - `lineage`: print lineage records by run id or symbol
//! - `demo`: 120 synthetic `DEMO` bars with one null close, end to end

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use medallion_core::{FeatureContract, Frame, PipelineConfig};
use medallion_pipeline::{
    init_tracing, read_csv, CsvSource, MarketDataSource, Pipeline, PipelineLineage,
    ProcessOptions, SyntheticSource, TrainingInput,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "medallion",
    about = "Medallion — layered Bronze/Silver/Gold feature pipeline"
)]
struct Cli {
    /// Pipeline config (TOML). Without it every root lives under --data-dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory used when no --config is given.
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store raw bars as an immutable Bronze batch.
    Ingest {
        #[arg(long)]
        symbol: String,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Ingest, clean, enrich and build a Gold tensor over every row.
    Process {
        #[arg(long)]
        symbol: String,
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        contract: ContractArgs,
        /// Fail when the raw quality verdict fails.
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Reuse the current normalization instead of fitting a new version.
        #[arg(long, default_value_t = false)]
        no_fit: bool,
    },
    /// Build train/test tensors; parameters are fit on the train rows only.
    Train {
        /// Symbols to train on (e.g., SPY QQQ).
        #[arg(required = true)]
        symbols: Vec<String>,
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        contract: ContractArgs,
        /// Fraction of rows in the train partition. Defaults to the config value.
        #[arg(long)]
        ratio: Option<f64>,
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Latest normalized window for live prediction.
    Infer {
        #[arg(long)]
        symbol: String,
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        contract: ContractArgs,
    },
    /// Print a quality report for the input without persisting anything.
    Validate {
        #[arg(long)]
        symbol: String,
        #[command(flatten)]
        input: InputArgs,
    },
    /// Print lineage records.
    Lineage {
        /// One run.
        #[arg(long, conflicts_with = "symbol")]
        run_id: Option<String>,
        /// Every run for a symbol.
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Run the 120-bar DEMO scenario end to end.
    Demo {
        /// Window length of the demo contract.
        #[arg(long, default_value_t = 60)]
        sequence_length: usize,
    },
}

/// Where raw bars come from.
#[derive(Args)]
struct InputArgs {
    /// A single CSV file (date,open,high,low,close,volume).
    #[arg(long, conflicts_with_all = ["csv_dir", "synthetic"])]
    csv: Option<PathBuf>,

    /// Directory of {SYMBOL}.csv files.
    #[arg(long, conflicts_with = "synthetic")]
    csv_dir: Option<PathBuf>,

    /// Generate a deterministic random walk instead of reading files.
    #[arg(long, default_value_t = false)]
    synthetic: bool,

    /// Number of synthetic bars.
    #[arg(long, default_value_t = 250)]
    bars: usize,

    /// Start date (YYYY-MM-DD). Defaults to 2020-01-01.
    #[arg(long)]
    start: Option<String>,

    /// End date for --csv-dir (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,
}

#[derive(Args)]
struct ContractArgs {
    /// Contract from the config, as `name` or `name@version`. Without it the
    /// standard feature set is used.
    #[arg(long)]
    contract: Option<String>,

    /// Window length for the standard contract.
    #[arg(long, default_value_t = 60)]
    sequence_length: usize,
}

fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Ingest { symbol, input } => run_ingest(&config, &symbol, &input),
        Commands::Process {
            symbol,
            input,
            contract,
            strict,
            no_fit,
        } => {
            let options = ProcessOptions {
                strict,
                fit_normalization: !no_fit,
            };
            run_process(&config, &symbol, &input, &contract, options)
        }
        Commands::Train {
            symbols,
            input,
            contract,
            ratio,
            strict,
        } => run_train(&config, &symbols, &input, &contract, ratio, strict),
        Commands::Infer {
            symbol,
            input,
            contract,
        } => run_infer(&config, &symbol, &input, &contract),
        Commands::Validate { symbol, input } => run_validate(&config, &symbol, &input),
        Commands::Lineage { run_id, symbol } => run_lineage(&config, run_id, symbol),
        Commands::Demo { sequence_length } => run_demo(&config, sequence_length),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::rooted_at(&cli.data_dir)),
    }
}

fn open_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    Pipeline::open(config).context("failed to open pipeline storage")
}

fn parse_date(value: Option<&str>, default: NaiveDate) -> Result<NaiveDate> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("dates must be YYYY-MM-DD")
        .map(|d| d.unwrap_or(default))
}

/// Rows for `symbol` and the source label to record.
fn load_rows(symbol: &str, input: &InputArgs) -> Result<(Frame, String)> {
    let default_start = NaiveDate::from_ymd_opt(2020, 1, 1).context("invalid default start")?;
    let start = parse_date(input.start.as_deref(), default_start)?;

    if let Some(path) = &input.csv {
        let rows = read_csv(path).with_context(|| format!("failed to read {}", path.display()))?;
        return Ok((rows, "csv".into()));
    }
    if let Some(dir) = &input.csv_dir {
        let end = parse_date(input.end.as_deref(), chrono::Local::now().date_naive())?;
        let source = CsvSource::new(dir);
        let rows = source
            .fetch(symbol, start, end)
            .with_context(|| format!("failed to load {symbol} from {}", dir.display()))?;
        return Ok((rows, source.name().to_string()));
    }
    if input.synthetic {
        let source = SyntheticSource::default();
        return Ok((source.generate(symbol, start, input.bars), source.name().to_string()));
    }
    bail!("one of --csv, --csv-dir or --synthetic is required");
}

fn resolve_contract(config: &PipelineConfig, args: &ContractArgs) -> Result<FeatureContract> {
    match &args.contract {
        Some(key) => config
            .contract(key)
            .cloned()
            .with_context(|| format!("contract '{key}' is not defined in the config")),
        None => {
            let contract = FeatureContract::standard("standard", args.sequence_length);
            contract.validate()?;
            Ok(contract)
        }
    }
}

fn run_ingest(config: &PipelineConfig, symbol: &str, input: &InputArgs) -> Result<()> {
    let (rows, source) = load_rows(symbol, input)?;
    let pipeline = open_pipeline(config)?;
    let batch = pipeline
        .bronze()
        .ingest(symbol, &rows, &source)
        .with_context(|| format!("failed to ingest {symbol}"))?;

    println!("Bronze batch: {}", batch.batch_id);
    println!("Rows:         {}", batch.row_count);
    println!("Span:         {} to {}", batch.start_date, batch.end_date);
    println!("Checksum:     {}", batch.checksum);
    Ok(())
}

fn run_process(
    config: &PipelineConfig,
    symbol: &str,
    input: &InputArgs,
    contract: &ContractArgs,
    options: ProcessOptions,
) -> Result<()> {
    let (rows, source) = load_rows(symbol, input)?;
    let contract = resolve_contract(config, contract)?;
    let pipeline = open_pipeline(config)?;
    let (_, record) = pipeline
        .process_full(symbol, &rows, &source, &contract, options)
        .with_context(|| format!("full run failed for {symbol}"))?;
    print_lineage(&record);
    Ok(())
}

fn run_train(
    config: &PipelineConfig,
    symbols: &[String],
    input: &InputArgs,
    contract: &ContractArgs,
    ratio: Option<f64>,
    strict: bool,
) -> Result<()> {
    let contract = resolve_contract(config, contract)?;
    let ratio = ratio.unwrap_or(config.gold.default_train_ratio);

    let mut inputs = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let (rows, source) = load_rows(symbol, input)?;
        inputs.push(TrainingInput {
            symbol: symbol.clone(),
            source,
            rows,
        });
    }

    let pipeline = open_pipeline(config)?;
    let set = pipeline
        .get_training_ready(&inputs, ratio, &contract, strict)
        .context("training run failed")?;

    println!("Contract:     {}", contract.id());
    println!("Train tensor: {:?}", set.train.shape());
    println!("Test tensor:  {:?}", set.test.shape());
    if !set.skipped.is_empty() {
        println!("Skipped (insufficient history): {}", set.skipped.join(", "));
    }
    for record in &set.runs {
        println!();
        print_lineage(record);
    }
    Ok(())
}

fn run_infer(
    config: &PipelineConfig,
    symbol: &str,
    input: &InputArgs,
    contract: &ContractArgs,
) -> Result<()> {
    let (rows, source) = load_rows(symbol, input)?;
    let contract = resolve_contract(config, contract)?;
    let pipeline = open_pipeline(config)?;
    match pipeline
        .get_inference_ready(symbol, &rows, &source, &contract)
        .with_context(|| format!("inference failed for {symbol}"))?
    {
        Some((tensor, record)) => {
            println!("Inference tensor: {:?}", tensor.shape());
            print_lineage(&record);
        }
        None => println!(
            "Not enough history for {symbol}: {} rows, contract needs {}",
            rows.len(),
            contract.sequence_length
        ),
    }
    Ok(())
}

fn run_validate(config: &PipelineConfig, symbol: &str, input: &InputArgs) -> Result<()> {
    let (rows, _) = load_rows(symbol, input)?;
    let pipeline = open_pipeline(config)?;
    let report = pipeline.validate_data(symbol, &rows)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.passed {
        std::process::exit(2);
    }
    Ok(())
}

fn run_lineage(
    config: &PipelineConfig,
    run_id: Option<String>,
    symbol: Option<String>,
) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let records = match (run_id, symbol) {
        (Some(id), _) => match pipeline.lineage(&id)? {
            Some(record) => vec![record],
            None => bail!("no lineage record for run {id}"),
        },
        (None, Some(symbol)) => pipeline.lineage_for_symbol(&symbol)?,
        (None, None) => pipeline.lineage_log().read_all()?,
    };
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

fn run_demo(config: &PipelineConfig, sequence_length: usize) -> Result<()> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).context("invalid demo start")?;
    let mut rows = SyntheticSource::default().generate("DEMO", start, 120);
    let mut close = rows.column("close").map(<[_]>::to_vec).unwrap_or_default();
    if let Some(cell) = close.get_mut(70) {
        *cell = None;
    }
    rows.set_column("close", close)?;

    let contract = FeatureContract::standard("demo", sequence_length);
    let pipeline = open_pipeline(config)?;
    let (tensor, record) = pipeline
        .process_full("DEMO", &rows, "synthetic", &contract, ProcessOptions::default())
        .context("demo run failed")?;

    println!("Gold tensor: {:?}", tensor.shape());
    print_lineage(&record);
    Ok(())
}

fn print_lineage(record: &PipelineLineage) {
    println!("Run:          {} ({})", record.run_id, record.kind.as_str());
    println!("Symbol:       {} from {}", record.symbol, record.source);
    println!("Bronze:       {} ({} rows)", record.bronze_batch_id, record.bronze_rows);
    println!("Silver:       {} ({} rows)", record.silver_batch_id, record.silver_rows);
    println!("Gold:         {}", record.gold_batch_id);
    println!("Quality:      {:.4}", record.quality_score);
    println!("Contract:     {} (normalization v{})", record.contract, record.normalization_version);
    println!("Shape:        {:?}", record.tensor_shape);
    if let Some(test) = record.test_shape {
        println!("Test shape:   {test:?}");
    }
    println!("Latency:      {} ms", record.latency_ms);
    for issue in &record.issues {
        println!("  issue: {issue}");
    }
}
