//! Ergo Flux CLI - command-line job runner for Ergo Flux
//!
//! Commands:
//! - score: run the pipeline and scoring over a recorded series
//! - config: print the effective configuration as TOML
//! - stages: list registered stages and their default parameters
//! - cache-key: print the cache keys a run would use
//! - cache-delete: remove a cached pipeline result

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ergo_flux::pipeline::Pipeline;
use ergo_flux::{
    ErgoConfig, ErgoError, ErgoProcessor, FileStore, ResultCache, Series, SeriesRecord, StageKind,
    StageRegistry, ERGO_VERSION,
};

/// Ergo Flux - ergonomic-risk scoring for wearable orientation data
#[derive(Parser)]
#[command(name = "ergo-flux")]
#[command(version = ERGO_VERSION)]
#[command(about = "Score wearable orientation data for ergonomic risk", long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and scoring over a recorded series
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "payload")]
        output_format: OutputFormat,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured device id
        #[arg(long)]
        device_id: Option<String>,

        /// Directory of the result cache
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Configuration file to validate and print
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List registered stages and their default parameters
    Stages,

    /// Print the cache keys a run would use
    CacheKey {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input file to fingerprint for the run key
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,
    },

    /// Remove a cached pipeline result
    CacheDelete {
        #[arg(long)]
        cache_dir: PathBuf,

        /// Run key to delete
        #[arg(long)]
        key: String,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Flat key/value payload
    Payload,
    /// Full report as JSON
    Json,
    /// Full report as pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ergo_flux=debug" } else { "ergo_flux=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), ErgoCliError> {
    match cli.command {
        Commands::Score {
            input,
            output,
            input_format,
            output_format,
            config,
            device_id,
            cache_dir,
        } => cmd_score(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            device_id,
            cache_dir.as_deref(),
        ),

        Commands::Config { config } => {
            print!("{}", load_config(config.as_deref())?.to_toml()?);
            Ok(())
        }

        Commands::Stages => cmd_stages(),

        Commands::CacheKey {
            config,
            input,
            input_format,
        } => cmd_cache_key(config.as_deref(), input.as_deref(), input_format),

        Commands::CacheDelete { cache_dir, key } => {
            let mut cache = ResultCache::new(FileStore::new(cache_dir)?);
            if !cache.delete(&key)? {
                return Err(ErgoCliError::CacheMiss(key));
            }
            println!("{key}");
            Ok(())
        }
    }
}

fn cmd_score(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&Path>,
    device_id: Option<String>,
    cache_dir: Option<&Path>,
) -> Result<(), ErgoCliError> {
    let mut config = load_config(config)?;
    if let Some(device_id) = device_id {
        config.pipeline.device_id = device_id;
    }

    let series = read_series(input, &input_format)?;

    let mut processor = ErgoProcessor::new(config)?;
    if let Some(dir) = cache_dir {
        processor = processor.with_cache(ResultCache::new(FileStore::new(dir)?));
    }
    let report = processor.process(Some(&series))?;

    let rendered = match output_format {
        OutputFormat::Payload => serde_json::to_string(&report.to_payload())?,
        OutputFormat::Json => serde_json::to_string(&report)?,
        OutputFormat::JsonPretty => report.to_json()?,
    };

    if output.to_string_lossy() == "-" {
        println!("{rendered}");
    } else {
        fs::write(output, rendered + "\n")?;
    }
    Ok(())
}

fn cmd_stages() -> Result<(), ErgoCliError> {
    let registry = StageRegistry::builtin();
    let listing: serde_json::Map<String, serde_json::Value> = registry
        .identifiers()
        .into_iter()
        .map(|id| -> Result<_, ErgoError> {
            let kind: StageKind = id.parse()?;
            Ok((id.to_string(), serde_json::to_value(kind.default_params())?))
        })
        .collect::<Result<_, _>>()?;
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn cmd_cache_key(
    config: Option<&Path>,
    input: Option<&Path>,
    input_format: InputFormat,
) -> Result<(), ErgoCliError> {
    let config = load_config(config)?;
    let pipeline = Pipeline::from_config(
        config.sampling.clone(),
        &config.pipeline,
        &StageRegistry::builtin(),
    )?;

    let series = input.map(|path| read_series(path, &input_format)).transpose()?;
    let keys = serde_json::json!({
        "config_key": pipeline.cache_key()?,
        "run_key": pipeline.cache_key_for(series.as_ref())?,
        "reproducible": config.sampling.is_reproducible(),
    });
    println!("{}", serde_json::to_string_pretty(&keys)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ErgoConfig, ErgoCliError> {
    match path {
        Some(path) => Ok(ErgoConfig::load(path)?),
        None => Ok(ErgoConfig::default()),
    }
}

fn read_series(input: &Path, format: &InputFormat) -> Result<Series, ErgoCliError> {
    let data = if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(ErgoCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let records: Vec<SeriesRecord> = match format {
        InputFormat::Ndjson => data
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?,
        InputFormat::Json => serde_json::from_str(&data)?,
    };

    if records.is_empty() {
        return Err(ErgoCliError::NoRecords);
    }
    Ok(Series::from_records(records)?)
}

// Error handling

#[derive(Debug)]
enum ErgoCliError {
    Io(io::Error),
    Ergo(ErgoError),
    Json(serde_json::Error),
    NoInput,
    NoRecords,
    CacheMiss(String),
}

impl From<io::Error> for ErgoCliError {
    fn from(e: io::Error) -> Self {
        ErgoCliError::Io(e)
    }
}

impl From<ErgoError> for ErgoCliError {
    fn from(e: ErgoError) -> Self {
        ErgoCliError::Ergo(e)
    }
}

impl From<serde_json::Error> for ErgoCliError {
    fn from(e: serde_json::Error) -> Self {
        ErgoCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ErgoCliError> for CliError {
    fn from(e: ErgoCliError) -> Self {
        match e {
            ErgoCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ErgoCliError::Ergo(e) => {
                let (code, hint) = match &e {
                    ErgoError::Config(_) | ErgoError::Toml(_) => {
                        ("CONFIG_ERROR", "Run 'ergo-flux config' to see a valid configuration")
                    }
                    ErgoError::InvalidParameter { .. } | ErgoError::UnknownStage(_) => {
                        ("STAGE_ERROR", "Run 'ergo-flux stages' to list stages and parameters")
                    }
                    ErgoError::MissingColumn(_) | ErgoError::InsufficientData(_) => {
                        ("DATA_ERROR", "Check that the input carries every configured channel")
                    }
                    ErgoError::OutOfRange { .. } => {
                        ("RANGE_ERROR", "Clip or center delta angles before scoring")
                    }
                    _ => ("PIPELINE_ERROR", "Re-run with --verbose for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            ErgoCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Records need an RFC 3339 'timestamp' and numeric or null channels".to_string(),
                ),
            },
            ErgoCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "No input on stdin".to_string(),
                hint: Some("Pipe records on stdin or pass --input FILE".to_string()),
            },
            ErgoCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            ErgoCliError::CacheMiss(key) => CliError {
                code: "CACHE_MISS".to_string(),
                message: format!("No cached result under key {key}"),
                hint: Some("Run 'ergo-flux cache-key' to compute the key".to_string()),
            },
        }
    }
}
