use crate::{
    analyzer::{Analyzer, AnalyzerOptions, ColorSpace},
    batch::{self, Interrupt},
    config::Config,
    detect,
    helper::find_executable,
    jobs::{JsonFileStore, page_count_for_job},
    report::{DetectReport, HelperReport},
    stage::{JobSource, STDIN_NAME},
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pdlcount")]
#[command(about = "Detect the page description language of print jobs and count their pages")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Inputs to count when no subcommand is given; `-` reads stdin. A file
    /// named like a subcommand (`count`, `detect`, `doctor`, `job`) must be
    /// passed as `pdlcount count -- <files>`.
    pub inputs: Vec<String>,

    /// Path to config TOML. If omitted, uses ./pdlcount.toml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(flatten)]
    pub analyzer: AnalyzerArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct AnalyzerArgs {
    /// Verbose diagnostics.
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Colour model hint.
    #[arg(long, value_enum, ignore_case = true, global = true)]
    pub colorspace: Option<ColorSpace>,

    /// Resolution hint in dpi.
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub resolution: Option<u32>,
}

impl AnalyzerArgs {
    pub fn options(&self) -> AnalyzerOptions {
        AnalyzerOptions {
            debug: self.debug,
            colorspace: self.colorspace,
            resolution: Some(self.resolution.unwrap_or(72)),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Count pages of every input and print the total.
    Count { inputs: Vec<String> },
    /// Print the detected format of every input as JSON.
    Detect { inputs: Vec<String> },
    /// Report which helper programs are available.
    Doctor {},
    /// Page count for a print-queue job, reusing a stored count.
    Job {
        #[arg(long)]
        id: String,
        /// Document of the job; omit when it can't be retrieved.
        input: Option<String>,
        /// Job store file (defaults to `store.path` from the config).
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref())? {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let _guard = init_logging(&args, &cfg)?;
    let options = args.analyzer.options();

    match &args.cmd {
        None => count(&cfg, &options, &args.inputs),
        Some(Command::Count { inputs }) => count(&cfg, &options, inputs),
        Some(Command::Detect { inputs }) => detect_inputs(&cfg, &options, inputs),
        Some(Command::Doctor {}) => doctor(&cfg),
        Some(Command::Job { id, input, store }) => {
            job(&cfg, &options, id, input.as_deref(), store.as_deref())
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = user {
        if !p.exists() {
            return Err(anyhow!("config file does not exist: {}", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    let default = PathBuf::from("pdlcount.toml");
    if default.exists() {
        Ok(Some(default))
    } else {
        Ok(None)
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args.log_level.as_deref().unwrap_or(if args.analyzer.debug {
        "debug"
    } else {
        cfg.logging.level.as_str()
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let file_path = (cfg.logging.write_to_file && !cfg.logging.file_path.is_empty())
        .then(|| PathBuf::from(&cfg.logging.file_path));
    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

/// Reads stdin when nothing was named, or when data is piped in and `-`
/// wasn't given explicitly.
fn resolve_inputs(inputs: &[String]) -> Vec<String> {
    let mut inputs = inputs.to_vec();
    let piped = !std::io::stdin().is_terminal();
    if inputs.is_empty() || (piped && !inputs.iter().any(|a| a == STDIN_NAME)) {
        inputs.push(STDIN_NAME.to_string());
    }
    inputs
}

fn count(cfg: &Config, options: &AnalyzerOptions, inputs: &[String]) -> Result<()> {
    let inputs = resolve_inputs(inputs);

    let interrupt = Arc::new(Interrupt::new());
    let handler = interrupt.clone();
    let installed = ctrlc::set_handler(move || {
        if handler.request() {
            // Second Ctrl-C: the current input is stuck (a blocking stdin
            // read or a helper), so report what was counted and leave.
            println!("{}", handler.partial_total());
            std::process::exit(130);
        }
        warn!("stopping after the current input, Ctrl-C again to stop now");
    });
    if let Err(e) = installed {
        warn!("failed to set Ctrl+C handler: {e}");
    }

    let outcome = batch::count_inputs(&inputs, options, cfg, &interrupt);
    println!("{}", outcome.total);
    Ok(())
}

fn detect_inputs(cfg: &Config, options: &AnalyzerOptions, inputs: &[String]) -> Result<()> {
    let inputs = resolve_inputs(inputs);
    let mut reports = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let mut analyzer = Analyzer::new(JobSource::from_arg(input), options.clone(), cfg);
        let result = analyzer.format();
        let file_bytes = analyzer.staged_size().unwrap_or(0);
        let (candidates, first, last) = analyzer
            .signature_windows()
            .map(|w| (detect::candidates(w), w.first().len(), w.last().len()))
            .unwrap_or_default();
        reports.push(DetectReport {
            input: input.clone(),
            format: result.as_ref().ok().copied(),
            candidates,
            file_bytes,
            first_block_bytes: first,
            last_block_bytes: last,
            error: result.err().map(|e| e.error.to_string()),
        });
        analyzer.close();
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    let mut reports = Vec::new();
    for format in detect::PRIORITY {
        for program in detect::parser_for(format, cfg).required_helpers() {
            let resolved = find_executable(&program);
            reports.push(HelperReport {
                format,
                program,
                ok: resolved.is_some(),
                resolved: resolved.map(|p| p.display().to_string()),
            });
        }
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn job(
    cfg: &Config,
    options: &AnalyzerOptions,
    id: &str,
    input: Option<&str>,
    store: Option<&Path>,
) -> Result<()> {
    let store_path = store
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.store.path));
    let mut store = JsonFileStore::open(&store_path)
        .with_context(|| format!("opening job store {}", store_path.display()))?;
    let document = input.map(JobSource::from_arg);
    let lookup = page_count_for_job(&mut store, id, document, options, cfg)?;
    println!("{}", serde_json::to_string_pretty(&lookup)?);
    Ok(())
}
