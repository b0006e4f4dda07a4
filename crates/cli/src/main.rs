mod config;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use unrelated_tooldoc::convert_document;
use unrelated_tooldoc::runtime::convert_file;

#[derive(Parser, Debug)]
#[command(
    name = "unrelated-tooldoc",
    version,
    about = "Convert an OpenAPI/Swagger document into a tool-description document"
)]
struct Args {
    /// Source document (YAML or JSON). Reads stdin when omitted or `-`.
    input: Option<PathBuf>,

    /// Conversion config file (YAML or JSON).
    #[arg(short, long, env = "TOOLDOC_CONFIG")]
    config: Option<PathBuf>,

    /// Write the output document here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write a source map (output location -> source location) to this file.
    #[arg(long)]
    source_map: Option<PathBuf>,

    /// Print the diagnostic trace (steps, warnings, failures) to stderr as JSON.
    #[arg(long)]
    trace: bool,

    /// Emit compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, env = "TOOLDOC_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[arg(long, value_enum, env = "TOOLDOC_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the conversion succeeded.
fn run(args: &Args) -> anyhow::Result<bool> {
    let mut cfg = config::load_config(args.config.as_deref())?;
    if args.source_map.is_some() {
        cfg.source_map = true;
    }
    let run = match args.input.as_deref() {
        Some(path) if path != Path::new("-") => convert_file(path, &cfg)
            .with_context(|| format!("read input {}", path.display()))?,
        _ => convert_document(&config::read_stdin()?, &cfg),
    };

    if args.trace {
        let trace = serde_json::to_string_pretty(&run.diagnostics).context("serialize trace")?;
        eprintln!("{trace}");
    }

    let Some(document) = &run.document else {
        eprintln!(
            "error: {}",
            run.diagnostics
                .error
                .as_deref()
                .unwrap_or("conversion failed")
        );
        return Ok(false);
    };

    let text = document
        .to_json_string(!args.compact)
        .context("serialize output document")?;
    config::write_output(args.output.as_deref(), &text)?;

    if let (Some(path), Some(map)) = (&args.source_map, &run.source_map) {
        let text = if args.compact {
            serde_json::to_string(map)
        } else {
            serde_json::to_string_pretty(map)
        }
        .context("serialize source map")?;
        config::write_output(Some(path), &text)?;
        tracing::info!(entries = map.len(), path = %path.display(), "source map written");
    }

    for failure in &run.diagnostics.failures {
        tracing::warn!(
            method = %failure.method,
            path = %failure.path,
            "operation skipped: {}",
            failure.message
        );
    }

    Ok(true)
}
