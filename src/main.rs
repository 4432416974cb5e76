use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use funccover::config::{DEFAULT_OUTPUT, InstrumentConfig, derive_suffix, parse_period};
use funccover::error::Error;
use funccover::instrument::Instrumenter;
use funccover::manifest::{RuntimeSource, inject_runtime};
use funccover::output::{collect_sources, write_listing, write_to_dir};

#[derive(Parser)]
#[command(
    name = "funccover",
    about = "Function-level coverage instrumentation for Rust sources",
    version,
    after_help = "All SOURCES form one compilation unit; exactly one of them may define `main`."
)]
struct Cli {
    /// Source files or directories of the unit. Directories contribute their
    /// `.rs` files; other files are ignored.
    #[arg(required = true, value_name = "SOURCES")]
    sources: Vec<PathBuf>,

    /// Also write coverage every DURATION while the program runs
    /// (e.g. 500ms, 2s, 1m30s). 0 disables periodic collection.
    #[arg(long, value_name = "DURATION", default_value = "0", value_parser = parse_period)]
    period: Duration,

    /// Write instrumented files under DIR instead of printing them.
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Coverage file written by the instrumented program.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_OUTPUT)]
    output: String,

    /// Suffix for generated names (defaults to a hash of the first source path).
    #[arg(long)]
    suffix: Option<String>,

    /// Add the funccover-runtime dependency to this Cargo.toml.
    #[arg(long, value_name = "CARGO_TOML")]
    manifest: Option<PathBuf>,

    /// Path to funccover-runtime source (for development before publishing).
    #[arg(long, requires = "manifest")]
    runtime_path: Option<PathBuf>,

    /// Log progress to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("FUNCCOVER_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), Error> {
    let sources = collect_sources(&cli.sources)?;
    let Some(first) = sources.first() else {
        return Err(Error::InvalidArgs("no Rust source files given".into()));
    };
    validate_output(&cli.output, &sources)?;

    let suffix = cli.suffix.unwrap_or_else(|| derive_suffix(first));
    let config = InstrumentConfig::new(suffix)
        .with_output(cli.output)
        .with_period(cli.period);

    let mut unit = Instrumenter::new(config);
    for path in &sources {
        unit.add_file(path)?;
    }
    let files = unit.instrument()?;

    match &cli.dir {
        Some(dir) => {
            let written = write_to_dir(&files, dir)?;
            for path in &written {
                tracing::info!(path = %path.display(), "instrumented");
            }
        }
        None => write_listing(&files, std::io::stdout().lock())?,
    }

    if let Some(manifest) = &cli.manifest {
        match &cli.runtime_path {
            Some(path) => {
                let abs_path = std::fs::canonicalize(path)?;
                inject_runtime(manifest, RuntimeSource::Path(&abs_path))?;
            }
            None => {
                inject_runtime(
                    manifest,
                    RuntimeSource::Version(env!("FUNCCOVER_RUNTIME_VERSION")),
                )?;
            }
        }
    }

    Ok(())
}

/// The coverage path is baked into the program; it must name a file and must
/// not be one of the sources the program is built from.
fn validate_output(output: &str, sources: &[PathBuf]) -> Result<(), Error> {
    if output.is_empty() {
        return Err(Error::InvalidArgs("--output must not be empty".into()));
    }
    let output_path = Path::new(output);
    let output_abs = std::fs::canonicalize(output_path).ok();
    for source in sources {
        let same = source == output_path
            || output_abs
                .as_ref()
                .is_some_and(|abs| std::fs::canonicalize(source).is_ok_and(|s| &s == abs));
        if same {
            return Err(Error::InvalidArgs(format!(
                "--output {output} would overwrite source {}",
                source.display()
            )));
        }
    }
    Ok(())
}
