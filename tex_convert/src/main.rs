use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tex_core::logging::{init_logging, LogConfig};
use tex_core::{
    print_run_summary, resolve_worker_count, DispatchConfig, DispatchError, DispatchOutcome,
    DispatchRequest, Dispatcher, FormatRegistry,
};
use tracing::{info, warn, Level};

mod progress;

use progress::RunProgressBar;

#[derive(Parser)]
#[command(name = "tex-convert")]
#[command(version, about = "Batch convert textures to render-ready formats", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan roots, drop duplicate exports and convert what is left.
    Run {
        /// Root directories. One argument may join several with the paths separator.
        #[arg(value_name = "PATHS", required = true)]
        paths: Vec<String>,

        /// Accepted input suffix (repeatable). Defaults to the configured selection.
        #[arg(short = 'i', long = "input-format", value_name = "EXT")]
        input_formats: Vec<String>,

        /// Output format name, as listed by `tex-convert formats`.
        #[arg(short, long, value_name = "NAME")]
        output: Option<String>,

        /// Concurrent conversions (1 to the number of logical CPUs).
        #[arg(short, long, value_name = "N")]
        threads: Option<usize>,

        /// Do not ask for confirmation.
        #[arg(short = 'y', long)]
        yes: bool,

        /// JSON configuration file.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Directory for log files (default: system temp dir).
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,

        #[arg(short, long)]
        verbose: bool,
    },

    /// List output formats, input formats and the duplicate priority.
    Formats {
        /// JSON configuration file.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            paths,
            input_formats,
            output,
            threads,
            yes,
            config,
            log_dir,
            verbose,
        } => {
            let mut log_config = LogConfig::default();
            if let Some(dir) = log_dir {
                log_config = log_config.with_log_dir(dir);
            }
            if verbose {
                log_config = log_config
                    .with_level(Level::DEBUG)
                    .with_stderr_level(Level::INFO);
            }
            let _ = init_logging("tex-convert", log_config);

            let request = DispatchRequest::new(paths).with_worker_count(resolve_worker_count(threads));
            let request = if input_formats.is_empty() {
                request
            } else {
                request.with_input_formats(input_formats.as_slice())
            };
            let request = match output {
                Some(name) => request.with_output_command(name),
                None => request,
            };

            run(&request, config.as_deref(), yes)
        }
        Commands::Formats { config } => {
            let _ = init_logging("tex-convert", LogConfig::default());
            let config = match load_config(config.as_deref()) {
                Ok(config) => config,
                Err(e) => return Ok(config_failure(&e)),
            };
            print_formats(&config, &FormatRegistry::detect());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    match path {
        Some(path) => DispatchConfig::load(path)
            .with_context(|| format!("Cannot use config file {}", path.display())),
        None => Ok(DispatchConfig::default()),
    }
}

fn config_failure(error: &anyhow::Error) -> ExitCode {
    eprintln!("{} {:#}", style("❌ Error:").red().bold(), error);
    ExitCode::from(1)
}

fn run(request: &DispatchRequest, config: Option<&Path>, yes: bool) -> Result<ExitCode> {
    let config = match load_config(config) {
        Ok(config) => config,
        Err(e) => return Ok(config_failure(&e)),
    };
    let dispatcher = Dispatcher::new(config, FormatRegistry::detect());

    let outcome = dispatcher.dispatch(request, |found| {
        yes || confirm(found, &mut io::stdin().lock(), &mut io::stdout())
    });

    let handle = match outcome {
        Ok(DispatchOutcome::Started(handle)) => handle,
        Ok(DispatchOutcome::NothingFound) => {
            println!("No textures found.");
            return Ok(ExitCode::SUCCESS);
        }
        Ok(DispatchOutcome::Declined { found }) => {
            println!("Cancelled, {} textures left untouched.", found);
            return Ok(ExitCode::SUCCESS);
        }
        Err(DispatchError::Config(e)) => return Ok(config_failure(&e.into())),
        Err(e) => return Err(e).context("Could not start the conversion run"),
    };

    let stop = handle.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.stop();
    }) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let total = handle.progress().total;
    info!(total, workers = handle.worker_count(), "Conversion started");
    let bar = RunProgressBar::new(total, "Converting");
    let summary = handle.wait_with(|event| bar.on_event(event));
    bar.finish(&summary);

    print_run_summary(&summary);
    Ok(ExitCode::SUCCESS)
}

/// Asks "N textures found, proceed? [y/N]" and reads one line.
fn confirm<R: BufRead, W: Write>(found: usize, input: &mut R, output: &mut W) -> bool {
    let _ = write!(output, "{} textures found, proceed? [y/N] ", found);
    let _ = output.flush();
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_formats(config: &DispatchConfig, registry: &FormatRegistry) {
    println!("{}", style("Output formats").cyan().bold());
    if registry.is_empty() {
        println!("  (none, no converter executable found on PATH)");
    }
    for command in registry.commands() {
        let marker = if command.name() == config.default_output_command {
            " (default)"
        } else {
            ""
        };
        println!("  ✅ {:<45} {}{}", command.name(), command.executable(), marker);
    }
    for (name, executable) in registry.hidden() {
        println!(
            "  {} {:<45} {} not found",
            style("⏭️").dim(),
            style(name).dim(),
            executable
        );
    }

    println!();
    println!("{}", style("Input formats").cyan().bold());
    for format in &config.input_formats {
        let selected = if config.default_selected_formats.contains(format) {
            "*"
        } else {
            " "
        };
        println!("  {} {}", selected, format);
    }

    println!();
    println!(
        "{} {}",
        style("Duplicate priority (least preferred first):").cyan().bold(),
        config.ext_priority.join(" < ")
    );
}
