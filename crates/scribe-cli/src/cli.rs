//! Argument parsing, logging setup, and command dispatch.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use scribe_config::{CONFIG_PATH_ENV, ConfigResult, EngineConfig};
use scribe_events::EventBus;
use scribe_io::FileSystem;
use scribe_telemetry::{
    DEFAULT_LOG_LEVEL, GlobalContextGuard, LogFormat, LoggingConfig, Metrics, build_sha,
    init_logging,
};
use tracing::{info, warn};

use crate::commands;
use crate::error::{CliError, CliResult};

#[derive(Parser)]
#[command(
    name = "scribe",
    version,
    about = "Load, save, and stream text files through the scribe engine"
)]
pub(crate) struct Cli {
    /// JSON configuration file; environment overrides still apply.
    #[arg(long, global = true, env = CONFIG_PATH_ENV)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, global = true, env = "SCRIBE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub(crate) log_level: String,
    /// `json` or `pretty`; inferred from the build when omitted.
    #[arg(long, global = true, env = "SCRIBE_LOG_FORMAT")]
    pub(crate) log_format: Option<LogFormat>,
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the decoded text of a file.
    Cat(PathArgs),
    /// Stream a file and print each chunk event as it arrives.
    Stream(PathArgs),
    /// Save text from `--input` or standard input, keeping a backup until it is durable.
    Save(SaveArgs),
    /// Create an empty file; fails when the path exists.
    Touch(PathArgs),
    /// Create a new note, numbering the name if it is taken.
    New(NewArgs),
    /// Show a file's size and the load strategy it would get.
    Size(PathArgs),
    /// Print the effective configuration.
    Config,
}

#[derive(Args)]
pub(crate) struct PathArgs {
    pub(crate) path: PathBuf,
}

#[derive(Args)]
pub(crate) struct SaveArgs {
    pub(crate) path: PathBuf,
    /// Read the new content from this file instead of standard input.
    #[arg(long)]
    pub(crate) input: Option<PathBuf>,
}

#[derive(Args)]
pub(crate) struct NewArgs {
    pub(crate) folder: PathBuf,
    pub(crate) name: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Parses CLI arguments, runs the requested command on a fresh engine, and
/// shuts the engine down. Returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let logging = LoggingConfig {
        level: &cli.log_level,
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        build_sha: build_sha(),
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: logging unavailable: {err}");
    }
    let _context = GlobalContextGuard::new("cli");

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")
        .map_err(CliError::failure)
        .and_then(|runtime| runtime.block_on(execute(cli)));

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

fn load_config(cli: &Cli) -> ConfigResult<EngineConfig> {
    match &cli.config {
        Some(path) => {
            let path = path.display().to_string();
            scribe_config::from_lookup(|name| {
                if name == CONFIG_PATH_ENV {
                    Some(path.clone())
                } else {
                    env::var(name).ok()
                }
            })
        }
        None => scribe_config::from_env(),
    }
}

async fn execute(cli: Cli) -> CliResult<()> {
    let config = load_config(&cli)
        .context("failed to load configuration")
        .map_err(CliError::failure)?;
    let metrics = Metrics::new()
        .context("failed to initialise metrics")
        .map_err(CliError::failure)?;
    let fs = FileSystem::start(config, EventBus::new(), metrics)
        .context("failed to start file engine")
        .map_err(CliError::failure)?;

    let result = dispatch(&fs, cli.command, cli.output).await;

    let report = fs.shutdown().await;
    if report.forced {
        warn!(
            canceled = report.canceled.len(),
            aborted = report.aborted.len(),
            "file engine shutdown was forced"
        );
    }
    info!(
        active = fs.metrics().snapshot().active_operations,
        "file engine stopped"
    );
    result
}

async fn dispatch(fs: &FileSystem, command: Command, format: OutputFormat) -> CliResult<()> {
    match command {
        Command::Cat(args) => commands::cat(fs, &args.path, format).await,
        Command::Stream(args) => commands::stream(fs, &args.path, format).await,
        Command::Save(args) => commands::save(fs, &args.path, args.input.as_deref(), format).await,
        Command::Touch(args) => commands::touch(fs, &args.path, format).await,
        Command::New(args) => commands::new_note(fs, &args.folder, &args.name, format).await,
        Command::Size(args) => commands::size(fs, &args.path, format),
        Command::Config => commands::show_config(fs, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() -> Result<(), clap::Error> {
        let cli = Cli::try_parse_from([
            "scribe",
            "save",
            "notes/todo.txt",
            "--input",
            "draft.txt",
            "--output",
            "json",
            "--log-format",
            "json",
        ])?;
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        let Command::Save(args) = cli.command else {
            panic!("expected save command");
        };
        assert_eq!(args.path, PathBuf::from("notes/todo.txt"));
        assert_eq!(args.input, Some(PathBuf::from("draft.txt")));
        Ok(())
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["scribe", "--log-format", "yaml", "config"]).is_err());
    }
}
