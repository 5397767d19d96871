//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use relnotes_core::Pipeline;
use relnotes_shared::{
    AppConfig, SourceKind, Watermark, apply_env_overrides, init_config, load_config,
    load_config_from,
};
use tracing::info;

use crate::server;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// relnotes: release-note ingestion, translation, and Slack delivery.
#[derive(Parser)]
#[command(
    name = "relnotes",
    version,
    about = "Collect new vendor release notes, summarize them, and post them to Slack.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.relnotes/relnotes.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Extraction strategy, as spelled on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum SourceArg {
    Query,
    Scrape,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Query => SourceKind::Query,
            SourceArg::Scrape => SourceKind::Scrape,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one extract, translate, notify cycle and print the batch as JSON.
    Run {
        /// Watermark date (2025-02-01 or "February 18, 2025").
        #[arg(long)]
        watermark: Option<String>,

        /// Extraction strategy; defaults to [defaults] source.
        #[arg(long, value_enum)]
        source: Option<SourceArg>,
    },

    /// Start the HTTP trigger server.
    Serve {
        /// Listen address; defaults to [server] host.
        #[arg(long)]
        host: Option<String>,

        /// Listen port; defaults to [server] port.
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "relnotes=info",
        1 => "relnotes=debug",
        _ => "relnotes=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `run` can keep stdout for the JSON batch.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run { watermark, source } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_run(&config, watermark.as_deref(), source.map(SourceKind::from)).await
        }
        Command::Serve { host, port } => {
            let config = resolve_config(config_path.as_deref())?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            server::serve(&config, &host, port).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

/// Load config from `--config` or the default location, then apply env overrides.
fn resolve_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

async fn cmd_run(
    config: &AppConfig,
    watermark: Option<&str>,
    source: Option<SourceKind>,
) -> Result<()> {
    let explicit = watermark
        .map(Watermark::parse)
        .transpose()
        .wrap_err("invalid --watermark")?;
    let source = source.unwrap_or(config.defaults.source);

    let pipeline = Pipeline::from_config(config, source)?;
    let report = pipeline.run(explicit).await?;

    info!(
        run_id = %report.run_id,
        watermark = %report.watermark,
        notes = report.notes.len(),
        delivery = %report.delivery,
        "batch finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
