//! margin CLI
//!
//! Command-line interface for margin - merge reader-app annotations into a
//! book library.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use margin_core::{CatalogId, Config};

mod commands;
mod output;
mod prompt;

use commands::import::ImportOptions;
use commands::Session;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "margin")]
#[command(about = "margin - Merge reading annotations into your library")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered reader apps
    Readers,
    /// Copy a reader app's annotations into the local store
    Fetch {
        /// Reader app name
        reader: String,
    },
    /// List books with stored annotations
    Books {
        /// Reader app name
        reader: String,
    },
    /// Print one book's stored annotations as a document
    Show {
        /// Reader app name
        reader: String,
        /// Device book id
        book_id: String,
    },
    /// Show how each book would match the library, without merging
    Match {
        /// Reader app name
        reader: String,
    },
    /// Fetch and merge annotations into the library
    Import {
        /// Reader app name
        reader: String,
        /// Only import these device book ids
        #[arg(short, long)]
        book: Vec<String>,
        /// Accept proposed matches below the auto-apply threshold
        #[arg(short, long)]
        yes: bool,
        /// Library id for books that match nothing (the prompt's default when asking)
        #[arg(long)]
        default_target: Option<CatalogId>,
    },
    /// Manage the library file
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },
    /// Remove merged annotations from every book in the library
    Strip {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show status (paths, counts)
    Status,
}

#[derive(Subcommand)]
enum LibraryCommands {
    /// Add a book
    #[command(alias = "create")]
    Add {
        /// Book title
        title: String,
        /// Author (repeat for several)
        #[arg(short, long)]
        author: Vec<String>,
        /// Book uuid (generated when omitted)
        #[arg(short, long)]
        uuid: Option<String>,
    },
    /// List books
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (destination, auto_apply_threshold, reader_exports, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands work even when the config file is broken
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(cli.verbose, &config);
    debug!("Using data dir {:?}", config.data_dir);

    let session = Session::open(config)?;

    match cli.command {
        Commands::Readers => commands::reader::list(&session, &output),
        Commands::Fetch { reader } => commands::reader::fetch(&session, &reader, &output),
        Commands::Books { reader } => commands::reader::books(&session, &reader, &output),
        Commands::Show { reader, book_id } => {
            commands::reader::show(&session, &reader, &book_id, &output)
        }
        Commands::Match { reader } => commands::import::preview(&session, &reader, &output),
        Commands::Import {
            reader,
            book,
            yes,
            default_target,
        } => {
            let options = ImportOptions {
                yes,
                default_target,
            };
            commands::import::import(&session, &reader, book, options, &output).await
        }
        Commands::Library { command } => match command {
            LibraryCommands::Add {
                title,
                author,
                uuid,
            } => commands::library::add(&session, title, author, uuid, &output),
            LibraryCommands::List => commands::library::list(&session, &output),
        },
        Commands::Strip { yes } => commands::strip::strip(&session, yes, &output),
        Commands::Status => commands::status::show(&session, &output),
        Commands::Config { .. } => Ok(()), // Handled above
    }
}

/// Log level from flags and environment
///
/// `-v` flags win, then `MARGIN_LOG`, then `RUST_LOG`; warnings otherwise.
fn log_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => std::env::var("MARGIN_LOG").ok(),
        1 => Some("debug".to_string()),
        _ => Some("trace".to_string()),
    };

    match level {
        Some(level) => EnvFilter::new(format!("margin_core={},margin_cli={}", level, level)),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("margin_core=warn,margin_cli=warn")),
    }
}

/// Initialize logging to stderr, or to `log_file` when configured
fn init_logging(verbose: u8, config: &Config) {
    let env_filter = log_filter(verbose);

    if let Some(ref path) = config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(file)
                    .try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", path, e);
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .try_init();
}
