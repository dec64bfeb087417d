use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::storage;

pub mod commands;

use self::commands::{
    AssetsArgs, CategoryArgs, ClearArgs, IdsArgs, ListArgs, PreviewArgs, SendArgs, ThemeArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "linksaver",
    version,
    about = "Local-first link capture with offline previews"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over LINKSAVER_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over LINKSAVER_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, delete, select or list categories
    Category(CategoryArgs),
    /// Capture text and links into the active category
    Send(SendArgs),
    /// List messages of a category (default: the active one)
    List(ListArgs),
    /// Star the given messages, or unstar them if all are starred
    Star(IdsArgs),
    /// Delete messages by id
    Delete(IdsArgs),
    /// Resolve every pending link preview now
    Sync,
    /// Show the preview for a URL without saving anything
    Preview(PreviewArgs),
    /// Show, set or toggle the theme
    Theme(ThemeArgs),
    /// Remove every message, category, cached preview and preference
    ClearData(ClearArgs),
    /// Drive the offline app-shell cache
    Assets(AssetsArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let mut app = App::new(Arc::new(config), storage, paths)?;
    let command = cli.command.unwrap_or(Commands::List(ListArgs::default()));
    let output = runtime.block_on(commands::dispatch(&mut app, command));
    match output {
        Ok(text) => {
            print!("{text}");
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            Err(err)
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
