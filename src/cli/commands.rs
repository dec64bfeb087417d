use std::fmt::Write as _;
use std::io::{self, Read};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::Commands;
use crate::app::App;
use crate::assets::{self, AssetRequest, AssetWorker, FetchOutcome, ResponseSource};
use crate::config::ThemeName;
use crate::error::{AssetError, ValidationError};
use crate::store::Message;

#[derive(Args, Debug, Clone)]
pub struct CategoryArgs {
    #[command(subcommand)]
    pub command: CategoryCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    /// List categories, most recently used first
    List,
    /// Create a category and make it active
    Create(CategoryNameArgs),
    /// Delete a category and every message in it
    Delete(CategoryNameArgs),
    /// Make a category active
    Select(CategoryNameArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CategoryNameArgs {
    /// Category name (case-sensitive)
    pub name: String,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Text and links to capture. If omitted, reads from stdin.
    #[arg()]
    pub text: Vec<String>,
    /// Save links as pending instead of resolving previews now
    #[arg(long)]
    pub offline: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Category to list (defaults to the active one; "Starred" lists starred messages)
    #[arg(long)]
    pub category: Option<String>,
    /// Case-insensitive filter over text, URLs, titles and descriptions
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct IdsArgs {
    /// Message identifiers
    #[arg(required = true)]
    pub ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    /// URL or bare domain to preview
    pub url: String,
    /// Do not contact preview providers
    #[arg(long)]
    pub offline: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeAction {
    Light,
    Dark,
    Toggle,
}

#[derive(Args, Debug, Clone)]
pub struct ThemeArgs {
    /// New theme; prints the current one when omitted
    #[arg(value_enum)]
    pub action: Option<ThemeAction>,
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AssetsArgs {
    #[command(subcommand)]
    pub command: AssetsCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AssetsCommand {
    /// Download the app shell into the current cache version
    Install,
    /// Switch to the current cache version and prune older ones
    Activate,
    /// Run one request through the cache worker
    Fetch(AssetFetchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AssetFetchArgs {
    /// Path relative to the configured origin, or an absolute URL
    pub path: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    pub navigate: bool,
}

pub async fn dispatch(app: &mut App, command: Commands) -> Result<String> {
    match command {
        Commands::Category(args) => category(app, args.command),
        Commands::Send(args) => send(app, args).await,
        Commands::List(args) => list(app, &args),
        Commands::Star(args) => star(app, &args),
        Commands::Delete(args) => delete(app, &args),
        Commands::Sync => sync(app).await,
        Commands::Preview(args) => preview(app, &args).await,
        Commands::Theme(args) => theme(app, args.action),
        Commands::ClearData(args) => clear_data(app, &args),
        Commands::Assets(args) => {
            let worker = app.asset_worker()?;
            run_assets(worker, args.command).await
        }
    }
}

fn category(app: &App, command: CategoryCommand) -> Result<String> {
    let mut store = app.store().lock();
    match command {
        CategoryCommand::List => {
            let mut out = String::new();
            for name in store.categories() {
                let marker = if name == store.active_category() { "*" } else { " " };
                let _ = writeln!(&mut out, "{marker} {name}");
            }
            Ok(out)
        }
        CategoryCommand::Create(args) => {
            store.create_category(&args.name)?;
            Ok(format!("Created category {}\n", args.name.trim()))
        }
        CategoryCommand::Delete(args) => {
            let removed = store.delete_category(&args.name)?;
            Ok(format!(
                "Deleted category {} ({removed} message(s))\n",
                args.name
            ))
        }
        CategoryCommand::Select(args) => {
            store.select_category(&args.name)?;
            Ok(format!("Active category: {}\n", args.name))
        }
    }
}

async fn send(app: &App, args: SendArgs) -> Result<String> {
    let input = if args.text.is_empty() {
        read_stdin()?.unwrap_or_default()
    } else {
        args.text.join(" ")
    };
    let message = app
        .send(&input, !args.offline)
        .await
        .context("saving message")?;
    let category = app.store().lock().active_category().to_string();
    let mut out = format!("Saved to {category}\n");
    out.push_str(&format_messages(std::iter::once(&message)));
    Ok(out)
}

fn list(app: &App, args: &ListArgs) -> Result<String> {
    let store = app.store().lock();
    let category = args
        .category
        .clone()
        .unwrap_or_else(|| store.active_category().to_string());
    if !store.has_category(&category) {
        return Err(ValidationError::UnknownCategory(category).into());
    }
    let search = args.search.as_deref().unwrap_or_default();
    Ok(format_messages(store.query(&category, search)))
}

fn star(app: &App, args: &IdsArgs) -> Result<String> {
    match app.store().lock().toggle_star(&args.ids) {
        Some(true) => Ok(format!("Starred {} message(s)\n", args.ids.len())),
        Some(false) => Ok(format!("Unstarred {} message(s)\n", args.ids.len())),
        None => bail!("no message matches {}", args.ids.join(", ")),
    }
}

fn delete(app: &App, args: &IdsArgs) -> Result<String> {
    let removed = app.store().lock().delete_messages(&args.ids);
    Ok(format!("Deleted {removed} message(s)\n"))
}

async fn sync(app: &App) -> Result<String> {
    match app.sync_now().await {
        Some(report) => Ok(format!(
            "Resolved {} of {} pending link(s), {} failed\n",
            report.resolved, report.attempted, report.failed
        )),
        None => Ok("A sync is already running\n".to_string()),
    }
}

async fn preview(app: &App, args: &PreviewArgs) -> Result<String> {
    let Some(preview) = app.preview_input(&args.url, !args.offline).await else {
        return Err(ValidationError::MalformedUrl(args.url.clone()).into());
    };
    let mut out = String::new();
    let _ = writeln!(&mut out, "[{}] {}", preview.status, preview.title);
    let _ = writeln!(&mut out, "    {}", preview.url);
    if !preview.description.is_empty() {
        let _ = writeln!(&mut out, "    {}", preview.description);
    }
    if !preview.image.is_empty() {
        let _ = writeln!(&mut out, "    image {}", preview.image);
    }
    Ok(out)
}

fn theme(app: &mut App, action: Option<ThemeAction>) -> Result<String> {
    let theme = match action {
        None => app.theme(),
        Some(ThemeAction::Light) => app.set_theme(ThemeName::Light)?,
        Some(ThemeAction::Dark) => app.set_theme(ThemeName::Dark)?,
        Some(ThemeAction::Toggle) => app.toggle_theme()?,
    };
    Ok(format!("Theme: {theme}\n"))
}

fn clear_data(app: &mut App, args: &ClearArgs) -> Result<String> {
    if !args.yes {
        let answer = prompt("Erase all messages, categories and cached previews? Type 'yes'")?;
        if answer.trim() != "yes" {
            return Ok("Aborted\n".to_string());
        }
    }
    app.clear_all_data()?;
    Ok("All local data cleared\n".to_string())
}

async fn run_assets(worker: AssetWorker, command: AssetsCommand) -> Result<String> {
    let bucket = worker.bucket_name().to_string();
    let request = match &command {
        AssetsCommand::Fetch(args) => {
            let url = worker.resolve(&args.path)?;
            Some(if args.navigate {
                AssetRequest::navigate(url)
            } else {
                AssetRequest::get(url)
            })
        }
        _ => None,
    };
    let handle = assets::spawn(worker);
    let out = match (command, request) {
        (AssetsCommand::Install, _) => {
            let count = handle.install().await.context("installing app shell")?;
            format!("Installed {count} asset(s) into {bucket}\n")
        }
        (AssetsCommand::Activate, _) => {
            let pruned = handle.activate().await.context("activating asset cache")?;
            if pruned.is_empty() {
                format!("Activated {bucket}\n")
            } else {
                format!("Activated {bucket}, pruned {}\n", pruned.join(", "))
            }
        }
        (AssetsCommand::Fetch(_), Some(request)) => {
            let url = request.url.to_string();
            match handle.fetch(request).await? {
                FetchOutcome::Respond { response, source } => {
                    let source = match source {
                        ResponseSource::Cache => "cache",
                        ResponseSource::Network => "network",
                    };
                    format!(
                        "HTTP {} from {source}, {} byte(s)\n",
                        response.status,
                        response.body.len()
                    )
                }
                FetchOutcome::Passthrough => format!("{url} is not intercepted\n"),
                FetchOutcome::NetworkError => return Err(AssetError::NoResponse(url).into()),
            }
        }
        (AssetsCommand::Fetch(_), None) => bail!("fetch request could not be built"),
    };
    handle.settle().await?;
    Ok(out)
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn format_messages<'a>(messages: impl Iterator<Item = &'a Message>) -> String {
    let mut out = String::new();
    for message in messages {
        let mut headline = format!("{}  {}", message.id, format_timestamp(message.time));
        if message.starred {
            headline.push_str("  [STARRED]");
        }
        let _ = writeln!(&mut out, "{headline}");
        if let Some(text) = &message.text {
            let _ = writeln!(&mut out, "    {text}");
        }
        for link in message.links() {
            let _ = writeln!(&mut out, "    [{}] {}  <{}>", link.status, link.title, link.url);
        }
        out.push('\n');
    }
    if out.is_empty() {
        return "No messages.\n".to_string();
    }
    out
}

fn format_timestamp(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map(|dt| dt.format(&Rfc3339).unwrap_or_else(|_| millis.to_string()))
        .unwrap_or_else(|_| millis.to_string())
}
