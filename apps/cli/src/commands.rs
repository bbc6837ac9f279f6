//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use espforge_core::validator::group_by_instance;
use espforge_core::{
    Ingestor, JobOutcome, Scheduler, generate, secrets_template, validate,
};
use espforge_discovery::DiscoveryOptions;
use espforge_extractor::Extractor;
use espforge_shared::{
    AppConfig, Component, Configuration, ScrapeConfig, init_config, load_config, resolve_db_path,
};
use espforge_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// espforge: build ESPHome configurations from the component documentation.
#[derive(Parser)]
#[command(
    name = "espforge",
    version,
    about = "Scrape ESPHome component docs into a local catalog, validate device configurations against it, and generate YAML.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Catalog database path (overrides the config file).
    #[arg(long, env = "ESPFORGE_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scrape one or more component pages into the catalog.
    Scrape {
        /// Component page URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Allow private and loopback hosts (local documentation mirrors).
        #[arg(long)]
        allow_private: bool,
    },

    /// Discover every component page from the documentation index and scrape them.
    ScrapeIndex {
        /// Index page URL (defaults to `scrape.index_url`).
        #[arg(long)]
        url: Option<String>,

        /// Scrape at most this many components (defaults to `scrape.max_components`).
        #[arg(long)]
        max: Option<usize>,

        /// Allow private and loopback hosts (local documentation mirrors).
        #[arg(long)]
        allow_private: bool,
    },

    /// List catalog components.
    List {
        /// Only components in this category.
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show one component and its variables.
    Show {
        /// Canonical key, e.g. `sensor.dht`.
        key: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Full-text search over component names and descriptions.
    Search {
        query: String,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Validate a configuration file (YAML or JSON) against the catalog.
    Validate {
        file: PathBuf,
    },

    /// Generate ESPHome YAML from a configuration file.
    Generate {
        file: PathBuf,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Generate even when validation reports errors.
        #[arg(long)]
        force: bool,
    },

    /// Print a secrets.yaml skeleton for a configuration file.
    Secrets {
        file: PathBuf,
    },

    /// Show recent scrape jobs.
    History {
        #[arg(short, long, default_value = "20")]
        limit: u32,
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
        0 => "espforge=info",
        1 => "espforge=debug",
        _ => "espforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

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
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        };
    }

    let config = load_config()?;
    let db_path = match cli.db {
        Some(p) => p,
        None => resolve_db_path(&config)?,
    };

    match cli.command {
        Command::Scrape { urls, allow_private } => {
            cmd_scrape(&config, &db_path, urls, allow_private).await
        }
        Command::ScrapeIndex {
            url,
            max,
            allow_private,
        } => cmd_scrape_index(&config, &db_path, url.as_deref(), max, allow_private).await,
        Command::List { category } => cmd_list(&db_path, category.as_deref()).await,
        Command::Show { key, json } => cmd_show(&db_path, &key, json).await,
        Command::Search { query, limit } => cmd_search(&db_path, &query, limit).await,
        Command::Validate { file } => cmd_validate(&config, &db_path, &file).await,
        Command::Generate { file, out, force } => {
            cmd_generate(&config, &db_path, &file, out.as_deref(), force).await
        }
        Command::Secrets { file } => cmd_secrets(&config, &file),
        Command::History { limit } => cmd_history(&db_path, limit).await,
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Scraping
// ---------------------------------------------------------------------------

async fn cmd_scrape(
    config: &AppConfig,
    db_path: &Path,
    urls: Vec<String>,
    allow_private: bool,
) -> Result<()> {
    let summary = scrape_all(config, db_path, urls, allow_private).await?;
    summary.print();
    if summary.failed > 0 {
        return Err(eyre!("{} of {} scrape(s) failed", summary.failed, summary.total()));
    }
    Ok(())
}

async fn cmd_scrape_index(
    config: &AppConfig,
    db_path: &Path,
    url: Option<&str>,
    max: Option<usize>,
    allow_private: bool,
) -> Result<()> {
    let index = url.unwrap_or(&config.scrape.index_url);
    let index_url = Url::parse(index).map_err(|e| eyre!("invalid index URL '{index}': {e}"))?;

    let opts = DiscoveryOptions {
        timeout_secs: config.scrape.timeout_secs,
        max_components: Some(max.unwrap_or(config.scrape.max_components)),
    };

    let spinner = spinner("Discovering components");
    let links = espforge_discovery::discover_components(&index_url, &opts).await;
    spinner.finish_and_clear();
    let links = links?;

    if links.is_empty() {
        println!("No component pages found at {index_url}");
        return Ok(());
    }
    info!(count = links.len(), "scraping discovered components");

    let urls = links.into_iter().map(|l| l.url).collect();
    let summary = scrape_all(config, db_path, urls, allow_private).await?;
    summary.print();
    Ok(())
}

#[derive(Default)]
struct ScrapeSummary {
    created: usize,
    updated: usize,
    unchanged: usize,
    cancelled: usize,
    failed: usize,
}

impl ScrapeSummary {
    fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.cancelled + self.failed
    }

    fn print(&self) {
        println!();
        println!("  Created:   {}", self.created);
        println!("  Updated:   {}", self.updated);
        println!("  Unchanged: {}", self.unchanged);
        if self.cancelled > 0 {
            println!("  Cancelled: {}", self.cancelled);
        }
        println!("  Failed:    {}", self.failed);
        println!();
    }
}

/// Scrape every URL through the scheduler; Ctrl-C cancels outstanding jobs.
async fn scrape_all(
    config: &AppConfig,
    db_path: &Path,
    urls: Vec<String>,
    allow_private: bool,
) -> Result<ScrapeSummary> {
    let storage = Arc::new(Storage::open(db_path).await?);
    let scrape = ScrapeConfig::from(config);
    let extractor = Extractor::new(&scrape)?.allow_localhost(allow_private);
    let ingestor = Arc::new(Ingestor::new(extractor, storage));
    let scheduler = Scheduler::new(ingestor, scrape.concurrency as usize);

    let handles: Vec<_> = urls.into_iter().map(|u| scheduler.submit(u)).collect();

    let cancellers: Vec<_> = handles.iter().map(|h| h.canceller()).collect();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling outstanding scrapes");
            for c in &cancellers {
                c.cancel();
            }
        }
    });

    let bar = ProgressBar::new(handles.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );

    let mut summary = ScrapeSummary::default();
    for handle in handles {
        let locator = handle.locator().to_string();
        bar.set_message(locator.clone());
        match handle.wait().await {
            JobOutcome::Done(outcome) => match outcome.status() {
                "created" => summary.created += 1,
                "updated" => summary.updated += 1,
                _ => summary.unchanged += 1,
            },
            JobOutcome::Cancelled => summary.cancelled += 1,
            JobOutcome::Failed(e) => {
                summary.failed += 1;
                bar.println(format!("  failed: {locator}: {e}"));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    interrupt.abort();

    Ok(summary)
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

// ---------------------------------------------------------------------------
// Catalog browsing
// ---------------------------------------------------------------------------

async fn open_catalog(db_path: &Path) -> Result<Storage> {
    Storage::open_readonly(db_path)
        .await
        .wrap_err("no catalog yet; run `espforge scrape` or `espforge scrape-index` first")
}

async fn cmd_list(db_path: &Path, category: Option<&str>) -> Result<()> {
    let storage = open_catalog(db_path).await?;
    let components = storage.list_components(category).await?;

    if components.is_empty() {
        println!("No components in the catalog.");
        return Ok(());
    }

    println!("{:<32} {:<40} {:>5}", "KEY", "NAME", "VARS");
    for c in &components {
        println!("{:<32} {:<40} {:>5}", c.key, truncate(&c.name, 40), c.variables.len());
    }
    println!("\n{} component(s)", components.len());
    Ok(())
}

async fn cmd_show(db_path: &Path, key: &str, json: bool) -> Result<()> {
    let storage = open_catalog(db_path).await?;
    let component = storage
        .get_component(key)
        .await?
        .ok_or_else(|| eyre!("no component '{key}' in the catalog"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&component)?);
    } else {
        print_component(&component);
    }
    Ok(())
}

fn print_component(c: &Component) {
    println!("{} ({})", c.name, c.key);
    println!("  Category:  {}", c.category);
    if !c.platforms.is_empty() {
        println!("  Platforms: {}", c.platforms.join(", "));
    }
    println!("  Source:    {}", c.source_url);
    println!("  Refreshed: {}", c.refreshed_at.to_rfc3339());
    println!("  Checked:   {}", c.checked_at.to_rfc3339());
    if !c.description.is_empty() {
        println!("\n  {}", c.description);
    }
    if c.variables.is_empty() {
        println!("\n  No configuration variables.");
        return;
    }

    println!();
    println!("  {:<28} {:<20} {:<9} {:<16} CONSTRAINTS", "NAME", "TYPE", "REQUIRED", "DEFAULT");
    for v in &c.variables {
        let default = v.default.as_ref().map(|d| d.to_string()).unwrap_or_default();
        let mut constraints = Vec::new();
        if let Some(min) = v.constraints.min {
            constraints.push(format!("min={min}"));
        }
        if let Some(max) = v.constraints.max {
            constraints.push(format!("max={max}"));
        }
        if !v.constraints.allowed_values.is_empty() {
            constraints.push(format!("one of {}", v.constraints.allowed_values.join("|")));
        }
        if let Some(p) = &v.constraints.pattern {
            constraints.push(format!("pattern={p}"));
        }
        println!(
            "  {:<28} {:<20} {:<9} {:<16} {}",
            v.name,
            v.var_type.as_str(),
            if v.required { "yes" } else { "" },
            truncate(&default, 16),
            constraints.join(", ")
        );
    }
}

async fn cmd_search(db_path: &Path, query: &str, limit: u32) -> Result<()> {
    let storage = open_catalog(db_path).await?;
    let results = storage.search(query, limit).await?;

    if results.is_empty() {
        println!("No matches for '{query}'.");
        return Ok(());
    }
    for r in results {
        println!("{:<32} {:<16} {}", r.key, r.category, r.name);
    }
    Ok(())
}

async fn cmd_history(db_path: &Path, limit: u32) -> Result<()> {
    let storage = open_catalog(db_path).await?;
    for job in storage.recent_scrape_jobs(limit).await? {
        let detail = job
            .error
            .as_deref()
            .or(job.component_key.as_deref())
            .unwrap_or_default();
        println!("{:<16} {:<60} {}", job.status, truncate(&job.locator, 60), detail);
    }
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let cut: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

// ---------------------------------------------------------------------------
// Configurations
// ---------------------------------------------------------------------------

/// Load a YAML or JSON configuration, filling `device.platform` and
/// `device.board` from `[device]` when the file leaves them out.
fn load_configuration(config: &AppConfig, file: &Path) -> Result<Configuration> {
    let text = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("cannot read configuration {}", file.display()))?;
    let mut doc: serde_yaml::Value = serde_yaml::from_str(&text)
        .wrap_err_with(|| format!("{} is not valid YAML or JSON", file.display()))?;

    if let serde_yaml::Value::Mapping(root) = &mut doc {
        let device = root
            .entry("device".into())
            .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        if let serde_yaml::Value::Mapping(device) = device {
            device
                .entry("platform".into())
                .or_insert_with(|| config.device.platform.clone().into());
            device
                .entry("board".into())
                .or_insert_with(|| config.device.board.clone().into());
        }
    }

    serde_yaml::from_value(doc)
        .wrap_err_with(|| format!("{} is not a valid configuration", file.display()))
}

async fn cmd_validate(config: &AppConfig, db_path: &Path, file: &Path) -> Result<()> {
    let configuration = load_configuration(config, file)?;
    let catalog = open_catalog(db_path).await?.load_catalog().await?;

    let report = validate(&configuration, &catalog);
    if report.is_valid() {
        println!("{}: valid", file.display());
        return Ok(());
    }

    let grouped = group_by_instance(&report);
    let mut ids: Vec<&str> = grouped.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        println!("{id}:");
        for e in &grouped[id] {
            println!("  [{}] {}", e.code, e.message);
        }
    }
    Err(eyre!("{} validation error(s)", report.errors().len()))
}

async fn cmd_generate(
    config: &AppConfig,
    db_path: &Path,
    file: &Path,
    out: Option<&Path>,
    force: bool,
) -> Result<()> {
    let configuration = load_configuration(config, file)?;
    let catalog = open_catalog(db_path).await?.load_catalog().await?;

    let report = validate(&configuration, &catalog);
    if !report.is_valid() {
        for e in report.errors() {
            eprintln!("  {e}");
        }
        if !force {
            return Err(eyre!(
                "{} validation error(s); fix them or pass --force",
                report.errors().len()
            ));
        }
        warn!(errors = report.errors().len(), "generating despite validation errors");
    }

    let yaml = generate(&configuration, &catalog)?;
    match out {
        Some(path) => {
            std::fs::write(path, &yaml)
                .wrap_err_with(|| format!("cannot write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{yaml}"),
    }
    Ok(())
}

fn cmd_secrets(config: &AppConfig, file: &Path) -> Result<()> {
    let configuration = load_configuration(config, file)?;
    print!("{}", secrets_template(&configuration));
    Ok(())
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
