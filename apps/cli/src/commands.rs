//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use govsite_core::{
    ImportOptions, ListingRequest, SourceSyncResult, SyncFilter, SyncProgress, build_listing,
    import_sources_from_path, sync_sources,
};
use govsite_pages::{
    Capability, EntityKind, EntityRegistry, Registration, enhance_document,
    register_button_entities, render_entity_link,
};
use govsite_shared::{
    AppConfig, ContentSource, GovsiteError, SyncConfig, format_timestamp, init_config,
    load_config,
};
use govsite_storage::{SourceFilter, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// govsite: content discovery administration for the site.
#[derive(Parser)]
#[command(
    name = "govsite",
    version,
    about = "Import and sync content discovery sources, list discovered items, and enhance rendered pages.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Database path (overrides the config file).
    #[arg(long, env = "GOVSITE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Manage sites.
    Sites {
        #[command(subcommand)]
        action: SiteAction,
    },

    /// Manage the tag vocabulary.
    Tags {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Manage content discovery sources.
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Fetch sources and upsert their entries as external items.
    Sync {
        /// Only sync these source IDs (repeatable).
        #[arg(long = "source-id")]
        source_ids: Vec<i64>,

        /// Only sync sources of this site.
        #[arg(long)]
        site_id: Option<i64>,

        /// HTTP timeout per source, in seconds.
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Browse and moderate discovered items.
    Items {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Rendered page tooling.
    Pages {
        #[command(subcommand)]
        action: PageAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum SiteAction {
    /// Add a site.
    Add {
        hostname: String,

        #[arg(long, default_value = "80")]
        port: u16,

        /// Mark as the default site.
        #[arg(long)]
        default: bool,
    },
    /// List sites.
    List,
}

#[derive(Subcommand)]
pub(crate) enum TagAction {
    /// Add a tag to the vocabulary.
    Add {
        slug: String,

        /// Display name (defaults to the slug).
        #[arg(long)]
        name: Option<String>,
    },
    /// List tags.
    List,
}

#[derive(Subcommand)]
pub(crate) enum SourceAction {
    /// Create or update sources from a CSV file.
    Import {
        /// Path to the CSV file.
        csv_path: PathBuf,

        /// Site for rows without a site_id value.
        #[arg(long)]
        site_id: Option<i64>,

        /// Field delimiter (defaults to the configured one).
        #[arg(long)]
        delimiter: Option<String>,

        /// Reject rows for any site other than --site-id.
        #[arg(long, requires = "site_id")]
        only_site: bool,
    },
    /// List sources.
    List {
        #[arg(long)]
        site_id: Option<i64>,
    },
    /// Fetch a source and print its entries without storing anything.
    Preview {
        source_id: i64,

        /// HTTP timeout in seconds.
        #[arg(long)]
        timeout: Option<f64>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ItemAction {
    /// Print one listing page.
    List {
        /// Tags configured on the listing (repeatable). Empty lists everything.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Visitor tag filter.
        #[arg(long)]
        selected_tag: Option<String>,

        /// Visitor source filter.
        #[arg(long)]
        source: Option<i64>,

        #[arg(long)]
        page: Option<String>,

        /// Print the page as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Hide an item from listings.
    Hide { id: i64 },
    /// Show a previously hidden item again.
    Unhide { id: i64 },
}

#[derive(Subcommand)]
pub(crate) enum PageAction {
    /// Apply the public page enhancements to a rendered HTML file.
    Enhance {
        input: PathBuf,

        /// Write the result here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Register the rich-text button entities and list them.
    Entities {
        /// Capabilities the editor lacks (repeatable).
        #[arg(long = "without", value_enum)]
        without: Vec<CapabilityArg>,
    },
    /// Render a button entity as public HTML.
    Button {
        /// Entity type: BUTTON_LINK or START_BUTTON_LINK.
        kind: String,
        url: String,
        text: String,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum CapabilityArg {
    EntityRegistry,
    LinkSource,
    Decorators,
}

impl From<CapabilityArg> for Capability {
    fn from(arg: CapabilityArg) -> Self {
        match arg {
            CapabilityArg::EntityRegistry => Capability::EntityRegistry,
            CapabilityArg::LinkSource => Capability::LinkSource,
            CapabilityArg::Decorators => Capability::Decorators,
        }
    }
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
        0 => "govsite=info",
        1 => "govsite=debug",
        _ => "govsite=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config = load_config()?;
    let db = cli.db.as_deref();

    match cli.command {
        Command::Sites { action } => match action {
            SiteAction::Add {
                hostname,
                port,
                default,
            } => cmd_site_add(&config, db, &hostname, port, default).await,
            SiteAction::List => cmd_site_list(&config, db).await,
        },
        Command::Tags { action } => match action {
            TagAction::Add { slug, name } => cmd_tag_add(&config, db, &slug, name.as_deref()).await,
            TagAction::List => cmd_tag_list(&config, db).await,
        },
        Command::Sources { action } => match action {
            SourceAction::Import {
                csv_path,
                site_id,
                delimiter,
                only_site,
            } => {
                let mut options = match (only_site, site_id) {
                    (true, Some(id)) => ImportOptions::for_site_upload(id),
                    _ => ImportOptions {
                        default_site_id: site_id,
                        ..ImportOptions::default()
                    },
                };
                options.delimiter = delimiter.unwrap_or_else(|| config.import.delimiter.clone());
                cmd_source_import(&config, db, &csv_path, &options).await
            }
            SourceAction::List { site_id } => cmd_source_list(&config, db, site_id).await,
            SourceAction::Preview { source_id, timeout } => {
                cmd_source_preview(&config, db, source_id, timeout).await
            }
        },
        Command::Sync {
            source_ids,
            site_id,
            timeout,
        } => {
            let filter = SyncFilter {
                source_ids,
                site_id,
            };
            cmd_sync(&config, db, &filter, timeout).await
        }
        Command::Items { action } => match action {
            ItemAction::List {
                tags,
                selected_tag,
                source,
                page,
                json,
            } => {
                let request = ListingRequest {
                    tag_slugs: tags,
                    selected_tag,
                    selected_source: source,
                    page,
                };
                cmd_item_list(&config, db, &request, json).await
            }
            ItemAction::Hide { id } => cmd_item_hidden(&config, db, id, true).await,
            ItemAction::Unhide { id } => cmd_item_hidden(&config, db, id, false).await,
        },
        Command::Pages { action } => match action {
            PageAction::Enhance { input, out } => cmd_page_enhance(&config, &input, out.as_deref()),
            PageAction::Entities { without } => cmd_page_entities(&without),
            PageAction::Button { kind, url, text } => cmd_page_button(&kind, &url, &text),
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn database_path(config: &AppConfig, db: Option<&Path>) -> Result<PathBuf> {
    match db {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(config.database.resolve_path()?),
    }
}

/// Open the database for commands that write.
async fn open_storage(config: &AppConfig, db: Option<&Path>) -> Result<Storage> {
    let path = database_path(config, db)?;
    info!(path = %path.display(), "opening database");
    Ok(Storage::open(&path).await?)
}

/// Open the database for listing commands.
async fn open_storage_readonly(config: &AppConfig, db: Option<&Path>) -> Result<Storage> {
    let path = database_path(config, db)?;
    if !path.is_file() {
        return Err(eyre!(
            "no database at '{}': import sources or add a site first",
            path.display()
        ));
    }
    info!(path = %path.display(), "opening database read-only");
    Ok(Storage::open_readonly(&path).await?)
}

fn sync_config(config: &AppConfig, timeout: Option<f64>) -> Result<SyncConfig> {
    let mut sync = SyncConfig::from(config);
    if let Some(secs) = timeout {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(eyre!("--timeout must be a positive number of seconds"));
        }
        sync.timeout = Duration::from_secs_f64(secs);
    }
    Ok(sync)
}

// ---------------------------------------------------------------------------
// Sites and tags
// ---------------------------------------------------------------------------

async fn cmd_site_add(
    config: &AppConfig,
    db: Option<&Path>,
    hostname: &str,
    port: u16,
    default: bool,
) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let site = storage.insert_site(hostname, port, default).await?;
    println!("Created site {} ({}:{})", site.id, site.hostname, site.port);
    Ok(())
}

async fn cmd_site_list(config: &AppConfig, db: Option<&Path>) -> Result<()> {
    let storage = open_storage_readonly(config, db).await?;
    for site in storage.list_sites().await? {
        let marker = if site.is_default { " (default)" } else { "" };
        println!("{:>4}  {}:{}{marker}", site.id, site.hostname, site.port);
    }
    Ok(())
}

async fn cmd_tag_add(
    config: &AppConfig,
    db: Option<&Path>,
    slug: &str,
    name: Option<&str>,
) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let tag = storage.insert_tag(slug, name.unwrap_or(slug)).await?;
    println!("Created tag {} ({})", tag.slug, tag.name);
    Ok(())
}

async fn cmd_tag_list(config: &AppConfig, db: Option<&Path>) -> Result<()> {
    let storage = open_storage_readonly(config, db).await?;
    for tag in storage.list_tags().await? {
        println!("{:>4}  {:<24} {}", tag.id, tag.slug, tag.name);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

async fn cmd_source_import(
    config: &AppConfig,
    db: Option<&Path>,
    csv_path: &Path,
    options: &ImportOptions,
) -> Result<()> {
    let storage = open_storage(config, db).await?;
    info!(path = %csv_path.display(), "importing content discovery sources");

    let report = import_sources_from_path(&storage, csv_path, options).await?;

    println!("{}", report.summary_line());
    if report.has_failures() {
        for line in report.failure_lines() {
            eprintln!("  {line}");
        }
        return Err(eyre!("{} row(s) failed to import", report.failed));
    }
    Ok(())
}

async fn cmd_source_list(config: &AppConfig, db: Option<&Path>, site_id: Option<i64>) -> Result<()> {
    let storage = open_storage_readonly(config, db).await?;
    let filter = SourceFilter {
        site_id,
        ..SourceFilter::default()
    };
    let tags = storage.list_tags().await?;
    for source in storage.list_sources(&filter).await? {
        let tag_slugs: Vec<&str> = source
            .default_tag_ids
            .iter()
            .filter_map(|id| tags.iter().find(|t| t.id == *id))
            .map(|t| t.slug.as_str())
            .collect();
        let tls = if source.disable_tls_verification {
            "  [tls off]"
        } else {
            ""
        };
        println!(
            "{:>4}  site {:<3} {}  <{}>{tls}  tags: {}",
            source.id,
            source.site_id,
            source.label(),
            source.url,
            if tag_slugs.is_empty() {
                "-".to_string()
            } else {
                tag_slugs.join("|")
            }
        );
    }
    Ok(())
}

async fn cmd_source_preview(
    config: &AppConfig,
    db: Option<&Path>,
    source_id: i64,
    timeout: Option<f64>,
) -> Result<()> {
    let storage = open_storage_readonly(config, db).await?;
    let source = storage
        .get_source(source_id)
        .await?
        .ok_or_else(|| eyre!("no content discovery source with id {source_id}"))?;
    let sync = sync_config(config, timeout)?;

    let entries = govsite_feeds::fetch_source_entries(&source, &sync).await?;
    println!("{} entries from {}", entries.len(), source.url);
    for entry in &entries {
        let when = entry
            .updated_at
            .or(entry.created_at)
            .map(|ts| format_timestamp(&ts))
            .unwrap_or_else(|| "-".into());
        println!("  [{}] {when}  {}", entry.format.as_str(), entry.url);
        if !entry.title.is_empty() {
            println!("      {}", entry.title);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

async fn cmd_sync(
    config: &AppConfig,
    db: Option<&Path>,
    filter: &SyncFilter,
    timeout: Option<f64>,
) -> Result<()> {
    let storage = open_storage(config, db).await?;
    let sync = sync_config(config, timeout)?;

    let reporter = CliProgress::new();
    let report = sync_sources(&storage, filter, &sync, &reporter).await?;
    reporter.spinner.finish_and_clear();

    for result in &report.results {
        println!(
            "  {}: {} entries, created {}, updated {}, skipped {}",
            result.source_label, result.total_entries, result.created, result.updated, result.skipped
        );
    }
    let totals = report.totals();
    println!();
    println!(
        "  Synced {} source(s): created {}, updated {}, skipped {} in {:.1}s",
        report.results.len(),
        totals.created,
        totals.updated,
        totals.skipped,
        report.elapsed_ms as f64 / 1000.0
    );

    if report.has_failures() {
        for failure in &report.failures {
            eprintln!("  Failed {} ({}): {}", failure.source_label, failure.source_url, failure.error);
        }
        return Err(eyre!("{} source(s) failed to sync", report.failures.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl SyncProgress for CliProgress {
    fn source_started(&self, source: &ContentSource, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Syncing [{current}/{total}] {}", source.label()));
    }

    fn source_finished(&self, result: &SourceSyncResult) {
        self.spinner.set_message(format!(
            "Synced {} ({} entries)",
            result.source_label, result.total_entries
        ));
    }

    fn source_failed(&self, source: &ContentSource, error: &GovsiteError) {
        self.spinner
            .println(format!("  ! {}: {error}", source.label()));
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

async fn cmd_item_list(
    config: &AppConfig,
    db: Option<&Path>,
    request: &ListingRequest,
    json: bool,
) -> Result<()> {
    let storage = open_storage_readonly(config, db).await?;
    let listing = build_listing(&storage, request).await?;

    if json {
        let value = serde_json::json!({
            "page": listing.page.page,
            "total_pages": listing.page.total_pages,
            "total_items": listing.page.total_items,
            "selected_tag": listing.selected_tag.as_ref().map(|t| &t.slug),
            "selected_source": listing.selected_source.as_ref().map(|(id, _)| id),
            "sources": listing
                .available_sources
                .iter()
                .map(|(id, label)| serde_json::json!({ "id": id, "label": label }))
                .collect::<Vec<_>>(),
            "items": listing.page.items,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "Page {} of {} ({} item(s))",
        listing.page.page, listing.page.total_pages, listing.page.total_items
    );
    for item in &listing.page.items {
        let when = item
            .updated_at
            .or(item.created_at)
            .or(item.published_at)
            .unwrap_or(item.last_seen_at);
        println!("{:>6}  {}  {}", item.id, format_timestamp(&when), item.label());
        println!("        {}", item.url);
    }
    if !listing.available_sources.is_empty() {
        println!();
        println!("Sources:");
        for (id, label) in &listing.available_sources {
            println!("{:>6}  {label}", id);
        }
    }
    Ok(())
}

async fn cmd_item_hidden(config: &AppConfig, db: Option<&Path>, id: i64, hidden: bool) -> Result<()> {
    let storage = open_storage(config, db).await?;
    if !storage.set_item_hidden(id, hidden).await? {
        return Err(eyre!("no external item with id {id}"));
    }
    println!("Item {id} {}", if hidden { "hidden" } else { "visible" });
    Ok(())
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

fn cmd_page_enhance(config: &AppConfig, input: &Path, out: Option<&Path>) -> Result<()> {
    let html = std::fs::read_to_string(input)
        .map_err(|e| GovsiteError::io(input, e))?;
    let page = enhance_document(&html, &config.pages)?;
    let report = &page.report;
    info!(
        clickable_cards = report.clickable_cards,
        links_styled = report.links_styled,
        inverse_links = report.inverse_links,
        headings = report.headings.len(),
        navigation = ?report.navigation,
        start_icons_added = report.start_icons_added,
        "page enhanced"
    );

    match out {
        Some(path) => {
            std::fs::write(path, &page.html).map_err(|e| GovsiteError::io(path, e))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", page.html),
    }
    Ok(())
}

fn cmd_page_entities(without: &[CapabilityArg]) -> Result<()> {
    let missing: Vec<Capability> = without.iter().copied().map(Capability::from).collect();
    let mut registry = EntityRegistry::with_capabilities(
        Capability::ALL
            .iter()
            .copied()
            .filter(|c| !missing.contains(c)),
    );

    match register_button_entities(&mut registry)? {
        Registration::Skipped { missing } => {
            println!("Editor lacks {missing:?}; button entities not registered");
        }
        Registration::Registered { added } => {
            println!("Registered {} entity type(s)", added.len());
            for definition in registry.definitions() {
                println!(
                    "  {:<20} {:<20} source: {}",
                    definition.type_name, definition.label, definition.source
                );
            }
        }
    }
    Ok(())
}

fn cmd_page_button(kind: &str, url: &str, text: &str) -> Result<()> {
    let kind = EntityKind::from_type_name(kind).ok_or_else(|| {
        eyre!("unknown entity type '{kind}': expected 'BUTTON_LINK' or 'START_BUTTON_LINK'")
    })?;
    println!("{}", render_entity_link(kind, url, text));
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
