//! CLI binary for phrasecast.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use phrasecast::config::PhrasecastConfig;
use phrasecast::dispatch::{ChannelBoundary, InstanceId, RenderRequest, UpdateDispatcher};
use phrasecast::interval::{cadence_label, schedule_offsets};
use phrasecast::storage::{KeyValueStore, SqliteStore};
use phrasecast::{
    ContentStore, CriteriaStore, SavedItemLedger, Scheduler, SurfaceKey, SurfaceRegistry, Tier,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Phrasecast: deliver short learning sentences to display surfaces.
#[derive(Parser)]
#[command(name = "phrasecast", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and print delivered items until Ctrl-C.
    Run,

    /// Run a single tick now and print the report.
    Tick,

    /// Show criteria, surfaces and their cadence.
    Status,

    /// Set how many items per day a surface receives.
    Frequency {
        /// Surface key (`main`, `list`, `hero`, ...).
        surface: String,
        /// Items per day, clamped to 1..=10.
        items_per_day: i64,
    },

    /// Choose tiers and topics; completes onboarding.
    Criteria {
        /// Selected tier, repeatable (`A1`..`C2` or `1`..`6`).
        #[arg(long = "tier", required = true)]
        tiers: Vec<Tier>,
        /// Primary tier; defaults to the lowest selected tier.
        #[arg(long)]
        primary: Option<Tier>,
        /// Selected topic, repeatable.
        #[arg(long = "topic")]
        topics: Vec<String>,
    },

    /// Toggle a saved item by id.
    Save {
        /// Catalog item id.
        id: u64,
    },

    /// List saved items, newest first.
    Saved,
}

/// Everything the commands need, wired once.
struct App {
    config: PhrasecastConfig,
    content: Arc<ContentStore>,
    registry: Arc<SurfaceRegistry>,
    criteria: Arc<CriteriaStore>,
    ledger: SavedItemLedger,
}

impl App {
    fn open(config: PhrasecastConfig) -> anyhow::Result<Self> {
        let db_path = config.storage.database_path();
        let store: Arc<dyn KeyValueStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("cannot open store at {}", db_path.display()))?,
        );
        debug!(path = %db_path.display(), "opened key-value store");

        let content = match &config.catalog.path {
            Some(path) => ContentStore::from_file(path)
                .with_context(|| format!("cannot load catalog {}", path.display()))?,
            None => ContentStore::bundled()?,
        };
        info!(items = content.len(), "catalog loaded");

        let registry = SurfaceRegistry::load(
            Arc::clone(&store),
            config.schedule.calculator(),
            &config.surface_defaults(),
        )?;
        let criteria = CriteriaStore::load(Arc::clone(&store))?;
        let ledger = SavedItemLedger::load(store)?;

        Ok(Self {
            config,
            content: Arc::new(content),
            registry: Arc::new(registry),
            criteria: Arc::new(criteria),
            ledger,
        })
    }

    /// Scheduler over a channel boundary with one placed instance per surface.
    fn scheduler(&self) -> (Scheduler, mpsc::UnboundedReceiver<RenderRequest>) {
        let (boundary, requests) = ChannelBoundary::new();
        for key in self.registry.keys() {
            boundary.place(&key, InstanceId::random());
        }
        let dispatcher = UpdateDispatcher::new(Arc::new(boundary))
            .with_timeout(self.config.dispatch.timeout());
        let scheduler = Scheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.content),
            Arc::clone(&self.criteria),
            dispatcher,
        )
        .with_retry_policy(self.config.schedule.retry_policy())
        .with_tick_timeout(self.config.schedule.tick_timeout());
        (scheduler, requests)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(PhrasecastConfig::default_config_path);
    let config = PhrasecastConfig::load_or_default(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = App::open(config)?;

    match cli.command.unwrap_or(Command::Status) {
        Command::Run => run(&app).await,
        Command::Tick => tick(&app).await,
        Command::Status => status(&app),
        Command::Frequency {
            surface,
            items_per_day,
        } => frequency(&app, &surface, items_per_day).await,
        Command::Criteria {
            tiers,
            primary,
            topics,
        } => criteria(&app, tiers, primary, topics).await,
        Command::Save { id } => save(&app, id).await,
        Command::Saved => saved(&app),
    }
}

async fn run(app: &App) -> anyhow::Result<()> {
    let (scheduler, requests) = app.scheduler();
    let cancel = CancellationToken::new();

    let printer = tokio::spawn(print_renders(requests));
    let runner = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    println!("phrasecast v{} running, Ctrl-C to stop", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();
    runner.await?;
    printer.abort();

    app.registry.flush().await?;
    Ok(())
}

async fn tick(app: &App) -> anyhow::Result<()> {
    let (scheduler, requests) = app.scheduler();
    let printer = tokio::spawn(print_renders(requests));

    let result = scheduler.tick().await;
    printer.abort();

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_renders(mut requests: mpsc::UnboundedReceiver<RenderRequest>) {
    while let Some(request) = requests.recv().await {
        println!(
            "[{}] {} ({}, {}): {}",
            request.surface,
            request.item.text,
            request.item.tier,
            request.item.topic,
            request.item.translation
        );
        let _ = request.ack.send(request.instances.len());
    }
}

fn status(app: &App) -> anyhow::Result<()> {
    let criteria = app.criteria.current();
    let tiers: Vec<String> = criteria
        .selected_tiers
        .iter()
        .map(ToString::to_string)
        .collect();
    let topics: Vec<&str> = criteria.selected_topics.iter().map(String::as_str).collect();
    println!("onboarding:  {}", if criteria.onboarding_completed { "complete" } else { "pending" });
    println!("tiers:       {} (primary {})", tiers.join(", "), criteria.primary_tier);
    println!("topics:      {}", topics.join(", "));
    println!("saved items: {}", app.ledger.len());

    match app.registry.shared_interval_minutes() {
        Some(minutes) => println!("tick every:  {minutes} min"),
        None => println!("tick every:  (no surfaces)"),
    }

    let calculator = app.registry.calculator();
    for surface in app.registry.configs() {
        let items = i64::from(surface.items_per_day);
        let offsets: Vec<String> = calculator
            .schedule_times(items)
            .iter()
            .map(|t| t.format("%H:%M").to_string())
            .collect();
        println!();
        println!("[{}]", surface.key);
        println!(
            "  {} per day, {} ({} min)",
            surface.items_per_day,
            cadence_label(items),
            calculator.minutes_between_updates(items)
        );
        println!("  last update: {}", format_millis(surface.last_update, "never"));
        println!(
            "  next due:    {}",
            format_millis(surface.next_due_at(calculator), "now")
        );
        println!(
            "  slots:       {} (offsets {:?})",
            offsets.join(" "),
            schedule_offsets(items)
        );
    }
    Ok(())
}

async fn frequency(app: &App, surface: &str, items_per_day: i64) -> anyhow::Result<()> {
    let key = SurfaceKey::new(surface);
    let config = app.registry.set_items_per_day(&key, items_per_day)?;
    app.registry.flush().await?;
    println!(
        "{}: {} per day ({})",
        config.key,
        config.items_per_day,
        cadence_label(i64::from(config.items_per_day))
    );
    Ok(())
}

async fn criteria(
    app: &App,
    tiers: Vec<Tier>,
    primary: Option<Tier>,
    topics: Vec<String>,
) -> anyhow::Result<()> {
    let tiers: BTreeSet<Tier> = tiers.into_iter().collect();
    let primary = primary
        .or_else(|| tiers.iter().next().copied())
        .unwrap_or(Tier::LOWEST);

    let known = app.content.topics();
    for topic in &topics {
        if !known.contains(topic.trim()) {
            anyhow::bail!(
                "unknown topic '{topic}', available: {}",
                known.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }

    let updated = app
        .criteria
        .complete_onboarding(tiers, primary, topics.into_iter().collect());
    app.criteria.flush().await?;
    println!(
        "criteria saved: tiers {:?}, primary {}, topics {:?}",
        updated.selected_tiers, updated.primary_tier, updated.selected_topics
    );
    Ok(())
}

async fn save(app: &App, id: u64) -> anyhow::Result<()> {
    let item = app
        .content
        .get(id)
        .with_context(|| format!("no catalog item with id {id}"))?;
    let now_saved = app.ledger.toggle(item);
    app.ledger.flush().await?;
    println!(
        "{} #{id}: {}",
        if now_saved { "saved" } else { "removed" },
        item.text
    );
    Ok(())
}

fn saved(app: &App) -> anyhow::Result<()> {
    let items = app.ledger.all(&app.content);
    if items.is_empty() {
        println!("no saved items");
        return Ok(());
    }
    for item in items.iter() {
        println!("#{:<4} {} ({}): {}", item.id, item.text, item.tier, item.translation);
    }
    Ok(())
}

fn format_millis(millis: u64, zero: &str) -> String {
    if millis == 0 {
        return zero.to_owned();
    }
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}
