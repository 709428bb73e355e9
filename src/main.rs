use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidewatch::config::Config;
use tidewatch::crawler::RedditSource;
use tidewatch::error::Error;
use tidewatch::metrics;
use tidewatch::models::Term;
use tidewatch::scheduler::{scrape_term, JobContext, RateEstimator, Scheduler, TaskQueue};
use tidewatch::storage::{filter_super_terms, ItemStore, SqliteItemStore};
use tidewatch::utils::{format_duration, truncate_text};

#[derive(Parser)]
#[command(
    name = "tidewatch",
    version,
    about = "Adaptive per-term Reddit poller with velocity-based scheduling",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json). Overrides the config file.
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Print Prometheus metrics on exit
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,

    /// Scrape one term immediately
    Scrape {
        /// Search term
        term: String,
    },

    /// List tracked terms with their current poll rate
    Terms,

    /// Start tracking a term
    AddTerm {
        /// Search term
        name: String,
    },

    /// Show the poll rate estimate for a term
    Estimate {
        /// Search term
        term: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if cli.metrics {
        metrics::init_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    tracing::info!("tidewatch starting");

    match cli.command {
        Commands::Run => {
            tracing::info!(workers = config.scheduler.workers, "Starting run command");
            run(&config).await?;
        }
        Commands::Scrape { term } => {
            tracing::info!(term = %term, "Starting scrape command");
            scrape(&config, &term).await?;
        }
        Commands::Terms => terms(&config).await?,
        Commands::AddTerm { name } => add_term(&config, &name).await?,
        Commands::Estimate { term } => estimate(&config, &term).await?,
    }

    if cli.metrics {
        let text = metrics::encode_metrics().map_err(|e| anyhow::anyhow!("{e}"))?;
        print!("{text}");
    }

    tracing::info!("tidewatch finished");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("tidewatch=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new(format!("tidewatch={level},warn"))
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<SqliteItemStore>> {
    let store = SqliteItemStore::open(&config.database.sqlite_path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.database.sqlite_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn reddit_source(config: &Config) -> tidewatch::error::Result<Arc<RedditSource>> {
    if !config.reddit.has_credentials() {
        return Err(Error::config(
            "Missing Reddit credentials: set REDDIT_ID and REDDIT_SECRET",
        ));
    }
    Ok(Arc::new(RedditSource::new(
        config.reddit.clone(),
        config.backoff.rate_limit_default(),
    )?))
}

async fn run(config: &Config) -> tidewatch::error::Result<()> {
    let source = reddit_source(config)?;
    let store = open_store(config)?;

    let ctx = JobContext::new(config, store, source, Arc::new(TaskQueue::new()));
    let mut scheduler = Scheduler::new(config, ctx);
    let scheduled = scheduler.setup().await?;
    if scheduled == 0 {
        println!("No terms tracked yet. Add one with `tidewatch add-term <name>`.");
    }

    let handle = scheduler.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        tracing::info!("Ctrl-C received, stopping scheduler");
        handle.stop();
    });

    scheduler.run().await?;
    Ok(())
}

async fn scrape(config: &Config, raw: &str) -> Result<()> {
    let term = Term::new(raw);
    let store = open_store(config)?;
    if !store.list_terms().await?.contains(&term) {
        anyhow::bail!("Term '{term}' is not tracked. Add it with `tidewatch add-term`");
    }

    let source = reddit_source(config)?;
    let known_before = store.known_ids(&term).await?.len();
    let ctx = JobContext::new(config, store, source, Arc::new(TaskQueue::new()));
    let outcome = scrape_term(&ctx, &term).await?;

    println!("Scraped '{term}'");
    println!("  Known before: {known_before}");
    println!("  New items:    {}", outcome.new_items);
    println!("  Persisted:    {}", outcome.persisted);
    println!("  Polls/day:    {}", outcome.polls_per_day);
    println!("  Next in:      {}", format_duration(outcome.interval));

    for sample in ctx.store.recent_samples(&term, 5).await? {
        if let Some(item) = ctx.source.lookup(&sample.id).await.ok().flatten() {
            println!("    {} {}", item.id, truncate_text(&item.title, 70));
        }
    }

    Ok(())
}

async fn terms(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let estimator = RateEstimator::new(config.estimator.clone());

    let all = store.list_terms().await?;
    let active = filter_super_terms(&all);

    println!("{:<32} {:>10} {:>12}", "TERM", "POLLS/DAY", "INTERVAL");
    for term in &active {
        let samples = store
            .recent_samples(term, config.scheduler.sample_window)
            .await?;
        let polls = estimator.estimate(&samples);
        println!(
            "{:<32} {:>10} {:>12}",
            truncate_text(term.as_str(), 32),
            polls,
            format_duration(estimator.interval_for(&samples))
        );
    }

    let skipped: Vec<&Term> = all.iter().filter(|t| !active.contains(t)).collect();
    if !skipped.is_empty() {
        println!();
        println!("Covered by a shorter term (not polled):");
        for term in skipped {
            println!("  {term}");
        }
    }

    Ok(())
}

async fn add_term(config: &Config, raw: &str) -> Result<()> {
    let term = Term::new(raw);
    let store = open_store(config)?;

    if store.add_term(&term).await? {
        println!("Now tracking '{term}'");
    } else {
        println!("'{term}' is already tracked");
    }
    Ok(())
}

async fn estimate(config: &Config, raw: &str) -> Result<()> {
    let term = Term::new(raw);
    let store = open_store(config)?;
    let estimator = RateEstimator::new(config.estimator.clone());

    let samples = store
        .recent_samples(&term, config.scheduler.sample_window)
        .await?;
    let polls = estimator.estimate(&samples);

    println!("Estimate for '{term}'");
    println!("  Samples:   {}", samples.len());
    println!("  Polls/day: {polls}");
    println!(
        "  Interval:  {}",
        format_duration(estimator.interval_for(&samples))
    );
    Ok(())
}
