use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use capmap_core::logging::init_tracing;
use capmap_core::{ConfigManager, ProjectionConfig, Settings, StoreContext, TenantId};
use capmap_graph::{GroupingLinkReadModel, TraversalLimits};
use capmap_projectors::{ProjectionRouter, Projector, ReadModelStore};
use capmap_store::{migrate, InMemoryReadModelStore, PgReadModelStore, TenantDb};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "capmap")]
#[command(about = "Capability map read models: migrations, replay and link diagnostics", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Directory holding default/{env}/local configuration files
    #[arg(long, global = true, env = "CAPMAP_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Configuration environment (development, production, ...)
    #[arg(long, global = true)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Project a JSON-lines event file into every read model
    Replay {
        /// Event file, or `-` for stdin
        file: PathBuf,

        /// Tenant for lines that carry no `tenantId`
        #[arg(short, long)]
        tenant: Option<String>,

        /// Project into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Log failed events and continue instead of stopping
        #[arg(long)]
        keep_going: bool,
    },

    /// Link status for a set of capabilities
    Status {
        #[arg(short, long)]
        tenant: String,

        /// Walk the hierarchy instead of reading the blocking cache
        #[arg(long)]
        live: bool,

        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Compare cached and live blocking classification
    CheckBlocking {
        #[arg(short, long)]
        tenant: String,

        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventLine {
    event_type: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplaySummary {
    events: usize,
    projected: usize,
    failed: usize,
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = ConfigManager::load(cli.config_dir.clone(), cli.env.clone())
        .context("Failed to load configuration")?;
    init_tracing(&settings.logging);

    match execute_command(&cli, &settings).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn execute_command(cli: &Cli, settings: &Settings) -> Result<Value> {
    match &cli.command {
        Commands::Migrate => {
            let db = connect(settings).await?;
            let applied = migrate(&db).await.context("applying migrations")?;
            Ok(serde_json::json!({ "applied": applied }))
        }
        Commands::Replay {
            file,
            tenant,
            dry_run,
            keep_going,
        } => {
            let fallback = tenant
                .as_deref()
                .map(TenantId::parse)
                .transpose()
                .context("invalid --tenant")?;
            let summary = if *dry_run {
                let store = Arc::new(InMemoryReadModelStore::new());
                replay(store, &settings.projection, file, fallback, *keep_going).await?
            } else {
                let store = Arc::new(PgReadModelStore::new(connect_migrated(settings).await?));
                replay(store, &settings.projection, file, fallback, *keep_going).await?
            };
            Ok(serde_json::to_value(ReplaySummary {
                dry_run: *dry_run,
                ..summary
            })?)
        }
        Commands::Status { tenant, live, ids } => {
            let ctx = StoreContext::for_tenant(TenantId::parse(tenant.as_str())?);
            let links = link_model(settings).await?;
            let statuses = if *live {
                links.live_status(&ctx, ids).await?
            } else {
                links.batch_status(&ctx, ids).await?
            };
            Ok(serde_json::to_value(statuses)?)
        }
        Commands::CheckBlocking { tenant, ids } => {
            let ctx = StoreContext::for_tenant(TenantId::parse(tenant.as_str())?);
            let links = link_model(settings).await?;
            let mismatches = links.compare_blocking_strategies(&ctx, ids).await?;
            Ok(serde_json::json!({
                "checked": ids.len(),
                "mismatches": mismatches,
            }))
        }
    }
}

async fn connect(settings: &Settings) -> Result<TenantDb> {
    TenantDb::connect(&settings.database)
        .await
        .context("connecting to the read-model database")
}

async fn connect_migrated(settings: &Settings) -> Result<TenantDb> {
    let db = connect(settings).await?;
    if settings.database.run_migrations {
        let applied = migrate(&db).await.context("applying migrations")?;
        if !applied.is_empty() {
            info!(?applied, "migrations applied on startup");
        }
    }
    Ok(db)
}

async fn link_model(settings: &Settings) -> Result<GroupingLinkReadModel<PgReadModelStore>> {
    let store = Arc::new(PgReadModelStore::new(connect_migrated(settings).await?));
    Ok(GroupingLinkReadModel::with_limits(
        store,
        TraversalLimits::from(&settings.projection),
    ))
}

fn open_events(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn replay<S>(
    store: Arc<S>,
    projection: &ProjectionConfig,
    path: &Path,
    fallback_tenant: Option<TenantId>,
    keep_going: bool,
) -> Result<ReplaySummary>
where
    S: ReadModelStore + 'static,
{
    let router = ProjectionRouter::for_store(store, projection);
    let mut summary = ReplaySummary::default();

    for (index, line) in open_events(path)?.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("reading line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        summary.events += 1;

        let event: EventLine = serde_json::from_str(&line)
            .with_context(|| format!("line {line_no}: not an event envelope"))?;
        let tenant = match (event.tenant_id.as_deref(), fallback_tenant.as_ref()) {
            (Some(raw), _) => TenantId::parse(raw).with_context(|| format!("line {line_no}"))?,
            (None, Some(tenant)) => tenant.clone(),
            (None, None) => bail!("line {line_no}: no tenantId and no --tenant given"),
        };
        let ctx = StoreContext::for_tenant(tenant);
        let payload = serde_json::to_vec(&event.payload)?;

        match router.project_event(&ctx, &event.event_type, &payload).await {
            Ok(()) => summary.projected += 1,
            Err(err) if keep_going => {
                warn!(line = line_no, event_type = %event.event_type, error = %err, "event skipped");
                summary.failed += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("line {line_no}: projecting {}", event.event_type)
                })
            }
        }
    }

    info!(
        events = summary.events,
        projected = summary.projected,
        failed = summary.failed,
        "replay finished"
    );
    Ok(summary)
}

fn print_output(format: &OutputFormat, value: &Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => print_pretty(value, 0),
    }
    Ok(())
}

fn print_pretty(value: &Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{pad}{key_colored}:");
                        print_pretty(val, indent + 1);
                    }
                    Value::String(s) => println!("{pad}{key_colored}: {}", status_colored(s)),
                    Value::Number(n) => println!("{pad}{key_colored}: {}", n.to_string().yellow()),
                    Value::Bool(b) => {
                        let shown = if *b { "true".green() } else { "false".red() };
                        println!("{pad}{key_colored}: {shown}");
                    }
                    Value::Null => println!("{pad}{key_colored}: {}", "null".dimmed()),
                }
            }
        }
        Value::Array(items) => {
            if items.is_empty() {
                println!("{pad}{}", "(none)".dimmed());
            }
            for item in items {
                println!("{pad}{}", "-".dimmed());
                print_pretty(item, indent + 1);
            }
        }
        other => println!("{pad}{other}"),
    }
}

fn status_colored(value: &str) -> colored::ColoredString {
    match value {
        "linked" => value.green().bold(),
        "available" => value.green(),
        "blocked_by_parent" | "blocked_by_child" => value.red(),
        _ => value.normal(),
    }
}
