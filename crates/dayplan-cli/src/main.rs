mod block_cmds;
mod config;
mod plan_cmds;
mod serve_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use dayplan_core::store::{MemoryPlanStore, PgPlanStore};
use dayplan_db::pool;

use config::DayplanConfig;

#[derive(Parser)]
#[command(name = "dayplan", about = "Daily plan execution-chain scheduler")]
struct Cli {
    /// Database URL (overrides DAYPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a dayplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/dayplan")]
        db_url: String,
        /// Name of the home location used for travel estimates
        #[arg(long)]
        home: Option<String>,
        /// Default anchors file for `plan generate` and `serve`
        #[arg(long)]
        anchors: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the dayplan database (requires config file or env vars)
    DbInit,
    /// Daily plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Time block operations
    Block {
        #[command(subcommand)]
        command: BlockCommands,
    },
    /// Serve the plan API over HTTP
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// TOML file of calendar anchors (overrides the config file)
        #[arg(long)]
        anchors: Option<PathBuf>,
        /// Keep plans in process memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Generate (or regenerate) a user's plan for a date
    Generate(plan_cmds::GenerateArgs),
    /// Show a user's plan for a date
    Show {
        /// User the plan belongs to
        #[arg(long)]
        user: String,
        /// Plan date, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a chain step onto another step's position and reflow the chain
    Reorder {
        /// User the plan belongs to
        #[arg(long)]
        user: String,
        /// Plan date, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        /// Step ID to move
        source: String,
        /// Step ID whose position it takes
        target: String,
    },
}

impl PlanCommands {
    fn in_memory(&self) -> bool {
        matches!(self, Self::Generate(args) if args.in_memory)
    }
}

#[derive(Subcommand)]
pub enum BlockCommands {
    /// Merge a JSON object into a time block's metadata
    MergeMetadata {
        /// User the block's plan belongs to
        #[arg(long)]
        user: String,
        /// Time block ID
        block_id: Uuid,
        /// JSON object to merge, e.g. '{"note": "bring charger"}'
        patch: String,
    },
}

/// Execute the `dayplan init` command: write config file.
fn cmd_init(
    db_url: &str,
    home: Option<String>,
    anchors: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_owned(),
        },
        scheduler: dayplan_core::SchedulerConfig::default(),
        home: config::HomeSection {
            location: home,
            anchors_file: anchors,
        },
    };
    config::save_config_to(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    if let Some(location) = &cfg.home.location {
        println!("  home.location = {location}");
    }
    if let Some(file) = &cfg.home.anchors_file {
        println!("  home.anchors_file = {}", file.display());
    }
    println!();
    println!("Next: run `dayplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `dayplan db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = DayplanConfig::resolve(cli_db_url)?;

    println!("Initializing dayplan database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("dayplan db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            home,
            anchors,
            force,
        } => {
            cmd_init(&db_url, home, anchors, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Plan { command } => {
            let resolved = DayplanConfig::resolve(cli.database_url.as_deref())?;
            if command.in_memory() {
                let store = Arc::new(MemoryPlanStore::new());
                plan_cmds::run_plan_command(command, &resolved, store).await?;
            } else {
                let db_pool = pool::create_pool(&resolved.db_config).await?;
                let store = Arc::new(PgPlanStore::new(db_pool.clone()));
                let result = plan_cmds::run_plan_command(command, &resolved, store).await;
                db_pool.close().await;
                result?;
            }
        }
        Commands::Block { command } => {
            let resolved = DayplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let store = Arc::new(PgPlanStore::new(db_pool.clone()));
            let result = block_cmds::run_block_command(command, &resolved, store).await;
            db_pool.close().await;
            result?;
        }
        Commands::Serve {
            bind,
            port,
            anchors,
            in_memory,
        } => {
            let resolved = DayplanConfig::resolve(cli.database_url.as_deref())?;
            let anchors = plan_cmds::anchor_provider(anchors.as_deref(), &resolved)?;
            if in_memory {
                let store = Arc::new(MemoryPlanStore::new());
                serve_cmd::run_serve(anchors, store, &resolved.scheduler, &bind, port).await?;
            } else {
                let db_pool = pool::create_pool(&resolved.db_config).await?;
                let store = Arc::new(PgPlanStore::new(db_pool.clone()));
                let result =
                    serve_cmd::run_serve(anchors, store, &resolved.scheduler, &bind, port).await;
                db_pool.close().await;
                result?;
            }
        }
    }

    Ok(())
}
