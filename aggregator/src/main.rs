use aggregator::app::App;
use aggregator::ingest::AdapterKind;
use auction_core::{telemetry, Config};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use std::process;
use tracing::{error, info, warn};

#[derive(Parser)]
#[clap(name = "aggregator")]
#[clap(about = "Collectibles auction aggregator", version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,

    /// Run the scheduler until interrupted
    Run {
        /// Register the default scrape and cleanup jobs at startup
        #[clap(long, env = "ENABLE_SCHEDULER")]
        enable_scheduler: bool,
    },

    /// Run one adapter through the ingest pipeline
    Scrape {
        adapter: AdapterKind,

        #[clap(long)]
        max_items: Option<usize>,

        /// Fetch and normalize without writing to the database
        #[clap(long)]
        dry_run: bool,
    },

    /// Check adapter health (all adapters when none is given)
    Health { adapter: Option<AdapterKind> },

    /// Mark Live items whose end time has passed as Ended
    Sweep,

    /// Delete items that ended more than --days-old days ago
    Cleanup {
        #[clap(long)]
        days_old: Option<i64>,
    },

    /// Record today's price of every Live item and prune old snapshots
    Snapshot,

    /// Show the daily price history of one item
    History {
        source: AdapterKind,
        external_id: String,

        #[clap(long, default_value_t = 30)]
        days: i64,
    },

    /// List the jobs that can be scheduled
    Jobs,

    /// Manage stored site credentials
    Credentials {
        #[clap(subcommand)]
        command: CredentialCommands,
    },

    /// Log in to a site with stored credentials and persist the session
    Login { user_id: i64, site: String },

    /// Deactivate a user's sessions for a site
    Logout { user_id: i64, site: String },

    /// Place a bid through the site's bid dialog
    Bid {
        user_id: i64,
        site: String,
        item_url: String,
        amount: Decimal,
    },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Store or rotate credentials
    Store {
        user_id: i64,
        site: String,
        username: String,

        #[clap(long, env = "SITE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show credential status for a user
    Status { user_id: i64 },

    /// Delete credentials and their sessions
    Delete { user_id: i64, site: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    let cli = Cli::parse();

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(std::time::Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    let app = || App::new(config.clone(), pool.clone());

    match cli.command {
        Commands::Migrate => {
            info!("Running database migrations");
            sqlx::migrate!("../migrations").run(&pool).await?;
            info!("Migrations completed successfully");
        }

        Commands::Run { enable_scheduler } => {
            info!(enable_scheduler, "Starting scheduler");
            app().await?.run_service(enable_scheduler).await?;
        }

        Commands::Scrape {
            adapter,
            max_items,
            dry_run,
        } => {
            let report = app().await?.scrape(adapter, max_items, dry_run).await?;
            println!("{adapter}: {report}");
        }

        Commands::Health { adapter } => {
            let mut unhealthy = 0;
            for (kind, result) in app().await?.health(adapter).await? {
                if !result.healthy {
                    unhealthy += 1;
                }
                println!("{kind}: {result}");
            }
            if unhealthy > 0 {
                anyhow::bail!("{unhealthy} adapter(s) unhealthy");
            }
        }

        Commands::Sweep => {
            let ended = app().await?.sweep().await?;
            println!("marked {ended} items as Ended");
        }

        Commands::Cleanup { days_old } => {
            let deleted = app().await?.cleanup(days_old).await?;
            println!("deleted {deleted} items");
        }

        Commands::Snapshot => {
            let report = app().await?.snapshot_prices().await?;
            println!("{report}");
        }

        Commands::History {
            source,
            external_id,
            days,
        } => print_json(&app().await?.price_history(source, &external_id, days).await?)?,

        Commands::Jobs => {
            for job in app().await?.available_jobs() {
                let default = if job.default_enabled { " (default)" } else { "" };
                println!("{:<22} every {:>4} min  {}{default}", job.id, job.default_interval_minutes, job.name);
            }
        }

        Commands::Credentials { command } => {
            let app = app().await?;
            match command {
                CredentialCommands::Store {
                    user_id,
                    site,
                    username,
                    password,
                } => print_json(&app.store_credentials(user_id, &site, &username, &password).await?)?,
                CredentialCommands::Status { user_id } => print_json(&app.vault().status(user_id).await?)?,
                CredentialCommands::Delete { user_id, site } => {
                    if !app.vault().delete(user_id, &site).await? {
                        warn!(user_id, %site, "No credentials to delete");
                    }
                }
            }
        }

        Commands::Login { user_id, site } => {
            let outcome = app().await?.login(user_id, &site).await?;
            print_json(&outcome)?;
            if !outcome.success {
                anyhow::bail!("login failed: {}", outcome.message);
            }
        }

        Commands::Logout { user_id, site } => {
            let deactivated = app().await?.logout(user_id, &site).await?;
            println!("deactivated {deactivated} session(s)");
        }

        Commands::Bid {
            user_id,
            site,
            item_url,
            amount,
        } => print_json(&app().await?.bid(user_id, &site, &item_url, amount).await?)?,
    }

    telemetry::shutdown();
    Ok(())
}
