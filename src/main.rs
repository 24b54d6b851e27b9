//! # Harvest Agent CLI (`agentctl`)
//!
//! ```bash
//! agentctl --config ./config/agent.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `agentctl init` | Create the database schema |
//! | `agentctl invoke <harvester>` | Refresh config and run a harvester if due |
//! | `agentctl records` | List ledger rows |
//! | `agentctl serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use harvest_agent::agent::{Agent, InvokeParams};
use harvest_agent::records::{run_records, RecordsQuery};
use harvest_agent::{config, db, logging, migrate, server};
use harvest_agent_core::ledger::RecordStatus;

#[derive(Parser)]
#[command(
    name = "agentctl",
    about = "Harvest metadata from datasources into a metadata repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Refresh a harvester's configuration and run it if a harvest is due.
    Invoke {
        /// Harvester uid.
        harvester: String,

        /// Datasource uid; defaults to the harvester uid.
        #[arg(long)]
        datasource: Option<String>,

        /// Repository uid; defaults to the harvester uid.
        #[arg(long)]
        repository: Option<String>,

        #[arg(long)]
        repository_url: String,

        /// Username for the CMS and the repository.
        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,

        #[arg(long, default_value = "")]
        institution: String,
    },

    /// List harvested records in the ledger.
    Records {
        /// Only rows of this harvester's datasource/repository pairing.
        #[arg(long)]
        harvester: Option<String>,

        /// Pending, Fetched or Committed.
        #[arg(long)]
        status: Option<RecordStatus>,

        /// Only rows whose retries are exhausted.
        #[arg(long)]
        frozen: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.log.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Invoke {
            harvester,
            datasource,
            repository,
            repository_url,
            username,
            password,
            institution,
        } => {
            let params = InvokeParams {
                datasource_uid: datasource.unwrap_or_else(|| harvester.clone()),
                repository_uid: repository.unwrap_or_else(|| harvester.clone()),
                harvester_uid: harvester,
                repository_url,
                username,
                password,
                institution,
            };
            let pool = db::connect(&cfg).await?;
            let agent = Agent::new(cfg.clone(), pool);
            let (success, message) = agent.invoke_harvester(&params).await;
            println!("{}", message);
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Records {
            harvester,
            status,
            frozen,
            json,
        } => {
            let query = RecordsQuery {
                harvester,
                status,
                frozen,
            };
            run_records(&cfg, &query, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
