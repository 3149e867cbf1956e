use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mentor_escrow::{EngineConfig, EventFilter, MentorEscrow, Principal};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mentor-escrow")]
#[command(about = "Drive the mentor escrow engine from the command line")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
    /// Register a mentor, book a session, complete it and withdraw
    Demo {
        #[arg(long, default_value = "mentor")]
        mentor: String,
        #[arg(long, default_value = "mentee")]
        mentee: String,
        #[arg(long, default_value = "Rust")]
        expertise: String,
        /// Hourly rate in the smallest currency unit
        #[arg(long, default_value_t = 10)]
        rate: u64,
        #[arg(long, default_value_t = 3)]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Demo {
            mentor,
            mentee,
            expertise,
            rate,
            hours,
        } => {
            run_demo(config, mentor.into(), mentee.into(), expertise, rate, hours).await?;
        }
    }

    Ok(())
}

async fn run_demo(
    config: EngineConfig,
    mentor: Principal,
    mentee: Principal,
    expertise: String,
    rate: u64,
    hours: u64,
) -> Result<()> {
    let engine = MentorEscrow::new(config)?;
    info!("Running demo as operator {}", engine.owner());

    engine.register_mentor(&mentor, expertise, rate).await?;

    let payment = rate
        .checked_mul(hours)
        .context("Session price overflows")?;
    let session_id = engine
        .book_session(&mentee, &mentor, hours, payment)
        .await?;
    engine.complete_session(&mentor, session_id).await?;

    if payment > 0 {
        let receipt = engine.withdraw_earnings(&mentor).await?;
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&engine.get_session_details(session_id).await?)?
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&engine.vault_snapshot().await?)?
    );

    for event in engine.events(&EventFilter::all(), 0).await.events {
        println!("{}", serde_json::to_string(&event)?);
    }

    Ok(())
}
