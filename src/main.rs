//! # Gazette Clip CLI (`gclip`)
//!
//! ## Usage
//!
//! ```bash
//! gclip --config ./gclip.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gclip init` | Create the SQLite database and schema |
//! | `gclip run` | Clip the lookback window ending today (or `--date`) |
//! | `gclip backfill` | Reprocess a historical date range, email disabled |
//!
//! A run exits non-zero only on configuration or authentication failures;
//! individual artifact failures are logged and retried on a later run.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gazette_clip::config::{self, Config};
use gazette_clip::mailer::SmtpNotifier;
use gazette_clip::pipeline::{self, EmailPolicy, RunOptions};
use gazette_clip::portal::{PortalClient, PortalError};
use gazette_clip::store;

/// Gazette clipping pipeline: monitors a gazette portal for publications
/// matching organization and keyword filters.
#[derive(Parser)]
#[command(
    name = "gclip",
    about = "Gazette clipping pipeline",
    version,
    long_about = "Monitors a gazette portal for daily publication bundles, extracts their text, \
    filters it against organization and keyword rules, records matches in SQLite, and mails an \
    HTML digest."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./gclip.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the runs, processed_files, and matches
    /// tables. Idempotent; running it multiple times is safe.
    Init,

    /// Run the clipping pipeline for the lookback window ending at a date.
    Run {
        /// Target date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Suppress the digest email for this run.
        #[arg(long)]
        no_email: bool,

        /// Send a digest even when nothing matched. Intended for scheduled
        /// confirmation runs that prove the pipeline is alive.
        #[arg(long, conflicts_with = "no_email")]
        force_email: bool,
    },

    /// Reprocess a historical date range.
    ///
    /// Processes each date on its own (no lookback) and never sends email.
    Backfill {
        /// First date of the range (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Last date of the range (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: String,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s))
}

async fn connect_store(config: &Config) -> Result<sqlx::SqlitePool> {
    let pool = store::connect(&config.storage.db_path).await?;
    store::init_schema(&pool).await?;
    Ok(pool)
}

async fn login(config: &Config) -> Result<PortalClient> {
    PortalClient::login(
        &config.portal.base_url,
        &config.portal.email,
        &config.portal.password,
    )
    .await
    .context("portal login failed")
}

/// Proactive session-liveness check before a batch of dates.
async fn ensure_live_session(client: &mut PortalClient) -> Result<()> {
    use gazette_clip::portal::Catalog;
    match client.probe().await {
        Err(PortalError::SessionExpired) => {
            client.refresh_session().await.context("re-login failed")?;
            Ok(())
        }
        Err(e) => Err(e).context("session probe failed"),
        Ok(()) => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = connect_store(&cfg).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            date,
            no_email,
            force_email,
        } => {
            let target = match date {
                Some(s) => parse_date(&s)?,
                None => chrono::Local::now().date_naive(),
            };
            let email = if no_email || !cfg.mail.enabled {
                EmailPolicy::Disabled
            } else if force_email {
                EmailPolicy::Forced
            } else {
                EmailPolicy::OnMatches
            };

            let pool = connect_store(&cfg).await?;
            let mut client = login(&cfg).await?;
            let notifier = SmtpNotifier::new(cfg.mail.clone());

            let report = pipeline::run_clip(
                &cfg,
                &pool,
                &mut client,
                &notifier,
                RunOptions {
                    date: target,
                    lookback_days: cfg.run.lookback_days,
                    email,
                },
            )
            .await?;
            pool.close().await;

            println!("ok: {} finding(s)", report.matches_found);
        }
        Commands::Backfill { start, end } => {
            let start = parse_date(&start)?;
            let end = parse_date(&end)?;
            if end < start {
                anyhow::bail!("backfill end date precedes start date");
            }

            let pool = connect_store(&cfg).await?;
            let mut client = login(&cfg).await?;
            let notifier = SmtpNotifier::new(cfg.mail.clone());

            println!("backfill {}..{} (email disabled)", start, end);
            let mut total: u64 = 0;
            let mut date = start;
            while date <= end {
                ensure_live_session(&mut client).await?;
                let report = pipeline::run_clip(
                    &cfg,
                    &pool,
                    &mut client,
                    &notifier,
                    RunOptions {
                        date,
                        lookback_days: 1,
                        email: EmailPolicy::Disabled,
                    },
                )
                .await?;
                total += report.matches_found;
                date = date
                    .succ_opt()
                    .with_context(|| format!("date overflow after {}", date))?;
            }
            pool.close().await;

            println!("ok: backfill complete, {} finding(s) total", total);
        }
    }

    Ok(())
}
