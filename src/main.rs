use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod audit;
mod chain;
mod config;
mod durable;
mod inference;
mod models;
mod pipeline;
mod publish;
mod report;
mod store;
mod streak;
mod summary;

use crate::chain::RpcLeaderboardSource;
use crate::config::{EngineConfig, RetryPolicy, StoreLayout};
use crate::models::{LeaderboardSnapshot, SummarySnapshot};
use crate::store::JsonStore;

#[derive(Parser)]
#[command(name = "checkin-ledger")]
#[command(about = "Publishes the click leaderboard and daily check-in stats", long_about = None)]
struct Cli {
    /// Root directory the artifacts are published under
    #[arg(long, env = "CHECKIN_PUBLIC_DIR", default_value = "public", global = true)]
    public_dir: PathBuf,
    /// Larger local files are treated as corrupt
    #[arg(long, default_value_t = 50 * 1024 * 1024, global = true)]
    max_file_bytes: u64,
    #[arg(long, default_value_t = 30, global = true)]
    max_streak_days: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the on-chain table and republish ledgers, streaks and summaries
    Run {
        #[arg(long, env = "CHECKIN_RPC_URL", default_value = config::DEFAULT_RPC_URL)]
        rpc_url: String,
        #[arg(long, env = "CHECKIN_CONTRACT", default_value = config::DEFAULT_CONTRACT)]
        contract: String,
        #[arg(long, default_value_t = 20)]
        max_attempts: u32,
        #[arg(long, default_value_t = 15_000)]
        timeout_ms: u64,
        #[arg(long, default_value_t = 1_000)]
        backoff_base_ms: u64,
        #[arg(long, default_value_t = 30_000)]
        backoff_cap_ms: u64,
        #[arg(long, default_value_t = 10)]
        large_diff_threshold: u64,
        #[arg(long, default_value_t = 10)]
        drift_threshold: u64,
    },
    /// Audit the published store against its invariants
    Verify,
    /// Generate a markdown digest of the published stats
    Report {
        #[arg(long, default_value = "checkin-report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig {
        layout: StoreLayout::new(&cli.public_dir),
        max_file_bytes: cli.max_file_bytes,
        max_streak_days: cli.max_streak_days,
        ..EngineConfig::default()
    };

    match cli.command {
        Commands::Run {
            rpc_url,
            contract,
            max_attempts,
            timeout_ms,
            backoff_base_ms,
            backoff_cap_ms,
            large_diff_threshold,
            drift_threshold,
        } => {
            config.rpc_url = rpc_url;
            config.contract = contract;
            config.retry = RetryPolicy {
                max_attempts,
                attempt_timeout: Duration::from_millis(timeout_ms),
                base_delay: Duration::from_millis(backoff_base_ms),
                max_delay: Duration::from_millis(backoff_cap_ms),
            };
            config.large_diff_threshold = u128::from(large_diff_threshold);
            config.drift_threshold = drift_threshold;

            let source = RpcLeaderboardSource::new(&config.rpc_url, &config.contract)
                .context("failed to build the RPC client")?;
            let span = info_span!("run", run_id = %Uuid::new_v4());
            let report = pipeline::run(&config, &source)
                .instrument(span)
                .await
                .inspect_err(|err| error!(error = %format!("{err:#}"), "run aborted"))?;

            if report.failed_writes > 0 {
                warn!(
                    failed_writes = report.failed_writes,
                    "some artifacts were not written and stay stale until the next run"
                );
            }
            info!(
                today = %report.today,
                baseline_only = report.baseline_only,
                users = report.total_users,
                new_users = report.new_users,
                returning = report.returning,
                retroactive = report.retroactive,
                streaks = report.streaks_updated,
                check_ins_today = report.stats.check_ins_today,
                total_check_ins = report.stats.total_check_ins,
                "leaderboard updated"
            );
        }
        Commands::Verify => {
            let mut store = JsonStore::new(config.max_file_bytes);
            let findings = audit::audit(
                &config.layout,
                &mut store,
                Utc::now().date_naive(),
                config.max_streak_days,
            );

            if findings.is_empty() {
                println!("Store is consistent.");
                return Ok(());
            }

            println!("Invariant violations:");
            for finding in findings.iter() {
                println!("- {finding}");
            }
            anyhow::bail!("{} invariant violations found", findings.len());
        }
        Commands::Report { out, top } => {
            let mut store = JsonStore::new(config.max_file_bytes);
            let summary: SummarySnapshot = store.read_or_default(&config.layout.summary());
            let leaderboard: Option<LeaderboardSnapshot> =
                store.read(&config.layout.leaderboard());
            let report = report::build_report(&summary, leaderboard.as_ref(), top);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
