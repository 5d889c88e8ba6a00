use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::chain::{self, LeaderboardSource};
use crate::config::EngineConfig;
use crate::durable::BackupStatus;
use crate::inference;
use crate::models::{
    self, CheckInStats, LeaderboardEntry, LeaderboardSnapshot, LeaderboardStats,
    SummarySnapshot, UserStreakRecord,
};
use crate::publish;
use crate::store::JsonStore;
use crate::streak;
use crate::summary::{self, SummaryInputs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub today: NaiveDate,
    /// No previous snapshot existed, so nothing could be inferred.
    pub baseline_only: bool,
    pub new_day: bool,
    pub new_users: usize,
    pub returning: usize,
    pub retroactive: usize,
    pub streaks_updated: usize,
    pub failed_writes: usize,
    pub total_users: usize,
    pub stats: CheckInStats,
}

/// Writes artifacts through the durable writer. A failed write is logged and
/// counted, and the run carries on; that artifact stays stale until the next
/// successful run.
struct Publisher<'a> {
    store: &'a mut JsonStore,
    failed_writes: usize,
}

impl<'a> Publisher<'a> {
    fn new(store: &'a mut JsonStore) -> Self {
        Self {
            store,
            failed_writes: 0,
        }
    }

    fn commit<T: Serialize>(&mut self, artifact: &str, path: &Path, value: &T) {
        match self.store.write(path, value) {
            Ok(receipt) => {
                if receipt.backup == BackupStatus::Failed {
                    info!(artifact, path = %path.display(), "written without a backup copy");
                }
                debug!(
                    artifact,
                    path = %receipt.path.display(),
                    bytes = receipt.bytes,
                    "committed"
                );
            }
            Err(err) => {
                error!(artifact, error = %err, "write failed; artifact left stale");
                self.failed_writes += 1;
            }
        }
    }
}

/// One scheduled pass: fetch, infer, correct streaks, aggregate, publish.
pub async fn run<S: LeaderboardSource>(
    config: &EngineConfig,
    source: &S,
) -> anyhow::Result<RunReport> {
    let mut store = JsonStore::new(config.max_file_bytes);
    let previous: Option<LeaderboardSnapshot> = store.read(&config.layout.leaderboard());

    let table = chain::fetch_with_retry(source, &config.retry)
        .await
        .context("failed to read the leaderboard from chain")?;

    Ok(reconcile(config, &mut store, previous, table, Utc::now()))
}

/// Everything after the chain read. Never fails: local problems degrade to
/// defaults or stale artifacts and are logged.
pub fn reconcile(
    config: &EngineConfig,
    store: &mut JsonStore,
    previous: Option<LeaderboardSnapshot>,
    mut table: Vec<LeaderboardEntry>,
    now: DateTime<Utc>,
) -> RunReport {
    let layout = &config.layout;
    let today = now.date_naive();
    let yesterday = today - Duration::days(1);
    let last_update = models::timestamp(now);
    models::sort_by_clicks(&mut table);

    let mut publisher = Publisher::new(store);
    let mut report = RunReport {
        today,
        baseline_only: previous.is_none(),
        new_day: false,
        new_users: 0,
        returning: 0,
        retroactive: 0,
        streaks_updated: 0,
        failed_writes: 0,
        total_users: table.len(),
        stats: CheckInStats::default(),
    };

    let previous_day = previous
        .as_ref()
        .and_then(LeaderboardSnapshot::last_update_date);
    if let Some(previous_day) = previous_day {
        if previous_day != today {
            report.new_day = true;
            // Today's ledger starts empty and is written once, after inference.
            info!(%previous_day, %today, "new day detected");
        }
    }

    let mut history = publisher.store.daily_history(&layout.daily_dir());
    let mut computed_max_streak = 0;

    match previous {
        None => info!("no previous leaderboard snapshot; recording a baseline only"),
        Some(previous) => {
            let outcome = inference::infer_check_ins(
                &table,
                &previous,
                history.get(&today).cloned().unwrap_or_default(),
                history.get(&yesterday).cloned().unwrap_or_default(),
                config.large_diff_threshold,
            );

            publisher.commit("daily ledger", &layout.daily(today), &outcome.today);
            if outcome.yesterday_changed {
                publisher.commit("daily ledger", &layout.daily(yesterday), &outcome.yesterday);
                history.insert(yesterday, outcome.yesterday.clone());
            }
            history.insert(today, outcome.today.clone());
            info!(
                %today,
                check_ins = outcome.today.count,
                new_users = outcome.new_users,
                returning = outcome.returning,
                retroactive = outcome.retroactive,
                "daily ledger updated"
            );

            report.new_users = outcome.new_users;
            report.returning = outcome.returning;
            report.retroactive = outcome.retroactive;

            for address in &outcome.today.users {
                let path = layout.user(address);
                let stored: UserStreakRecord = publisher.store.read_or_default(&path);
                let record =
                    streak::reconcile(address, stored, &history, today, config.max_streak_days);
                computed_max_streak = computed_max_streak.max(record.max_streak);
                publisher.commit("streak record", &path, &record);
                report.streaks_updated += 1;
            }
            info!(users = report.streaks_updated, "updated streaks");
        }
    }

    for date in summary::repair_ledgers(&mut history) {
        publisher.commit("daily ledger", &layout.daily(date), &history[&date]);
    }

    let today_ledger = history.get(&today).cloned().unwrap_or_default();
    let previous_summary: SummarySnapshot = publisher.store.read_or_default(&layout.summary());
    let summary = summary::aggregate(SummaryInputs {
        previous: &previous_summary,
        history: &history,
        today_ledger: &today_ledger,
        today,
        total_users: table.len(),
        computed_max_streak,
        drift_threshold: config.drift_threshold,
        last_update: last_update.clone(),
    });
    publisher.commit("summary", &layout.summary(), &summary);

    let compat = publish::compat_snapshot(&summary, today, &today_ledger);
    publisher.commit("compat stats", &layout.compat(), &compat);

    report.stats = CheckInStats {
        check_ins_today: summary.check_ins_today,
        total_check_ins: summary.total_check_ins,
        max_streak: summary.max_streak,
    };
    let snapshot = LeaderboardSnapshot {
        last_update,
        stats: LeaderboardStats {
            total_users: table.len(),
            check_ins: report.stats.clone(),
        },
        total_check_ins: summary.total_check_ins,
        data: table,
    };
    publisher.commit("leaderboard", &layout.leaderboard(), &snapshot);

    if report.new_day {
        info!(
            %today,
            users = report.total_users,
            check_ins_today = report.stats.check_ins_today,
            total_check_ins = report.stats.total_check_ins,
            "day summary"
        );
    }

    report.failed_writes = publisher.failed_writes;
    report
}
