use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::config::StoreLayout;
use crate::models::{SummarySnapshot, UserStreakRecord};
use crate::store::JsonStore;
use crate::streak;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Checks the published store against its invariants without modifying it.
pub fn audit(
    layout: &StoreLayout,
    store: &mut JsonStore,
    today: NaiveDate,
    max_streak_days: u32,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    let history = store.daily_history(&layout.daily_dir());

    for (date, ledger) in &history {
        if !ledger.is_consistent() {
            findings.push(Finding {
                path: layout.daily(*date),
                message: format!(
                    "count is {} but {} users are listed",
                    ledger.count,
                    ledger.users.len()
                ),
            });
        }
    }

    if let Some(summary) = store.read::<SummarySnapshot>(&layout.summary()) {
        let ledger_total: u64 = history.values().map(|ledger| ledger.count).sum();
        if summary.total_check_ins != ledger_total {
            findings.push(Finding {
                path: layout.summary(),
                message: format!(
                    "totalCheckIns is {} but daily ledgers sum to {}",
                    summary.total_check_ins, ledger_total
                ),
            });
        }
        let today_count = history.get(&today).map_or(0, |ledger| ledger.count);
        if summary.check_ins_today != today_count && summary_is_current(&summary, today) {
            findings.push(Finding {
                path: layout.summary(),
                message: format!(
                    "checkInsToday is {} but today's ledger counts {}",
                    summary.check_ins_today, today_count
                ),
            });
        }
    }

    for path in streak_files(&layout.users_dir()) {
        let Some(address) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let Some(record) = store.read::<UserStreakRecord>(&path) else {
            findings.push(Finding {
                path: path.clone(),
                message: "unreadable streak record".to_string(),
            });
            continue;
        };
        let facts = streak::replay(address, &history);
        if record.total_check_ins != facts.total_check_ins {
            findings.push(Finding {
                path: path.clone(),
                message: format!(
                    "totalCheckIns is {} but the ledgers hold {}",
                    record.total_check_ins, facts.total_check_ins
                ),
            });
        }
        if record.max_streak > record.total_check_ins || record.max_streak > max_streak_days {
            findings.push(Finding {
                path: path.clone(),
                message: format!(
                    "maxStreak {} exceeds totalCheckIns {} or the {}-day ceiling",
                    record.max_streak, record.total_check_ins, max_streak_days
                ),
            });
        }
    }

    findings
}

fn summary_is_current(summary: &SummarySnapshot, today: NaiveDate) -> bool {
    chrono::DateTime::parse_from_rfc3339(&summary.last_update)
        .map(|ts| ts.with_timezone(&chrono::Utc).date_naive() == today)
        .unwrap_or(false)
}

fn streak_files(users_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(shards) = fs::read_dir(users_dir) else {
        return files;
    };
    for shard in shards.flatten() {
        let Ok(entries) = fs::read_dir(shard.path()) else {
            continue;
        };
        files.extend(
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json")),
        );
    }
    files.sort();
    files
}
