use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use tracing::{debug, error, info, warn};

use crate::models::{DailyLedger, SummarySnapshot};

/// The published global `maxStreak` is pinned to this value no matter what
/// the per-user records say. Per-user maxima are still tracked separately.
pub const PUBLISHED_MAX_STREAK: u32 = 1;

pub struct SummaryInputs<'a> {
    pub previous: &'a SummarySnapshot,
    pub history: &'a BTreeMap<NaiveDate, DailyLedger>,
    pub today_ledger: &'a DailyLedger,
    pub today: NaiveDate,
    pub total_users: usize,
    /// Highest per-user max streak seen this run.
    pub computed_max_streak: u32,
    pub drift_threshold: u64,
    pub last_update: String,
}

/// Re-counts every ledger whose `count` disagrees with its member set.
/// Returns the dates that were corrected so the caller can rewrite them.
pub fn repair_ledgers(history: &mut BTreeMap<NaiveDate, DailyLedger>) -> Vec<NaiveDate> {
    let mut repaired = Vec::new();
    for (date, ledger) in history.iter_mut() {
        if ledger.is_consistent() {
            continue;
        }
        warn!(
            %date,
            count = ledger.count,
            users = ledger.users.len(),
            "daily ledger count disagrees with its users; re-counting"
        );
        ledger.seal();
        repaired.push(*date);
    }
    repaired
}

/// Sums every ledger from scratch. A ledger whose `count` disagrees with its
/// member set contributes the larger of the two.
pub fn recompute_total(history: &BTreeMap<NaiveDate, DailyLedger>, today_count: u64) -> u64 {
    let mut total = 0u64;
    for (date, ledger) in history {
        if !ledger.is_consistent() {
            warn!(
                %date,
                count = ledger.count,
                users = ledger.users.len(),
                "inconsistent daily ledger; counting the larger value"
            );
        }
        total += ledger.effective_count();
    }

    if today_count > 0 && total < today_count {
        error!(total, today_count, "total check-ins below today's count; raising it");
        total = today_count;
    }
    total
}

/// Absolute difference between the published and recomputed totals, when it
/// is large enough to be worth reporting.
pub fn drift(previous_total: u64, recomputed: u64, threshold: u64) -> Option<u64> {
    let diff = previous_total.abs_diff(recomputed);
    (previous_total > 0 && diff > threshold).then_some(diff)
}

pub fn last_seven_days(
    history: &BTreeMap<NaiveDate, DailyLedger>,
    today_ledger: &DailyLedger,
    today: NaiveDate,
) -> BTreeMap<String, u64> {
    (0..7)
        .map(|offset| {
            let date = today - Duration::days(offset);
            let count = if offset == 0 {
                today_ledger.count
            } else {
                history.get(&date).map_or(0, DailyLedger::effective_count)
            };
            (date.to_string(), count)
        })
        .collect()
}

pub fn aggregate(inputs: SummaryInputs<'_>) -> SummarySnapshot {
    let check_ins_today = inputs.today_ledger.count;
    let total_check_ins = recompute_total(inputs.history, check_ins_today);

    if let Some(diff) = drift(
        inputs.previous.total_check_ins,
        total_check_ins,
        inputs.drift_threshold,
    ) {
        warn!(
            previous = inputs.previous.total_check_ins,
            recomputed = total_check_ins,
            diff,
            "total check-ins drifted from the published summary"
        );
    }
    info!(
        total_check_ins,
        previous = inputs.previous.total_check_ins,
        "recomputed total check-ins from daily ledgers"
    );

    if inputs.computed_max_streak != PUBLISHED_MAX_STREAK {
        debug!(
            computed = inputs.computed_max_streak,
            published = PUBLISHED_MAX_STREAK,
            "publishing pinned max streak"
        );
    }

    SummarySnapshot {
        last_update: inputs.last_update,
        total_users: inputs.total_users,
        check_ins_today,
        total_check_ins,
        max_streak: PUBLISHED_MAX_STREAK,
        last_seven_days: last_seven_days(inputs.history, inputs.today_ledger, inputs.today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(users: &[&str]) -> DailyLedger {
        let mut ledger = DailyLedger::default();
        for user in users {
            ledger.mark(user);
        }
        ledger
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    #[test]
    fn total_is_the_sum_of_daily_counts() {
        let history = BTreeMap::from([
            (date(1), ledger(&["0xa", "0xb"])),
            (date(2), ledger(&["0xa"])),
            (date(3), ledger(&[])),
        ]);
        assert_eq!(recompute_total(&history, 0), 3);
    }

    #[test]
    fn inconsistent_ledgers_count_the_larger_value() {
        let mut short = ledger(&["0xa"]);
        short.count = 4;
        let mut stale = ledger(&["0xa", "0xb", "0xc"]);
        stale.count = 1;
        let history = BTreeMap::from([(date(1), short), (date(2), stale)]);
        assert_eq!(recompute_total(&history, 0), 7);
    }

    #[test]
    fn repair_recounts_mismatched_ledgers_from_their_users() {
        let mut stale = ledger(&["0xb", "0xc", "0xd"]);
        stale.count = 1;
        let mut inflated = ledger(&["0xa"]);
        inflated.count = 4;
        let mut history = BTreeMap::from([
            (date(1), ledger(&["0xa"])),
            (date(2), stale),
            (date(3), inflated),
        ]);

        let repaired = repair_ledgers(&mut history);

        assert_eq!(repaired, vec![date(2), date(3)]);
        assert!(history.values().all(DailyLedger::is_consistent));
        assert_eq!(history[&date(2)].count, 3);
        assert_eq!(history[&date(3)].count, 1);
        assert_eq!(recompute_total(&history, 0), 5);
        assert!(repair_ledgers(&mut history).is_empty());
    }

    #[test]
    fn drift_is_reported_only_above_threshold() {
        assert_eq!(drift(100, 95, 10), None);
        assert_eq!(drift(100, 85, 10), Some(15));
        assert_eq!(drift(0, 85, 10), None);
    }

    #[test]
    fn seven_day_window_uses_live_count_for_today() {
        let mut on_disk_today = ledger(&["0xa"]);
        on_disk_today.count = 0;
        let mut old = ledger(&["0xa", "0xb"]);
        old.count = 1;
        let history = BTreeMap::from([
            (date(10), on_disk_today),
            (date(8), old),
            (date(1), ledger(&["0xz"])),
        ]);
        let live = ledger(&["0xa", "0xb", "0xc"]);

        let window = last_seven_days(&history, &live, date(10));

        assert_eq!(window.len(), 7);
        assert_eq!(window["2024-06-10"], 3);
        assert_eq!(window["2024-06-08"], 2);
        assert_eq!(window["2024-06-04"], 0);
        assert!(!window.contains_key("2024-06-01"));
    }

    #[test]
    fn published_max_streak_stays_pinned() {
        let history = BTreeMap::from([(date(5), ledger(&["0xa"]))]);
        let today_ledger = history[&date(5)].clone();
        let summary = aggregate(SummaryInputs {
            previous: &SummarySnapshot::default(),
            history: &history,
            today_ledger: &today_ledger,
            today: date(5),
            total_users: 4,
            computed_max_streak: 12,
            drift_threshold: 10,
            last_update: "2024-06-05T00:00:00.000Z".to_string(),
        });
        assert_eq!(summary.max_streak, PUBLISHED_MAX_STREAK);
        assert_eq!(summary.check_ins_today, 1);
        assert_eq!(summary.total_check_ins, 1);
        assert_eq!(summary.total_users, 4);
    }

    #[test]
    fn drifted_total_is_replaced_by_the_recomputed_one() {
        let previous = SummarySnapshot {
            total_check_ins: 100,
            ..SummarySnapshot::default()
        };
        let history = BTreeMap::from([(date(5), ledger(&["0xa"]))]);
        let today_ledger = history[&date(5)].clone();

        let summary = aggregate(SummaryInputs {
            previous: &previous,
            history: &history,
            today_ledger: &today_ledger,
            today: date(5),
            total_users: 1,
            computed_max_streak: 1,
            drift_threshold: 10,
            last_update: "2024-06-05T00:00:00.000Z".to_string(),
        });

        assert_eq!(drift(previous.total_check_ins, summary.total_check_ins, 10), Some(99));
        assert_eq!(summary.total_check_ins, 1);
        assert_eq!(summary.last_seven_days["2024-06-05"], 1);
    }
}
