use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::models::{DailyLedger, UserStreakRecord};

pub const MAX_DAYS_IN_MONTH: u32 = 31;

/// What the ledger history says about one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreakFacts {
    pub total_check_ins: u32,
    /// Consecutive-day run ending at the most recent check-in.
    pub current_streak: u32,
    pub months: BTreeMap<String, u32>,
    pub last_seen: Option<NaiveDate>,
}

pub fn replay(address: &str, history: &BTreeMap<NaiveDate, DailyLedger>) -> StreakFacts {
    let mut facts = StreakFacts::default();

    for (date, ledger) in history {
        if !ledger.contains(address) {
            continue;
        }
        facts.total_check_ins += 1;
        *facts
            .months
            .entry(date.format("%Y-%m").to_string())
            .or_insert(0) += 1;
        facts.current_streak = match facts.last_seen {
            Some(previous) if (*date - previous).num_days() == 1 => facts.current_streak + 1,
            _ => 1,
        };
        facts.last_seen = Some(*date);
    }

    facts
}

/// Rebuilds `stored` from the ledger history, which is treated as ground truth.
///
/// Totals, month counts and the current streak are overwritten. A stored
/// `maxStreak` survives only while it is plausible (not above the total and
/// not above `ceiling`); the result never exceeds `ceiling`.
pub fn reconcile(
    address: &str,
    stored: UserStreakRecord,
    history: &BTreeMap<NaiveDate, DailyLedger>,
    checked_in_on: NaiveDate,
    ceiling: u32,
) -> UserStreakRecord {
    let facts = replay(address, history);
    let mut record = stored;

    if record.total_check_ins != facts.total_check_ins {
        info!(
            %address,
            from = record.total_check_ins,
            to = facts.total_check_ins,
            "correcting total check-ins"
        );
        record.total_check_ins = facts.total_check_ins;
    }

    if record.max_streak > facts.total_check_ins || record.max_streak > ceiling {
        info!(
            %address,
            from = record.max_streak,
            to = facts.current_streak,
            "correcting max streak"
        );
        record.max_streak = facts.current_streak;
    }

    if record.current_streak > facts.total_check_ins {
        info!(
            %address,
            from = record.current_streak,
            to = facts.current_streak,
            "correcting current streak"
        );
    } else if record.current_streak != facts.current_streak {
        debug!(
            %address,
            from = record.current_streak,
            to = facts.current_streak,
            "updating current streak"
        );
    }
    record.current_streak = facts.current_streak;

    for (month, count) in &record.months {
        if *count > MAX_DAYS_IN_MONTH {
            info!(
                %address,
                %month,
                from = count,
                to = facts.months.get(month).copied().unwrap_or(0),
                "correcting month count"
            );
        }
    }
    record.months = facts.months;
    record.last_check_in = Some(checked_in_on);
    record.max_streak = record.max_streak.max(facts.current_streak).min(ceiling);

    record
}
