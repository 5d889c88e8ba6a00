use std::collections::HashMap;

use tracing::{debug, info};

use crate::models::{DailyLedger, LeaderboardEntry, LeaderboardSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceOutcome {
    pub today: DailyLedger,
    pub yesterday: DailyLedger,
    /// Set when a large jump also credited yesterday; only then is yesterday rewritten.
    pub yesterday_changed: bool,
    pub new_users: usize,
    pub returning: usize,
    pub retroactive: usize,
}

/// Derives today's check-ins from the counter deltas between the previous
/// snapshot and the freshly fetched table.
///
/// Any positive delta checks the user in today. A delta above
/// `large_diff_threshold` from a user missing in yesterday's ledger is read as
/// two days of unobserved activity and credits yesterday as well. That rule
/// can count a single burst twice; it is kept for compatibility with the
/// published history.
pub fn infer_check_ins(
    current: &[LeaderboardEntry],
    previous: &LeaderboardSnapshot,
    mut today: DailyLedger,
    mut yesterday: DailyLedger,
    large_diff_threshold: u128,
) -> InferenceOutcome {
    let previous_clicks: HashMap<String, u128> = previous
        .data
        .iter()
        .map(|entry| (entry.address(), entry.clicks))
        .collect();

    let mut new_users = 0;
    let mut returning = 0;
    let mut retroactive = 0;

    for entry in current {
        let address = entry.address();
        let before = previous_clicks.get(&address).copied().unwrap_or(0);
        let now = entry.clicks;
        debug!(%address, previous = %before, current = %now, "comparing counters");

        if now <= before {
            continue;
        }
        let delta = now - before;

        if today.mark(&address) {
            if before == 0 {
                new_users += 1;
                info!(%address, clicks = %now, "new user checked in");
            } else {
                returning += 1;
                info!(%address, previous = %before, current = %now, "user checked in");
            }
        } else {
            debug!(%address, added = %delta, "already checked in today");
        }

        // The address is already in today's ledger at this point.
        if delta > large_diff_threshold && yesterday.mark(&address) {
            retroactive += 1;
            info!(%address, added = %delta, "large increase also credited to yesterday");
        }
    }

    today.seal();
    yesterday.seal();

    InferenceOutcome {
        today,
        yesterday,
        yesterday_changed: retroactive > 0,
        new_users,
        returning,
        retroactive,
    }
}
