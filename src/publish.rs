use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::{CompatDay, CompatSnapshot, CompatStats, DailyLedger, SummarySnapshot};

/// Projects the summary into the legacy `checkin_stats.json` shape.
pub fn compat_snapshot(
    summary: &SummarySnapshot,
    today: NaiveDate,
    today_ledger: &DailyLedger,
) -> CompatSnapshot {
    let day = CompatDay {
        count: today_ledger.count,
        users: today_ledger.users.iter().cloned().collect(),
    };

    CompatSnapshot {
        stats: CompatStats {
            total_check_ins: summary.total_check_ins,
            max_streak: summary.max_streak,
            check_ins_today: summary.check_ins_today,
            last_update: summary.last_update.clone(),
        },
        daily_data: BTreeMap::from([(today.to_string(), day)]),
        streaks: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mirrors_summary_and_lists_todays_users() {
        let summary = SummarySnapshot {
            last_update: "2024-06-05T10:00:00.000Z".to_string(),
            total_users: 9,
            check_ins_today: 2,
            total_check_ins: 40,
            max_streak: 1,
            last_seven_days: BTreeMap::new(),
        };
        let mut ledger = DailyLedger::default();
        ledger.mark("0xbb");
        ledger.mark("0xaa");

        let today = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let compat = compat_snapshot(&summary, today, &ledger);

        assert_eq!(
            serde_json::to_value(&compat).unwrap(),
            json!({
                "stats": {
                    "totalCheckIns": 40,
                    "maxStreak": 1,
                    "checkInsToday": 2,
                    "lastUpdate": "2024-06-05T10:00:00.000Z"
                },
                "dailyData": {
                    "2024-06-05": {"count": 2, "users": ["0xaa", "0xbb"]}
                },
                "streaks": {}
            })
        );
    }
}
