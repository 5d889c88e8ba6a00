use std::fmt::Write;

use crate::models::{LeaderboardSnapshot, SummarySnapshot};

pub fn build_report(
    summary: &SummarySnapshot,
    leaderboard: Option<&LeaderboardSnapshot>,
    top: usize,
) -> String {
    let mut output = String::new();
    let updated = if summary.last_update.is_empty() {
        "never"
    } else {
        summary.last_update.as_str()
    };

    let _ = writeln!(output, "# Check-in Report");
    let _ = writeln!(output, "Generated from the summary published at {}", updated);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Totals");
    let _ = writeln!(output, "- Participants: {}", summary.total_users);
    let _ = writeln!(output, "- Check-ins today: {}", summary.check_ins_today);
    let _ = writeln!(output, "- All-time check-ins: {}", summary.total_check_ins);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Last Seven Days");

    if summary.last_seven_days.is_empty() {
        let _ = writeln!(output, "No daily activity recorded yet.");
    } else {
        for (date, count) in summary.last_seven_days.iter() {
            let _ = writeln!(output, "- {}: {} check-ins", date, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Clickers");

    match leaderboard {
        Some(snapshot) if !snapshot.data.is_empty() => {
            for (rank, entry) in snapshot.data.iter().take(top).enumerate() {
                let _ = writeln!(
                    output,
                    "{}. {} with {} clicks",
                    rank + 1,
                    entry.user,
                    entry.clicks
                );
            }
        }
        _ => {
            let _ = writeln!(output, "No leaderboard published yet.");
        }
    }

    output
}
