use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One `{address, cumulativeClicks}` row of the on-chain leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user: String,
    #[serde(with = "clicks_string")]
    pub clicks: u128,
}

impl LeaderboardEntry {
    pub fn new(user: impl Into<String>, clicks: u128) -> Self {
        Self {
            user: user.into(),
            clicks,
        }
    }

    /// Ledger and streak files key users by lowercased address.
    pub fn address(&self) -> String {
        self.user.to_lowercase()
    }
}

/// Sorts descending by clicks; equal counters keep their fetch order.
pub fn sort_by_clicks(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| b.clicks.cmp(&a.clicks));
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckInStats {
    pub check_ins_today: u64,
    pub total_check_ins: u64,
    pub max_streak: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaderboardStats {
    pub total_users: usize,
    pub check_ins: CheckInStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardSnapshot {
    #[serde(default)]
    pub last_update: String,
    #[serde(default)]
    pub data: Vec<LeaderboardEntry>,
    #[serde(default)]
    pub stats: LeaderboardStats,
    #[serde(default)]
    pub total_check_ins: u64,
}

impl LeaderboardSnapshot {
    /// UTC calendar date of `lastUpdate`, if it parses.
    pub fn last_update_date(&self) -> Option<NaiveDate> {
        DateTime::parse_from_rfc3339(&self.last_update)
            .ok()
            .map(|ts| ts.with_timezone(&Utc).date_naive())
    }
}

/// Check-ins recorded for one calendar day. The date is the file name, not a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLedger {
    #[serde(default)]
    pub count: u64,
    #[serde(default, with = "user_set")]
    pub users: BTreeSet<String>,
}

impl DailyLedger {
    pub fn contains(&self, address: &str) -> bool {
        self.users.contains(address)
    }

    /// Adds `address` and keeps `count` in step. Returns false if it was already present.
    pub fn mark(&mut self, address: &str) -> bool {
        let inserted = self.users.insert(address.to_string());
        self.seal();
        inserted
    }

    pub fn seal(&mut self) {
        self.count = self.users.len() as u64;
    }

    pub fn is_consistent(&self) -> bool {
        self.count == self.users.len() as u64
    }

    /// The larger of the stored count and the member count.
    pub fn effective_count(&self) -> u64 {
        self.count.max(self.users.len() as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStreakRecord {
    pub current_streak: u32,
    pub max_streak: u32,
    pub last_check_in: Option<NaiveDate>,
    pub total_check_ins: u32,
    pub months: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarySnapshot {
    pub last_update: String,
    pub total_users: usize,
    pub check_ins_today: u64,
    pub total_check_ins: u64,
    pub max_streak: u32,
    pub last_seven_days: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatStats {
    pub total_check_ins: u64,
    pub max_streak: u32,
    pub check_ins_today: u64,
    pub last_update: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatDay {
    pub count: u64,
    pub users: Vec<String>,
}

/// Legacy `checkin_stats.json` shape read by older clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompatSnapshot {
    pub stats: CompatStats,
    pub daily_data: BTreeMap<String, CompatDay>,
    pub streaks: BTreeMap<String, serde_json::Value>,
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Counters are published as decimal strings; older snapshots may carry plain numbers.
mod clicks_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    pub fn serialize<S: Serializer>(clicks: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(clicks)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
            Raw::Number(number) => number
                .as_u64()
                .map(u128::from)
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
                        .map(|v| v as u128)
                })
                .ok_or_else(|| de::Error::custom(format!("invalid click counter {number}"))),
        }
    }
}

/// On disk the user set is `{ "<address>": true, ... }`.
mod user_set {
    use std::collections::{BTreeMap, BTreeSet};

    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        users: &BTreeSet<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(users.len()))?;
        for user in users {
            map.serialize_entry(user, &true)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeSet<String>, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter(|(_, flag)| is_truthy(flag))
            .map(|(user, _)| user)
            .collect())
    }

    fn is_truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Number(n) => n.as_f64().map_or(true, |v| v != 0.0),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}
