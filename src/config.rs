use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

pub const DEFAULT_RPC_URL: &str = "https://dream-rpc.somnia.network";
pub const DEFAULT_CONTRACT: &str = "0xe811f7919844359f022c346516cae450346f5492";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rpc_url: String,
    pub contract: String,
    pub layout: StoreLayout,
    pub retry: RetryPolicy,
    /// A counter jump above this also credits yesterday.
    pub large_diff_threshold: u128,
    pub drift_threshold: u64,
    pub max_streak_days: u32,
    pub max_file_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            contract: DEFAULT_CONTRACT.to_string(),
            layout: StoreLayout::new("public"),
            retry: RetryPolicy::default(),
            large_diff_threshold: 10,
            drift_threshold: 10,
            max_streak_days: 30,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `failed_attempts`-th consecutive failure: `base * 1.5^n`, capped.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = i32::try_from(failed_attempts).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_millis() as f64 * 1.5f64.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            attempt_timeout: Duration::from_millis(15_000),
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Where every published artifact lives under the public root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn leaderboard(&self) -> PathBuf {
        self.root.join("leaderboard.json")
    }

    pub fn compat(&self) -> PathBuf {
        self.root.join("checkin_stats.json")
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("stats").join("summary.json")
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.root.join("stats").join("daily")
    }

    pub fn daily(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir().join(format!("{date}.json"))
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join("stats").join("users")
    }

    /// Streak files are sharded by the two characters after `0x`.
    pub fn user(&self, address: &str) -> PathBuf {
        let shard: String = address.chars().skip(2).take(2).collect();
        let shard = if shard.is_empty() { "_".to_string() } else { shard };
        self.users_dir().join(shard).join(format!("{address}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(1_500));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_250));
        assert_eq!(policy.backoff(19), Duration::from_millis(30_000));
    }

    #[test]
    fn layout_shards_users_by_prefix() {
        let layout = StoreLayout::new("/srv/public");
        assert_eq!(
            layout.user("0xabcdef"),
            PathBuf::from("/srv/public/stats/users/ab/0xabcdef.json")
        );
        assert_eq!(
            layout.daily(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap()),
            PathBuf::from("/srv/public/stats/daily/2024-01-09.json")
        );
    }
}
