//! stats.rs: in-memory usage counters for the `/stats` admin command and
//! the `/health` check derived from them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Uptime under which the service reports itself as just started.
pub const WARMUP: Duration = Duration::from_secs(60);
/// Fetch success share below which health degrades.
pub const MIN_SUCCESS_RATE: f64 = 0.8;
/// Consecutive failed source attempts that make health critical.
pub const CRITICAL_FAIL_STREAK: u64 = 3;

#[derive(Debug)]
pub struct UsageStats {
    started: Instant,
    commands: Mutex<BTreeMap<String, u64>>,
    fetch_ok: AtomicU64,
    fetch_failed: AtomicU64,
    fail_streak: AtomicU64,
    publishes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub uptime_secs: u64,
    pub success_rate: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub commands: BTreeMap<String, u64>,
    pub total_commands: u64,
    pub fetch_ok: u64,
    pub fetch_failed: u64,
    pub publishes: u64,
    /// Share of successful source fetches, 0.0 when nothing was fetched yet.
    pub success_rate: f64,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            commands: Mutex::new(BTreeMap::new()),
            fetch_ok: AtomicU64::new(0),
            fetch_failed: AtomicU64::new(0),
            fail_streak: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
        }
    }

    pub fn record_command(&self, command: &str) {
        counter!("bot_commands_total", "command" => command.to_string()).increment(1);
        *self.commands.lock().entry(command.to_string()).or_insert(0) += 1;
    }

    pub fn record_fetch(&self, ok: bool) {
        if ok {
            self.fetch_ok.fetch_add(1, Ordering::Relaxed);
            self.fail_streak.store(0, Ordering::Relaxed);
        } else {
            self.fetch_failed.fetch_add(1, Ordering::Relaxed);
            self.fail_streak.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_publish(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let commands = self.commands.lock().clone();
        let fetch_ok = self.fetch_ok.load(Ordering::Relaxed);
        let fetch_failed = self.fetch_failed.load(Ordering::Relaxed);
        let total = fetch_ok + fetch_failed;
        StatsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            total_commands: commands.values().sum(),
            commands,
            fetch_ok,
            fetch_failed,
            publishes: self.publishes.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                fetch_ok as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Healthy with no issues, critical when sources keep failing in a row,
    /// warning otherwise.
    pub fn health(&self) -> HealthReport {
        let s = self.snapshot();
        let streak = self.fail_streak.load(Ordering::Relaxed);
        let fetched = s.fetch_ok + s.fetch_failed;
        let mut issues = Vec::new();

        if self.uptime() < WARMUP {
            issues.push("just started".to_string());
        }
        if fetched > 0 && s.success_rate < MIN_SUCCESS_RATE {
            issues.push(format!(
                "low fetch success rate: {:.1}%",
                s.success_rate * 100.0
            ));
        }
        if streak >= CRITICAL_FAIL_STREAK {
            issues.push(format!("{streak} source attempts failed in a row"));
        }

        let status = if streak >= CRITICAL_FAIL_STREAK {
            HealthStatus::Critical
        } else if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };
        HealthReport {
            status,
            issues,
            uptime_secs: s.uptime_secs,
            success_rate: (fetched > 0).then_some(s.success_rate),
            checked_at: Utc::now(),
        }
    }

    /// Plain-text report for the chat.
    pub fn report(&self) -> String {
        let s = self.snapshot();
        let mut out = String::from("📊 Статистика бота:\n\n");
        out.push_str(&format!("⏱ Время работы: {}\n", format_uptime(s.uptime_secs)));
        out.push_str(&format!("📤 Публикаций: {}\n\n", s.publishes));

        out.push_str("📝 Команды:\n");
        let mut by_count: Vec<_> = s.commands.iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (cmd, n) in by_count {
            out.push_str(&format!("• /{cmd}: {n}\n"));
        }

        let total = s.fetch_ok + s.fetch_failed;
        if total > 0 {
            out.push_str("\n🌐 Запросы к источникам:\n");
            out.push_str(&format!("✅ Успешных: {}\n", s.fetch_ok));
            out.push_str(&format!("❌ Ошибок: {}\n", s.fetch_failed));
            out.push_str(&format!("📈 Успешность: {:.1}%\n", s.success_rate * 100.0));
        }
        out
    }
}

fn format_uptime(secs: u64) -> String {
    let (d, rem) = (secs / 86_400, secs % 86_400);
    let (h, rem) = (rem / 3600, rem % 3600);
    let m = rem / 60;
    if d > 0 {
        format!("{d}д {h}ч {m}м")
    } else {
        format!("{h}ч {m}м")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_counted_and_sorted_in_report() {
        let s = UsageStats::new();
        s.record_command("get_rate");
        s.record_command("get_rate");
        s.record_command("start");
        let snap = s.snapshot();
        assert_eq!(snap.total_commands, 3);
        assert_eq!(snap.commands.get("get_rate"), Some(&2));

        let report = s.report();
        let rate_pos = report.find("/get_rate: 2").unwrap();
        let start_pos = report.find("/start: 1").unwrap();
        assert!(rate_pos < start_pos);
        assert!(!report.contains("Успешность"));
    }

    #[test]
    fn success_rate_counts_fetches() {
        let s = UsageStats::new();
        s.record_fetch(true);
        s.record_fetch(true);
        s.record_fetch(true);
        s.record_fetch(false);
        let snap = s.snapshot();
        assert!((snap.success_rate - 0.75).abs() < f64::EPSILON);
        assert!(s.report().contains("75.0%"));
    }

    #[tokio::test(start_paused = true)]
    async fn health_follows_fetch_outcomes() {
        let s = UsageStats::new();
        let h = s.health();
        assert_eq!(h.status, HealthStatus::Warning);
        assert_eq!(h.issues, vec!["just started".to_string()]);
        assert_eq!(h.success_rate, None);

        tokio::time::advance(WARMUP).await;
        assert_eq!(s.health().status, HealthStatus::Healthy);

        for ok in [true, true, true, false, false] {
            s.record_fetch(ok);
        }
        let h = s.health();
        assert_eq!(h.status, HealthStatus::Warning);
        assert_eq!(h.issues, vec!["low fetch success rate: 60.0%".to_string()]);

        s.record_fetch(false);
        let h = s.health();
        assert_eq!(h.status, HealthStatus::Critical);
        assert!(h.issues.iter().any(|i| i.contains("3 source attempts failed in a row")));

        // One success ends the streak; the rate alone only warns.
        s.record_fetch(true);
        assert_eq!(s.health().status, HealthStatus::Warning);
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(59), "0ч 0м");
        assert_eq!(format_uptime(3_660), "1ч 1м");
        assert_eq!(format_uptime(90_000), "1д 1ч 0м");
    }
}
