//! users.rs: persisted registry of people who talk to the bot.
//!
//! One JSON object keyed by user id, rewritten after every change (temp file
//! then rename) on the blocking pool. Timestamps are UTC; legacy files with offset-less ISO
//! timestamps are read as UTC.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_ACTIVE_DAYS: i64 = 30;
pub const DEFAULT_CLEANUP_DAYS: i64 = 90;
const TOP_USERS: usize = 5;

/// Who sent a message, as reported by the chat platform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(deserialize_with = "de_timestamp")]
    pub registration_date: DateTime<Utc>,
    #[serde(deserialize_with = "de_timestamp")]
    pub last_activity: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub command_count: u64,
    #[serde(default)]
    pub last_command: String,
}

fn default_true() -> bool {
    true
}

fn de_timestamp<'de, D>(d: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|n| n.and_utc())
        .map_err(serde::de::Error::custom)
}

impl UserRecord {
    fn new(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        let mut rec = Self {
            id: profile.id,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            registration_date: now,
            last_activity: now,
            is_active: true,
            command_count: 0,
            last_command: String::new(),
        };
        rec.apply_profile(profile);
        rec
    }

    fn apply_profile(&mut self, p: &UserProfile) {
        self.username = p.username.clone().unwrap_or_default();
        self.first_name = p.first_name.clone().unwrap_or_default();
        self.last_name = p.last_name.clone().unwrap_or_default();
    }

    pub fn display_name(&self) -> String {
        if !self.first_name.is_empty() {
            self.first_name.clone()
        } else if !self.username.is_empty() {
            self.username.clone()
        } else {
            format!("User{}", self.id)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub total: usize,
    pub active: usize,
    pub new_today: usize,
    pub inactive: usize,
}

#[derive(Debug)]
pub struct UserRegistry {
    path: PathBuf,
    users: Mutex<BTreeMap<i64, UserRecord>>,
    /// Held across a change and its file write, so writes land in order.
    writer: tokio::sync::Mutex<()>,
}

impl UserRegistry {
    /// Load from `path`; a missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = match fs::read_to_string(&path) {
            Ok(s) => {
                let body = s.trim_start_matches('\u{feff}').trim();
                if body.is_empty() {
                    BTreeMap::new()
                } else {
                    serde_json::from_str(body)
                        .with_context(|| format!("users: parse {}", path.display()))?
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("users: read {}", path.display()));
            }
        };
        tracing::info!(target: "users", count = users.len(), path = %path.display(), "user registry loaded");
        Ok(Self {
            path,
            users: Mutex::new(users),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or refresh a user; returns `true` for a first-time user.
    pub async fn register(&self, profile: &UserProfile, now: DateTime<Utc>) -> Result<bool> {
        let is_new = self
            .change(|users| {
                let is_new = match users.get_mut(&profile.id) {
                    Some(rec) => {
                        rec.apply_profile(profile);
                        rec.last_activity = now;
                        rec.is_active = true;
                        false
                    }
                    None => {
                        users.insert(profile.id, UserRecord::new(profile, now));
                        true
                    }
                };
                (is_new, true)
            })
            .await?;
        if is_new {
            tracing::info!(target: "users", user_id = profile.id, "new user registered");
        }
        Ok(is_new)
    }

    /// Count one command for the user, registering them if unseen.
    pub async fn record_activity(
        &self,
        profile: &UserProfile,
        command: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.change(|users| {
            let rec = users
                .entry(profile.id)
                .or_insert_with(|| UserRecord::new(profile, now));
            rec.last_activity = now;
            rec.command_count += 1;
            if !command.is_empty() {
                rec.last_command = command.to_string();
            }
            ((), true)
        })
        .await
    }

    pub fn get(&self, user_id: i64) -> Option<UserRecord> {
        self.users.lock().get(&user_id).cloned()
    }

    /// Users in id order, at most `limit`.
    pub fn list(&self, limit: usize) -> Vec<UserRecord> {
        self.users.lock().values().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active users seen within the last `days`.
    pub fn active_users(&self, days: i64, now: DateTime<Utc>) -> Vec<UserRecord> {
        let cutoff = now - Duration::days(days);
        self.users
            .lock()
            .values()
            .filter(|u| u.is_active && u.last_activity > cutoff)
            .cloned()
            .collect()
    }

    pub fn counts(&self, now: DateTime<Utc>) -> UserCounts {
        let total = self.len();
        let active = self.active_users(DEFAULT_ACTIVE_DAYS, now).len();
        let today = now.date_naive();
        let new_today = self
            .users
            .lock()
            .values()
            .filter(|u| u.registration_date.date_naive() == today)
            .count();
        UserCounts {
            total,
            active,
            new_today,
            inactive: total - active,
        }
    }

    /// Drop users whose last activity is older than `days`. Returns how many.
    pub async fn cleanup_inactive(&self, days: i64, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(days);
        let removed = self
            .change(|users| {
                let before = users.len();
                users.retain(|_, u| u.last_activity >= cutoff);
                let removed = before - users.len();
                (removed, removed > 0)
            })
            .await?;
        if removed > 0 {
            tracing::info!(target: "users", removed, "inactive users removed");
        }
        Ok(removed)
    }

    /// Chat summary with totals and the most active users.
    pub fn summary(&self, now: DateTime<Utc>) -> String {
        let c = self.counts(now);
        let mut out = String::from("👥 Статистика пользователей:\n");
        out.push_str(&format!("📊 Всего: {}\n", c.total));
        out.push_str(&format!("✅ Активных: {}\n", c.active));
        out.push_str(&format!("📈 Новых сегодня: {}\n", c.new_today));
        out.push_str(&format!("❌ Неактивных: {}\n", c.inactive));

        let mut active = self.active_users(DEFAULT_ACTIVE_DAYS, now);
        if !active.is_empty() {
            active.sort_by(|a, b| b.command_count.cmp(&a.command_count).then(a.id.cmp(&b.id)));
            out.push_str("\n🔥 Топ активных пользователей:\n");
            for (i, u) in active.iter().take(TOP_USERS).enumerate() {
                out.push_str(&format!(
                    "{}. {} ({} команд)\n",
                    i + 1,
                    u.display_name(),
                    u.command_count
                ));
            }
        }
        out
    }

    /// Apply `f` to the in-memory map and, when it reports a change, persist
    /// a snapshot without blocking the async workers.
    async fn change<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<i64, UserRecord>) -> (R, bool),
    ) -> Result<R> {
        let _writer = self.writer.lock().await;
        let (out, body) = {
            let mut users = self.users.lock();
            let (out, dirty) = f(&mut users);
            let body = if dirty {
                Some(serde_json::to_vec_pretty(&*users).context("users: serialize")?)
            } else {
                None
            };
            (out, body)
        };
        if let Some(body) = body {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || write_atomic(&path, &body))
                .await
                .context("users: writer task")??;
        }
        Ok(out)
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("users: create {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).with_context(|| format!("users: write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("users: replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile(id: i64, name: &str) -> UserProfile {
        UserProfile {
            id,
            username: Some(format!("{name}_tg")),
            first_name: Some(name.to_string()),
            last_name: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn register_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("users.json");
        let reg = UserRegistry::load(&path).unwrap();
        assert!(reg.is_empty());

        assert!(reg.register(&profile(1, "Ann"), t0()).await.unwrap());
        assert!(!reg.register(&profile(1, "Anna"), t0()).await.unwrap());
        reg.record_activity(&profile(1, "Anna"), "get_rate", t0()).await.unwrap();

        let again = UserRegistry::load(&path).unwrap();
        let rec = again.get(1).unwrap();
        assert_eq!(rec.first_name, "Anna");
        assert_eq!(rec.command_count, 1);
        assert_eq!(rec.last_command, "get_rate");
    }

    #[tokio::test]
    async fn activity_registers_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let reg = UserRegistry::load(dir.path().join("u.json")).unwrap();
        reg.record_activity(&profile(9, "Bob"), "help", t0()).await.unwrap();
        assert_eq!(reg.get(9).unwrap().command_count, 1);
    }

    #[tokio::test]
    async fn active_window_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let reg = UserRegistry::load(dir.path().join("u.json")).unwrap();
        reg.register(&profile(1, "Old"), t0()).await.unwrap();
        reg.register(&profile(2, "Mid"), t0() + Duration::days(70)).await.unwrap();
        reg.register(&profile(3, "New"), t0() + Duration::days(100)).await.unwrap();

        let now = t0() + Duration::days(101);
        let active: Vec<i64> = reg.active_users(30, now).iter().map(|u| u.id).collect();
        assert_eq!(active, vec![3]);

        assert_eq!(reg.cleanup_inactive(90, now).await.unwrap(), 1);
        assert!(reg.get(1).is_none());
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.cleanup_inactive(90, now).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_changes_are_all_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.json");
        let reg = std::sync::Arc::new(UserRegistry::load(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for id in 0..20 {
            let reg = reg.clone();
            tasks.spawn(async move {
                reg.record_activity(&profile(id, "U"), "get_rate", t0()).await
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }

        assert_eq!(UserRegistry::load(&path).unwrap().len(), 20);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn summary_lists_top_users_by_commands() {
        let dir = tempfile::tempdir().unwrap();
        let reg = UserRegistry::load(dir.path().join("u.json")).unwrap();
        for _ in 0..3 {
            reg.record_activity(&profile(1, "Ann"), "get_rate", t0()).await.unwrap();
        }
        reg.record_activity(&profile(2, "Bob"), "start", t0()).await.unwrap();

        let s = reg.summary(t0());
        assert!(s.contains("📊 Всего: 2"));
        assert!(s.contains("📈 Новых сегодня: 2"));
        assert!(s.contains("1. Ann (3 команд)"));
        assert!(s.contains("2. Bob (1 команд)"));
    }

    #[test]
    fn reads_legacy_file_with_bom_and_naive_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(
            &path,
            "\u{feff}{\"42\": {\"id\": 42, \"username\": \"\", \"first_name\": \"\", \
             \"last_name\": \"\", \"registration_date\": \"2025-08-01T10:00:00.123456\", \
             \"last_activity\": \"2025-08-02T10:00:00\", \"is_active\": true, \
             \"command_count\": 4, \"last_command\": \"get_rate\"}}",
        )
        .unwrap();
        let reg = UserRegistry::load(&path).unwrap();
        let rec = reg.get(42).unwrap();
        assert_eq!(rec.command_count, 4);
        assert_eq!(rec.display_name(), "User42");
        assert_eq!(
            rec.last_activity,
            Utc.with_ymd_and_hms(2025, 8, 2, 10, 0, 0).unwrap()
        );
    }
}
