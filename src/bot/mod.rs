// src/bot/mod.rs
//! Interactive side: command handling and the Telegram long-poll loop.

pub mod commands;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::watch;

pub use commands::Command;

use crate::notify::telegram::{self, TelegramClient};
use crate::publish::{format_rate_message, format_unavailable, ScheduleSnapshot};
use crate::service::RateService;
use crate::stats::UsageStats;
use crate::users::{UserProfile, UserRegistry, DEFAULT_CLEANUP_DAYS};

/// Interval floor for `/setinterval`; the scheduler itself accepts ≥ 1.
pub const MIN_CHAT_INTERVAL_SECS: i64 = 60;
const USERS_LISTED: usize = 20;
const POLL_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct BotContext {
    pub service: RateService,
    pub users: Arc<UserRegistry>,
    pub stats: Arc<UsageStats>,
    pub admins: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub markdown: bool,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: false,
        }
    }
}

impl From<&telegram::User> for UserProfile {
    fn from(u: &telegram::User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
        }
    }
}

impl BotContext {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }
}

/// Handle one parsed command from `from`. Never fails; problems become
/// reply text.
pub async fn handle_command(ctx: &BotContext, from: &UserProfile, cmd: &Command) -> Reply {
    let now = Utc::now();
    ctx.stats.record_command(cmd.name());
    // Registration goes first so a first-time `/start` is seen as new.
    let is_new = match cmd {
        Command::Start => ctx.users.register(from, now).await.unwrap_or_else(|e| {
            tracing::warn!(target: "bot", user_id = from.id, error = %format!("{e:#}"), "user registration failed");
            false
        }),
        _ => false,
    };
    if let Err(e) = ctx.users.record_activity(from, cmd.name(), now).await {
        tracing::warn!(target: "bot", user_id = from.id, error = %format!("{e:#}"), "user registry update failed");
    }

    if cmd.is_admin_only() && !ctx.is_admin(from.id) {
        tracing::info!(target: "bot", user_id = from.id, command = cmd.name(), "admin command refused");
        return Reply::plain("⛔ Команда доступна только администраторам.");
    }

    match cmd {
        Command::Start => {
            let greeting = if is_new {
                "🎉 Добро пожаловать!"
            } else {
                "👋 С возвращением!"
            };
            Reply::plain(format!(
                "{greeting}\n\n\
                 💱 Актуальный курс USDT/RUB по запросу и по расписанию.\n\n\
                 📌 Доступные команды:\n\
                 /get_rate — получить текущий курс\n\
                 /help — справка"
            ))
        }
        Command::GetRate => match ctx.service.get_current_rate().await {
            Ok(q) => Reply {
                text: format_rate_message(&q, &Local::now()),
                markdown: true,
            },
            Err(e) => {
                tracing::warn!(target: "bot", error = %e, "rate unavailable for /get_rate");
                Reply::plain(format_unavailable())
            }
        },
        Command::Help => {
            let minutes = ctx.service.get_schedule_status().interval_secs / 60;
            Reply::plain(format!(
                "📌 Доступные команды:\n\n\
                 🔹 /start — регистрация и приветствие\n\
                 🔹 /get_rate — получить текущий курс USDT/RUB\n\
                 🔹 /help — эта справка\n\n\
                 🛠 Админские команды:\n\
                 🔹 /setinterval <сек> — изменить интервал обновления\n\
                 🔹 /status — состояние публикации\n\
                 🔹 /users — список пользователей\n\
                 🔹 /stats — статистика бота\n\
                 🔹 /cleanup — очистка неактивных пользователей\n\n\
                 💡 Курс публикуется в канал каждые {minutes} мин."
            ))
        }
        Command::SetInterval(arg) => set_interval(ctx, from, arg.as_deref()),
        Command::Status => Reply::plain(format_status(&ctx.service.get_schedule_status())),
        Command::Users => Reply::plain(format_users(&ctx.users)),
        Command::Stats => Reply::plain(format!(
            "{}\n{}",
            ctx.stats.report(),
            ctx.users.summary(now)
        )),
        Command::Cleanup => match ctx.users.cleanup_inactive(DEFAULT_CLEANUP_DAYS, now).await {
            Ok(n) => Reply::plain(format!(
                "🧹 Очистка завершена\nУдалено неактивных пользователей: {n}"
            )),
            Err(e) => {
                tracing::warn!(target: "bot", error = %format!("{e:#}"), "cleanup failed");
                Reply::plain("❌ Не удалось выполнить очистку.")
            }
        },
    }
}

fn set_interval(ctx: &BotContext, from: &UserProfile, arg: Option<&str>) -> Reply {
    let Some(raw) = arg else {
        return Reply::plain(format!(
            "Использование: /setinterval <секунд>\nМинимальный интервал: {MIN_CHAT_INTERVAL_SECS} секунд"
        ));
    };
    let Ok(secs) = raw.parse::<i64>() else {
        return Reply::plain("❌ Введите корректное число");
    };
    if secs < MIN_CHAT_INTERVAL_SECS {
        return Reply::plain(format!(
            "❌ Интервал должен быть минимум {MIN_CHAT_INTERVAL_SECS} секунд"
        ));
    }
    match ctx.service.set_publish_interval(secs) {
        Ok(()) => {
            tracing::info!(target: "bot", admin = from.id, secs, "publish interval changed by admin");
            Reply::plain(format!(
                "✅ Интервал обновления установлен: {secs} сек. ({} мин.)",
                secs / 60
            ))
        }
        Err(e) => Reply::plain(format!("❌ {e}")),
    }
}

fn format_status(s: &ScheduleSnapshot) -> String {
    let mut out = String::from("⚙️ Публикация:\n");
    out.push_str(&format!("• Состояние: {:?}\n", s.phase));
    out.push_str(&format!("• Режим: {}\n", s.policy.as_str()));
    out.push_str(&format!("• Интервал: {} сек.\n", s.interval_secs));
    if let Some(secs) = s.next_fire_in_secs {
        out.push_str(&format!("• Следующая публикация через: {secs} сек.\n"));
    }
    match &s.last_published {
        Some(q) => out.push_str(&format!(
            "• Последний курс: ₽{:.2} ({})\n",
            q.value().round_dp(2),
            q.source()
        )),
        None => out.push_str("• Последний курс: —\n"),
    }
    out.push_str(&format!(
        "• Тиков: {}, публикаций: {}, пропущено: {}",
        s.ticks, s.publishes, s.skipped_ticks
    ));
    out
}

fn format_users(users: &UserRegistry) -> String {
    if users.is_empty() {
        return "👥 Нет зарегистрированных пользователей".to_string();
    }
    let mut out = String::from("👥 Список пользователей:\n\n");
    for u in users.list(USERS_LISTED) {
        out.push_str(&format!("• {} (ID: {})\n", u.display_name(), u.id));
        out.push_str(&format!(
            "  📅 Регистрация: {}\n",
            u.registration_date.format("%d.%m.%Y")
        ));
        out.push_str(&format!("  📊 Команд: {}\n\n", u.command_count));
    }
    let total = users.len();
    if total > USERS_LISTED {
        out.push_str(&format!("... и еще {} пользователей", total - USERS_LISTED));
    }
    out
}

/// Long-poll Telegram for commands until `shutdown` flips.
pub async fn run_polling(
    client: TelegramClient,
    ctx: Arc<BotContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset: Option<i64> = None;
    tracing::info!(target: "bot", "command polling started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let polled = tokio::select! {
            r = client.get_updates(offset, POLL_SECS) => r,
            _ = shutdown.changed() => break,
        };

        match polled {
            Ok(updates) => {
                for up in updates {
                    offset = Some(up.update_id + 1);
                    if let Some(msg) = up.message {
                        dispatch(&client, &ctx, msg).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(target: "bot", error = %format!("{e:#}"), "getUpdates failed");
                tokio::select! {
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    tracing::info!(target: "bot", "command polling stopped");
}

async fn dispatch(client: &TelegramClient, ctx: &BotContext, msg: telegram::Message) {
    let (Some(text), Some(from)) = (msg.text.as_deref(), msg.from.as_ref()) else {
        return;
    };
    let Some(cmd) = Command::parse(text) else {
        return;
    };
    let profile = UserProfile::from(from);
    tracing::debug!(target: "bot", user_id = profile.id, command = cmd.name(), "command received");

    let reply = handle_command(ctx, &profile, &cmd).await;
    let chat = msg.chat.id.to_string();
    let topic = msg.message_thread_id.map(|t| t.to_string());
    if let Err(e) = client
        .send_text(&chat, topic.as_deref(), &reply.text, reply.markdown)
        .await
    {
        tracing::warn!(target: "bot", chat = %chat, error = %format!("{e:#}"), "reply failed");
    }
}
