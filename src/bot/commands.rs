/// Chat commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    GetRate,
    Help,
    /// Raw argument, validated by the handler.
    SetInterval(Option<String>),
    Status,
    Users,
    Stats,
    Cleanup,
}

impl Command {
    /// Parse `/name[@bot] [args…]`. Anything else (plain text, unknown
    /// commands) is `None` and gets no reply.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);

        Some(match name.as_str() {
            "start" => Self::Start,
            "get_rate" | "rate" => Self::GetRate,
            "help" => Self::Help,
            "setinterval" => Self::SetInterval(arg),
            "status" => Self::Status,
            "users" => Self::Users,
            "stats" => Self::Stats,
            "cleanup" => Self::Cleanup,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::GetRate => "get_rate",
            Self::Help => "help",
            Self::SetInterval(_) => "setinterval",
            Self::Status => "status",
            Self::Users => "users",
            Self::Stats => "stats",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Self::SetInterval(_) | Self::Status | Self::Users | Self::Stats | Self::Cleanup
        )
    }
}
