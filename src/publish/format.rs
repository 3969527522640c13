use chrono::{DateTime, TimeZone};

use crate::rates::RateQuote;

/// Channel message: `💵 USDT = ₽95.43 ([OKX](https://…)) 14:05`.
/// Markdown (legacy) link; parentheses in the url are escaped.
pub fn format_rate_message<Tz>(quote: &RateQuote, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let source = match quote.url() {
        Some(url) => format!(
            "[{}]({})",
            quote.source(),
            url.replace('(', "\\(").replace(')', "\\)")
        ),
        None => quote.source().to_string(),
    };
    format!(
        "💵 USDT = ₽{:.2} ({}) {}",
        quote.value().round_dp(2),
        source,
        at.format("%H:%M")
    )
}

/// Interactive reply when no source could produce a rate.
pub fn format_unavailable() -> String {
    "❌ Не удалось получить курс. Попробуйте позже.".to_string()
}
