pub mod bot;
pub mod sources;

pub use bot::BotConfig;
pub use sources::{load_sources_default, load_sources_from, ExtractRule, SourceConfig, SourcesConfig};
