pub mod commands;
pub mod discover;
pub mod run;
pub mod serve;
pub mod validate;

pub use commands::{Cli, Commands};

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{parse_config, Settings};
use crate::errors::OrchestraError;
use crate::resilience::{EscalationChannel, LogChannel, WebhookChannel};

/// Defaults overlaid with the config file, when one is given.
pub async fn load_settings(config: Option<&str>) -> Result<Settings, OrchestraError> {
    match config {
        Some(path) => {
            let parsed = parse_config(Path::new(path)).await?;
            info!(path, "Configuration loaded");
            Ok(Settings::from_config(&parsed))
        }
        None => Ok(Settings::default()),
    }
}

pub fn escalation_channel(settings: &Settings) -> Arc<dyn EscalationChannel> {
    match &settings.escalation_webhook {
        Some(url) => Arc::new(WebhookChannel::new(url)),
        None => Arc::new(LogChannel),
    }
}
