//! Shared application state

use std::sync::Arc;

use crate::bot::{BotRegistry, PolicyFactory};
use crate::config::Config;

/// State shared by the dispatcher and every connection task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<BotRegistry>,
    pub factory: PolicyFactory,
}

impl AppState {
    pub fn new(config: Config, factory: PolicyFactory) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(BotRegistry::new()),
            factory,
        }
    }
}
