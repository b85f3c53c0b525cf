use async_trait::async_trait;
use axum::http::request::Parts;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::Datastore;
use crate::notify::Mailer;
use crate::pipeline::{RequestState, Stage, StageOrder, StageResult};

/// Attaches the process configuration to the request
pub struct ConfigInjector {
    config: Arc<AppConfig>,
}

impl ConfigInjector {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl<D: Datastore> Stage<D> for ConfigInjector {
    fn name(&self) -> &'static str {
        "config"
    }

    fn order(&self) -> StageOrder {
        StageOrder::ConfigInjection
    }

    async fn process(&self, _parts: &Parts, state: &mut RequestState<D>) -> StageResult {
        state.config = Some(Arc::clone(&self.config));
        Ok(())
    }
}

/// Attaches the shared mail client to the request
pub struct NotificationInjector {
    mailer: Mailer,
}

impl NotificationInjector {
    pub fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl<D: Datastore> Stage<D> for NotificationInjector {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn order(&self) -> StageOrder {
        StageOrder::Notification
    }

    async fn process(&self, _parts: &Parts, state: &mut RequestState<D>) -> StageResult {
        state.mailer = Some(self.mailer.clone());
        Ok(())
    }
}
