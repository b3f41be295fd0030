//! Application state wiring storage, handlers, and the dispatcher together.
//!
//! AppState is shared by the shell, the webhook server, and the read-only
//! history commands. The backend is chosen once here from `[storage]`.

use std::sync::Arc;

use parley_core::dispatcher::{Dispatcher, DispatcherOptions};
use parley_core::store::{EventStore, StoreOptions};
use parley_infra::backend::open_backend;
use parley_types::config::ParleyConfig;

use crate::bot::{self, DemoBot};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ParleyConfig>,
    pub dispatcher: Arc<Dispatcher>,
    /// Client for outbound webhook delivery.
    pub http: reqwest::Client,
}

impl AppState {
    /// Initialize the application state: open the backend, register handlers.
    pub async fn init(config: ParleyConfig, bot: DemoBot) -> anyhow::Result<Self> {
        let backend = open_backend(&config.storage).await?;
        let store = EventStore::with_options(
            backend,
            StoreOptions {
                session_markers: config.dispatch.session_markers,
                session_gap: config.dispatch.session_gap(),
            },
        );
        let options = DispatcherOptions {
            session_gap: config.dispatch.session_gap(),
            handler_timeout: config.dispatch.handler_timeout(),
        };
        let dispatcher = Dispatcher::with_options(store, bot::registry(bot), options);
        tracing::debug!(bot = ?bot, handlers = dispatcher.registry().len(), "dispatcher ready");

        Ok(Self::from_parts(config, dispatcher))
    }

    pub fn from_parts(config: ParleyConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            http: reqwest::Client::new(),
        }
    }

    pub fn store(&self) -> &EventStore {
        self.dispatcher.store()
    }
}
