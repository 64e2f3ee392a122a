use std::sync::Arc;

use anyhow::{Context, Result};
use flume::Sender;

use crate::config::CoachConfig;
use crate::conversation::{Credentials, Orchestrator};
use crate::habits::HabitBook;
use crate::llm_client::{ChatTransport, OpenRouterClient};
use crate::scheduler::{CoachEvent, TriggerScheduler};
use crate::store::{SqliteStateStore, StateStore};
use crate::tools::{register_builtin_tools, ToolRegistry};

pub struct CoachRuntime {
    pub config: CoachConfig,
    pub book: Arc<HabitBook>,
    pub tool_registry: Arc<ToolRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: TriggerScheduler,
}

pub struct CoachRuntimeBuilder {
    config: CoachConfig,
    event_tx: Sender<CoachEvent>,
    store: Option<Arc<dyn StateStore>>,
    transport: Option<Arc<dyn ChatTransport>>,
    seed_credential: Option<String>,
}

impl CoachRuntimeBuilder {
    pub fn new(config: CoachConfig, event_tx: Sender<CoachEvent>) -> Self {
        Self {
            config,
            event_tx,
            store: None,
            transport: None,
            seed_credential: None,
        }
    }

    /// Use this store instead of opening `database_path`.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Credential written to the store only if none is stored yet.
    pub fn with_seed_credential(mut self, key: Option<String>) -> Self {
        self.seed_credential = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub async fn build(self) -> Result<CoachRuntime> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => {
                let db = SqliteStateStore::new(&config.database_path).with_context(|| {
                    format!("Failed to open state database {}", config.database_path)
                })?;
                tracing::info!("Opened state database {}", config.database_path);
                Arc::new(db)
            }
        };

        let book = Arc::new(HabitBook::new(store, config.max_tasks_per_day));
        book.seed_defaults()?;
        if let Some(key) = self.seed_credential {
            if book.credential()?.is_none() {
                book.set_credential(&key)?;
                tracing::info!("Seeded API key from environment");
            }
        }

        let tool_registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tool_registry).await;

        let transport: Arc<dyn ChatTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(OpenRouterClient::new(
                config.llm_api_url.clone(),
                config.app_referer.clone(),
            )),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            transport,
            tool_registry.clone(),
            book.clone(),
            config.llm_model.clone(),
            config.temperature,
        ));

        let scheduler = TriggerScheduler::new(
            orchestrator.clone(),
            self.event_tx,
            config.daily_title.clone(),
            config.refresh_debounce(),
            config.daily_gate(),
        );

        Ok(CoachRuntime {
            config,
            book,
            tool_registry,
            orchestrator,
            scheduler,
        })
    }
}

impl CoachRuntime {
    pub async fn bootstrap(config: CoachConfig, event_tx: Sender<CoachEvent>) -> Result<Self> {
        CoachRuntimeBuilder::new(config, event_tx)
            .with_seed_credential(std::env::var("OPENROUTER_API_KEY").ok())
            .build()
            .await
    }

    /// Credentials for a user-initiated chat turn, read fresh from the store.
    pub fn chat_credentials(&self) -> Result<Credentials> {
        let api_key = self.book.credential()?;
        Ok(Credentials::new(api_key, self.config.chat_title.clone()))
    }

    /// Kick off the startup daily gate in the background.
    pub fn spawn_daily_gate(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            if let Some(Err(e)) = scheduler.run_daily_gate().await {
                tracing::warn!("Startup daily message failed: {}", e);
            }
        })
    }
}
