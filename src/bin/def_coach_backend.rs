use anyhow::{Context, Result};
use def_coach::config::CoachConfig;
use def_coach::runtime::CoachRuntime;
use def_coach::server::serve_backend;
use flume::unbounded;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,def_coach=debug")),
        )
        .init();

    let config = CoachConfig::load();
    let (event_tx, event_rx) = unbounded();

    tracing::info!(
        "Starting DEF coach backend (model {}, store {})",
        config.llm_model,
        config.database_path
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(async move {
        let runtime = CoachRuntime::bootstrap(config, event_tx)
            .await
            .context("failed to bootstrap backend runtime")?;
        serve_backend(runtime, event_rx).await
    })
}
