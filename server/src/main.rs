// Forbid unwrap() in production code to prevent panics on bad input.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::net::SocketAddr;
use std::sync::Arc;

use btree_server::{
    Dispatcher,
    audit::AuditLog,
    auth::{SessionTokens, TokenConfig},
    config::ServerConfig,
    engine::{EngineConfig, EngineInvoker},
    samples::SampleCatalog,
    session::{ArtifactLayout, SessionStore, spawn_sweep_task},
    time::{SystemTimeSource, TimeSource},
    web::{AppState, router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "btree_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: session_directory={}, sample_directory={}, engine={}, listen_port={}",
        config.session_directory.display(),
        config.sample_directory.display(),
        config.engine_path.display(),
        config.listen_port
    );

    // Pre-condition: config.session_directory is a valid path.
    // Post-condition: The directory exists and is accessible.
    if let Err(e) = std::fs::create_dir_all(&config.session_directory) {
        tracing::error!("Failed to create session directory: {e}");
        std::process::exit(1);
    }
    if !config.sample_directory.is_dir() {
        tracing::warn!(
            "sample directory {} does not exist; sample builds will fail",
            config.sample_directory.display()
        );
    }

    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let layout = ArtifactLayout::new(config.session_directory.clone());

    let store = match SessionStore::open(layout.clone(), config.session_config(), Arc::clone(&time))
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open session store: {e}");
            std::process::exit(1);
        }
    };
    let _sweep = spawn_sweep_task(Arc::downgrade(&store), config.sweep_config());

    let token_config =
        match TokenConfig::new_hs256(config.token_secret.clone(), config.token_lifetime_secs) {
            Ok(token_config) => token_config,
            Err(e) => {
                tracing::error!("Invalid token configuration: {e}");
                std::process::exit(1);
            }
        };

    let mut engine_config = EngineConfig::new(config.engine_path.clone());
    engine_config.timeout = config.engine_timeout();

    let dispatcher = Dispatcher::new(
        store,
        EngineInvoker::new(engine_config, layout),
        SessionTokens::new(&token_config, Arc::clone(&time)),
        SampleCatalog::new(config.sample_directory.clone()),
        AuditLog::new(config.audit_log.clone()),
        config.max_upload_bytes,
        time,
    );

    let app = router(AppState {
        dispatcher: Arc::new(dispatcher),
        max_upload_bytes: config.max_upload_bytes,
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], config.listen_port));
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind: {e}");
            std::process::exit(1);
        });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}
