use anyhow::Result;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

mod change_detector;
mod chunk;
mod classifier;
mod config;
mod content_injector;
mod coordinator;
mod embedder;
mod error;
mod events;
mod extractor;
mod file_filter;
mod hybrid_indexer;
mod keyword_store;
mod lang;
mod project;
mod registry;
mod retriever;
mod routes;
mod server;
mod state;
mod state_repository;
mod symbols;
mod vector_store;
mod watcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Resolve log directory (same parent as data_dir or from env)
    let log_dir = std::env::var("RAGFORGE_LOG_DIR").unwrap_or_else(|_| {
        dirs::data_local_dir()
            .map(|d| d.join("ragforge").join("logs").to_string_lossy().to_string())
            .unwrap_or_else(|| ".ragforge-data/logs".to_string())
    });
    std::fs::create_dir_all(&log_dir).ok();

    // File appender: daily rotated log files
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragforge.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Build tracing subscriber with both stdout + file output using layers
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ragforge=info,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .compact();

    tracing_subscriber::registry().with(env_filter).with(stdout_layer).with(file_layer).init();

    // Install panic hook that logs before aborting
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())).unwrap_or_default();
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        error!(target: "ragforge::panic", location = %location, payload = %payload, "PANIC: thread panicked");
        default_panic(info);
    }));

    routes::health::init_start_time();

    let config = config::AppConfig::from_env();
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        max_index_size_mb = config.max_index_size_mb,
        max_file_size_bytes = config.max_file_size_bytes,
        max_indexed_files = config.max_indexed_files,
        watcher_debounce_ms = config.watcher_debounce_ms,
        index_batch_size = config.index_batch_size,
        log_dir = %log_dir,
        "ragforge backend starting"
    );

    let app_state = state::AppState::new(config).await?;

    routes::health::init_shutdown_notify();

    let app = server::create_app(app_state.clone());

    // IMPORTANT: bind the TCP listener and start serving BEFORE restoring
    // project watchers. This keeps /health available immediately instead of
    // blocking on potentially slow per-project watcher startup.
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ragforge backend listening on {}", addr);

    let enable_file_watcher = app_state.config.enable_file_watcher;
    let registry = app_state.registry.clone();
    tokio::spawn(async move {
        if !enable_file_watcher {
            info!("File watching is disabled via settings, skipping watcher restoration");
            return;
        }
        let projects = registry.list_projects();
        let mut restored = 0;
        let mut total = 0;
        for project in &projects {
            for source in &project.knowledge_sources {
                total += 1;
                match registry.coordinator_for(&project.id, source.id()) {
                    Ok(coordinator) => {
                        tokio::spawn(async move {
                            if let Err(e) = coordinator.run_pass(true).await {
                                tracing::warn!("Failed to restore indexing/watching for knowledge source: {}", e);
                            }
                        });
                        restored += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Failed to build coordinator for project {} source {}: {}",
                            project.display_name,
                            source.id(),
                            e
                        );
                    }
                }
            }
        }
        if total > 0 {
            info!("Restored {}/{} knowledge source watcher(s) in background", restored, total);
        }
    });

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("ragforge backend shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = async {
        tokio::signal::ctrl_c().await.expect("failed to install secondary Ctrl+C handler");
    };

    let http_shutdown = routes::health::wait_for_shutdown();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, initiating shutdown"); },
        _ = terminate => { info!("Received terminate signal, initiating shutdown"); },
        _ = http_shutdown => { info!("Received HTTP shutdown request, initiating shutdown"); },
    }

    info!("Shutdown signal received");
}
