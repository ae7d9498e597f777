use std::sync::Arc;
use std::time::Duration;

use mugin_rs::config::{config_path, load_config, AppConfig};
use mugin_rs::observability::init_tracing;
use mugin_rs::routing::dispatch::normalize_base_path;
use mugin_rs::routing::serve;
use mugin_rs::state::AppState;
use mugin_rs::transport::UpstreamClient;

fn main() {
    let path = config_path();
    let config = load_config(&path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {path}: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let worker_threads = config.server.runtime_worker_threads;
    let mut runtime_builder = if worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);

    let upstream = UpstreamClient::new(
        config.vendors.clone(),
        Duration::from_secs(config.server.timeout),
    )
    .unwrap_or_else(|err| {
        eprintln!("Failed to build vendor client: {err}");
        std::process::exit(1);
    });
    let state = Arc::new(AppState::new(config, Arc::new(upstream)));

    for (vendor, info) in &state.app_info().vendors {
        tracing::info!(
            vendor = %vendor,
            enabled = info.enabled,
            models = info.models.len(),
            "vendor configured"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!(
        "{} starting on {}:{} with base_path='{}'",
        state.app_info().name,
        host,
        port,
        base_path
    );
    serve(listener, state).await;
}
