mod api;
mod assets;
mod config;
mod range;
mod recommend;
mod scan;
mod similarity;
mod state;
mod utils;
mod watch;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use api::api_router;
use axum::Router;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::Library;
use metadata::LoftyExtractor;
use parking_lot::RwLock;
use recommend::Recommender;
use reqwest::Client;
use scan::ScanCoordinator;
use similarity::LastFmClient;
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use watch::configure_watcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let index_path = resolve_path(&config_path, config.index_path.trim());
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let music_root = resolve_path(&config_path, config.music_root.trim());
    if !music_root.is_dir() {
        warn!("Music directory not found: {}", music_root.display());
    }
    let library = Library::open(music_root, &index_path)?;

    let http_client = Client::builder().user_agent("cadence/0.1").build()?;
    let api_key = config.lastfm_api_key();
    if api_key.is_none() {
        info!("Last.fm API key not set; similar tracks use local signals only");
    }
    let similarity = LastFmClient::new(
        http_client,
        api_key,
        &config.lastfm_base_url,
        config.similarity_timeout(),
    );

    let scans = ScanCoordinator::new(library.clone(), Arc::new(LoftyExtractor));
    let state = AppState {
        recommender: Recommender::new(library.clone(), Arc::new(similarity)),
        library,
        scans,
        config: Arc::new(RwLock::new(config.clone())),
        watcher: Arc::new(RwLock::new(None)),
    };

    if config.scan_on_start {
        state.scans.start();
    }
    if let Some(every) = config.scan_interval() {
        info!("Scheduled library scan every {}s", every.as_secs());
        state.scans.spawn_periodic(every);
    }
    configure_watcher(&state);

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
