//! Entry point: loads configuration, wires the keyword registry, the hub
//! client, the exposure registry and persistence pool, publishes the
//! installation's static keywords, and serves the HTTP command surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;

use sps_exposure_actor::detector::LightSourceTable;
use sps_exposure_actor::http::{self, AppState};
use sps_exposure_actor::hub::HubClient;
use sps_exposure_actor::persistence;
use sps_exposure_actor::registry::ExposureRegistry;
use sps_exposure_core::{ExposureConfig, KeywordRegistry, RemoteClient};

/// Static keyword values published once at startup (§6 Emitted keywords):
/// these describe the installation, not any in-flight exposure, so they
/// never change after the actor comes up.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StaticKeywords {
    spec_modules: Vec<u8>,
    sps_modules: Vec<u8>,
    default_cams: Vec<String>,
    available_cams: Vec<String>,
}

impl Default for StaticKeywords {
    fn default() -> Self {
        Self {
            spec_modules: vec![1, 2, 3, 4],
            sps_modules: vec![1, 2, 3, 4],
            default_cams: Vec::new(),
            available_cams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct AppConfig {
    listen_addr: SocketAddr,
    hub_addr: SocketAddr,
    exposure: ExposureConfig,
    keywords: StaticKeywords,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 9000).into(),
            hub_addr: ([127, 0, 0, 1], 6093).into(),
            exposure: ExposureConfig::default(),
            keywords: StaticKeywords::default(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Multi-spectrograph exposure orchestration actor")]
struct Cli {
    /// Path to a TOML configuration file; a missing file falls back to defaults.
    #[arg(long, default_value = "spsActor.toml")]
    config: PathBuf,
}

fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "no config file found, using defaults");
            Ok(AppConfig::default())
        }
        Err(err) => Err(err.into()),
    }
}

/// Publishes the installation's static keywords once at startup. Modeled
/// as `tracing::info!` the same way `pfiShutters`/`fiberIllumination` are,
/// since keyword *transport* is its own concern and not this crate's job.
fn publish_static_keywords(keywords: &StaticKeywords) {
    let spec_modules = keywords.spec_modules.iter().map(u8::to_string).collect::<Vec<_>>().join(",");
    let sps_modules = keywords.sps_modules.iter().map(u8::to_string).collect::<Vec<_>>().join(",");
    tracing::info!(value = spec_modules, "specModules=");
    tracing::info!(value = sps_modules, "spsModules=");
    tracing::info!(value = keywords.default_cams.join(","), "defaultCams=");
    tracing::info!(value = keywords.available_cams.join(","), "availableCams=");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let keyword_registry = KeywordRegistry::new();
    publish_static_keywords(&config.keywords);

    let pool = persistence::connect(&config.exposure.database_url).await?;
    let client: Arc<dyn RemoteClient> = Arc::new(HubClient::new(config.hub_addr, keyword_registry.clone()));
    let registry = Arc::new(ExposureRegistry::new(client.clone(), keyword_registry.clone(), config.exposure.clone(), pool));
    let light_sources = Arc::new(LightSourceTable::new());

    let state = AppState {
        registry,
        client,
        keywords: keyword_registry,
        config: config.exposure,
        light_sources,
    };

    let app = http::router(state);
    tracing::info!(addr = %config.listen_addr, "spsActor command surface listening");

    axum::Server::bind(&config.listen_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
