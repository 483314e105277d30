//! Offline bundle build service.
//!
//! HTTP-triggered composition root: wires the cache store, edge store,
//! routing/elevation wrappers, POI engine, overlay fan-out, and bundle
//! assembler into one [`roam_orchestrator::BundleOrchestrator`] and serves
//! it over a thin `axum` surface.
//!
//! # Usage
//!
//! ```bash
//! bundle-service --port 8090
//! ```

mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use roam_common::config::RoamConfig;
use roam_elevation::ElevationClient;
use roam_orchestrator::BundleOrchestrator;
use roam_overlays::{HazardsEngine, TrafficEngine};
use roam_places::{OverpassClient, PlacesEngine, PlacesEngineConfig, PostgrestPlacesPool};
use roam_routing::OsrmClient;
use roam_storage::{create_edges_db, PackCache, PlacesStore};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use server::{start_server, ServerState};

#[derive(Parser, Debug)]
#[command(name = "bundle-service")]
#[command(about = "Offline bundle build HTTP service")]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value = "8090")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("starting offline bundle build service");

    let config = RoamConfig::from_env();

    let cache = PackCache::connect(&config.cache_db_path).await?;
    let edges = Arc::<dyn roam_storage::EdgesDb>::from(
        create_edges_db(
            config.edges_database_url.as_deref(),
            Some(&config.edges_db_path),
        )
        .await?,
    );

    let remote_pool = if config.remote_pool_enabled {
        match (&config.remote_pool_url, &config.remote_pool_api_key) {
            (Some(url), Some(key)) => Some(Arc::new(PostgrestPlacesPool::new(url.clone(), key.clone(), 500))
                as Arc<dyn roam_places::RemotePlacesPool>),
            _ => {
                info!("remote_pool_enabled is set but URL/key are missing, skipping remote pool");
                None
            }
        }
    } else {
        None
    };

    let places_store = PlacesStore::new(&cache);
    let overpass = OverpassClient::new(
        &config.overpass_url,
        config.overpass_timeout_s,
        config.overpass_retries,
        config.overpass_retry_base_s,
    );
    let places_config = PlacesEngineConfig {
        algo_version: config.places_algo_version.clone(),
        places_hard_cap: config.places_hard_cap,
        local_satisfy_ratio: config.places_local_satisfy_ratio,
        tile_step_deg: config.places_tile_step_deg,
        max_tiles: config.places_max_tiles as usize,
        tile_ttl_secs: config.places_tile_ttl_s as i64,
        time_budget_s: config.places_time_budget_s,
        max_overpass_tiles_per_request: config.places_max_overpass_tiles_per_req as usize,
        overpass_throttle_ms: (config.overpass_throttle_s * 1000.0) as u64,
        remote_publish_cap: config.places_remote_publish_cap as usize,
        corridor_sample_interval_km: 10.0,
        corridor_accept_radius_m: 500.0,
    };
    let places = PlacesEngine::new(cache.clone(), places_store, remote_pool, overpass, places_config);

    let orchestrator = BundleOrchestrator::new(
        cache.clone(),
        OsrmClient::new(
            &config.osrm_base_url,
            &config.osrm_profile,
            &config.algo_version,
            config.osrm_timeout_s,
        ),
        ElevationClient::new(
            &config.elevation_base_url,
            config.elevation_timeout_s,
            config.elevation_batch_size,
        ),
        roam_corridor::CorridorService::new(
            cache.clone(),
            edges,
            config.corridor_algo_version.as_str(),
        ),
        places,
        TrafficEngine::new(cache.clone()),
        HazardsEngine::new(cache.clone()),
    );

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let state = Arc::new(ServerState {
        orchestrator,
        config,
        metrics_handle,
    });

    info!(port = args.port, "starting HTTP server");
    start_server(state, args.port).await?;

    Ok(())
}
