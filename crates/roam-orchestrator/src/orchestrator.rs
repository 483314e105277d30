//! Composes the corridor, POI, overlay, routing, elevation, and bundle
//! layers into one end-to-end bundle build for a plan.

use roam_bundle::{BundleAssembler, BundleZip, ManifestRequest};
use roam_common::config::RoamConfig;
use roam_common::contracts::{
    NavRequest, NavRoute, OfflineBundleManifest, PlaceCategory, PlacesRequest,
};
use roam_common::error::RoamResult;
use roam_common::keying::route_key_from_request;
use roam_corridor::CorridorService;
use roam_elevation::ElevationClient;
use roam_overlays::{HazardsEngine, TrafficEngine};
use roam_places::PlacesEngine;
use roam_routing::OsrmClient;
use roam_storage::PackCache;
use tracing::info;

/// Everything the caller supplies for one bundle build beyond what's
/// already cached: the trip request and the POI categories to search for.
#[derive(Debug, Clone)]
pub struct BundleBuildRequest {
    pub plan_id: String,
    pub nav_request: NavRequest,
    pub categories: Vec<PlaceCategory>,
    pub buffer_m: u32,
    pub max_edges: u32,
}

/// Composition root for one bundle build: owns every leaf service and
/// drives them in the order the manifest depends on.
pub struct BundleOrchestrator {
    cache: PackCache,
    routing: OsrmClient,
    elevation: ElevationClient,
    corridor: CorridorService,
    places: PlacesEngine,
    traffic: TrafficEngine,
    hazards: HazardsEngine,
    bundle: BundleAssembler,
}

impl BundleOrchestrator {
    pub fn new(
        cache: PackCache,
        routing: OsrmClient,
        elevation: ElevationClient,
        corridor: CorridorService,
        places: PlacesEngine,
        traffic: TrafficEngine,
        hazards: HazardsEngine,
    ) -> Self {
        let bundle = BundleAssembler::new(cache.clone());
        Self {
            cache,
            routing,
            elevation,
            corridor,
            places,
            traffic,
            hazards,
            bundle,
        }
    }

    /// Routes the trip, fills in its elevation profile, and persists the
    /// resulting `NavRoute` under its content-address key. No retries —
    /// the routing and elevation wrappers each own their own resilience.
    pub async fn ensure_route(
        &self,
        req: &NavRequest,
        algo_version: &str,
        elevation_sample_interval_m: f64,
        grade_segment_km: f64,
    ) -> RoamResult<NavRoute> {
        let route_key = route_key_from_request(req, algo_version);
        if let Some(cached) = self.cache.get_nav_pack::<NavRoute>(&route_key).await? {
            return Ok(cached);
        }

        let mut route = self.routing.route(req).await?;

        let profile = self
            .elevation
            .profile(&route.polyline6, elevation_sample_interval_m)
            .await?;
        route.ascent_m = Some(profile.total_ascent_m);
        route.descent_m = Some(profile.total_descent_m);
        route.grade_segments =
            roam_elevation::compute_grade_segments(&profile, grade_segment_km);

        self.cache
            .put_nav_pack(&route_key, algo_version, &route)
            .await?;

        Ok(route)
    }

    /// Builds and persists the offline bundle manifest for an already
    /// routed plan: ensure the corridor, then run POI search and both
    /// overlay polls concurrently against the corridor bbox, then
    /// assemble the manifest referencing whatever came back ready.
    pub async fn build_bundle(
        &self,
        config: &RoamConfig,
        req: &BundleBuildRequest,
        route: &NavRoute,
    ) -> RoamResult<OfflineBundleManifest> {
        let corridor = self
            .corridor
            .ensure(
                &route.route_key,
                &route.polyline6,
                &route.profile,
                req.buffer_m,
                req.max_edges,
            )
            .await?;

        let places_req = PlacesRequest {
            bbox: Some(corridor.pack.bbox),
            center: None,
            radius_m: None,
            categories: req.categories.clone(),
            query: None,
            limit: None,
        };

        let (places_result, traffic_result, hazards_result) = tokio::join!(
            self.places.search(&places_req),
            self.traffic.poll(config, &corridor.pack.bbox),
            self.hazards.poll(config, &corridor.pack.bbox),
        );

        let places = log_and_unwrap("places search", places_result);
        let traffic = log_and_unwrap("traffic poll", traffic_result);
        let hazards = log_and_unwrap("hazards poll", hazards_result);

        let manifest_req = ManifestRequest {
            plan_id: req.plan_id.clone(),
            route_key: route.route_key.clone(),
            navpack_ready: true,
            corridor_key: Some(corridor.meta.corridor_key.clone()),
            corridor_ready: true,
            places_key: places.as_ref().map(|p| p.places_key.clone()),
            places_ready: places.is_some(),
            traffic_key: traffic.as_ref().map(|t| t.traffic_key.clone()),
            traffic_ready: traffic.is_some(),
            hazards_key: hazards.as_ref().map(|h| h.hazards_key.clone()),
            hazards_ready: hazards.is_some(),
            algo_version: config.algo_version.clone(),
        };

        self.bundle.build_manifest(&manifest_req).await
    }

    /// Routes, builds the corridor/POI/overlay layer, and assembles the
    /// manifest in one call — the common path for a fresh plan.
    pub async fn build(
        &self,
        config: &RoamConfig,
        req: &BundleBuildRequest,
    ) -> RoamResult<OfflineBundleManifest> {
        let route = self
            .ensure_route(
                &req.nav_request,
                &config.algo_version,
                config.elevation_sample_interval_m,
                config.elevation_grade_segment_km,
            )
            .await?;
        self.build_bundle(config, req, &route).await
    }

    /// Zips every asset a persisted manifest references.
    pub async fn zip_bundle(&self, plan_id: &str) -> RoamResult<BundleZip> {
        self.bundle.build_zip(plan_id).await
    }
}

/// A POI or overlay failure demotes a ready asset to `missing` rather than
/// failing the whole bundle build — only the manifest's readiness flags
/// see the difference.
fn log_and_unwrap<T>(stage: &str, result: RoamResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            info!(stage, error = %e, "bundle build stage unavailable, omitting from manifest");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roam_common::contracts::TripStop;
    use roam_overlays::HazardsEngine as Hazards;
    use roam_overlays::TrafficEngine as Traffic;
    use roam_places::{PlacesEngine as Places, PlacesEngineConfig};
    use roam_storage::{EdgeRow, EdgesDb};
    use std::sync::Arc;

    struct EmptyEdgesDb;

    #[async_trait]
    impl EdgesDb for EmptyEdgesDb {
        async fn query_bbox(
            &self,
            _min_lng: f64,
            _max_lng: f64,
            _min_lat: f64,
            _max_lat: f64,
            _max_edges: u32,
        ) -> RoamResult<Vec<EdgeRow>> {
            Ok(Vec::new())
        }

        async fn count(&self) -> RoamResult<i64> {
            Ok(0)
        }
    }

    fn sample_nav_request() -> NavRequest {
        NavRequest {
            profile: "drive".to_string(),
            prefs: serde_json::json!({}),
            stops: vec![
                TripStop {
                    id: Some("start".to_string()),
                    r#type: "start".to_string(),
                    lat: -27.4698,
                    lng: 153.0251,
                    name: None,
                },
                TripStop {
                    id: Some("end".to_string()),
                    r#type: "end".to_string(),
                    lat: -28.0167,
                    lng: 153.4000,
                    name: None,
                },
            ],
            avoid: vec![],
            depart_at: None,
        }
    }

    #[tokio::test]
    async fn build_bundle_persists_manifest_even_when_overlays_are_unconfigured() {
        let cache = PackCache::connect(":memory:").await.unwrap();
        let mut config = RoamConfig::from_env();
        // Keep this test offline: disable every feed so traffic/hazards
        // polling never reaches out to a real upstream.
        config.qldtraffic_events_url = String::new();
        config.nsw_traffic_enabled = false;
        config.vic_traffic_enabled = false;
        config.sa_traffic_enabled = false;
        config.wa_traffic_enabled = false;
        config.nt_traffic_enabled = false;
        config.dea_hotspots_enabled = false;
        config.tas_hazards_enabled = false;
        config.hazards_enable_bom_rss = false;
        config.qld_disaster_cap_url = String::new();
        config.qld_emergency_alerts_url = String::new();

        let route = NavRoute {
            route_key: "route-key-test".to_string(),
            profile: "drive".to_string(),
            distance_m: 64000.0,
            duration_s: 3600.0,
            polyline6: roam_common::polyline6::encode(&[
                (-27.4698, 153.0251),
                (-28.0167, 153.4000),
            ]),
            legs: vec![],
            ascent_m: Some(120.0),
            descent_m: Some(80.0),
            grade_segments: vec![],
            algo_version: config.algo_version.clone(),
            created_at: roam_common::time::now_iso(),
        };
        cache
            .put_nav_pack(&route.route_key, &config.algo_version, &route)
            .await
            .unwrap();

        let orchestrator = BundleOrchestrator::new(
            cache.clone(),
            OsrmClient::new(&config.osrm_base_url, &config.osrm_profile, &config.algo_version, 1),
            ElevationClient::new(&config.elevation_base_url, 1, config.elevation_batch_size),
            CorridorService::new(
                cache.clone(),
                Arc::new(EmptyEdgesDb),
                config.corridor_algo_version.as_str(),
            ),
            Places::new(
                cache.clone(),
                roam_storage::PlacesStore::new(&cache),
                None,
                roam_places::OverpassClient::new(
                    &config.overpass_url,
                    config.overpass_timeout_s,
                    0,
                    config.overpass_retry_base_s,
                ),
                PlacesEngineConfig::default(),
            ),
            Traffic::new(cache.clone()),
            Hazards::new(cache.clone()),
        );

        let build_req = BundleBuildRequest {
            plan_id: "plan-1".to_string(),
            nav_request: sample_nav_request(),
            categories: vec![],
            buffer_m: 15_000,
            max_edges: 350_000,
        };

        let manifest = orchestrator
            .build_bundle(&config, &build_req, &route)
            .await
            .unwrap();

        assert_eq!(manifest.plan_id, "plan-1");
        assert_eq!(manifest.route_key, route.route_key);
        assert!(manifest.assets.iter().any(|a| a.kind == "navpack" && a.present));
        assert!(manifest.assets.iter().any(|a| a.kind == "corridor" && a.present));

        let fetched: OfflineBundleManifest = cache.get_manifest("plan-1").await.unwrap().unwrap();
        assert_eq!(fetched.total_bytes, manifest.total_bytes);
    }
}
