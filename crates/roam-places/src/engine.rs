//! Three-tier POI search: deterministic pack cache → local canonical
//! store → shared remote pool → Overpass top-up (tiled or corridor-shaped).

use roam_common::contracts::{
    BBox4, CorridorPlacesRequest, PlaceCategory, PlaceItem, PlacesPack, PlacesRequest, RouteSuggestion,
};
use roam_common::error::RoamResult;
use roam_common::geo::{haversine_m, sample_polyline, PolylineSample};
use roam_common::keying::{corridor_places_key, places_key};
use roam_common::time::now_iso;
use metrics::counter;
use roam_storage::{PackCache, PlacesStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::overpass::{
    build_overpass_around_ql, build_overpass_ql, element_to_item, filters_for_categories, safe_name_regex,
    OverpassClient,
};
use crate::remote_pool::RemotePlacesPool;

/// Sample a polyline at `interval_km`, guaranteeing both the first and
/// last point are included (`sample_polyline` only guarantees the first).
fn sample_polyline_with_last(points: &[(f64, f64)], interval_km: f64) -> Vec<PolylineSample> {
    let mut samples = sample_polyline(points, interval_km);
    let Some(&last_point) = points.last() else {
        return samples;
    };
    let already_present = samples
        .last()
        .map(|s| (s.lat - last_point.0).abs() < 1e-9 && (s.lng - last_point.1).abs() < 1e-9)
        .unwrap_or(false);
    if !already_present {
        let total_km: f64 = points.windows(2).map(|w| haversine_m(w[0], w[1]) / 1000.0).sum();
        samples.push(PolylineSample {
            idx: samples.len(),
            lat: last_point.0,
            lng: last_point.1,
            km_from_start: total_km,
        });
    }
    samples
}

/// Tight bbox enclosing every sample padded by `buffer_m`, latitude-aware.
fn bbox_around_samples(samples: &[PolylineSample], buffer_m: f64) -> BBox4 {
    let mut min_lat = f64::MAX;
    let mut min_lng = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut max_lng = f64::MIN;
    for s in samples {
        let (dlat, dlng) = roam_common::geo::buffer_to_bbox((s.lat, s.lng), buffer_m);
        min_lat = min_lat.min(s.lat - dlat);
        max_lat = max_lat.max(s.lat + dlat);
        min_lng = min_lng.min(s.lng - dlng);
        max_lng = max_lng.max(s.lng + dlng);
    }
    BBox4::new(min_lng, min_lat, max_lng, max_lat)
}

/// Invariant/testable-property #5: every item in a polyline-search pack
/// is within `buffer_m` of at least one sample point.
fn within_buffer_of_any_sample(item: &PlaceItem, samples: &[PolylineSample], buffer_m: f64) -> bool {
    samples
        .iter()
        .any(|s| haversine_m((item.lat, item.lng), (s.lat, s.lng)) <= buffer_m)
}

/// Tunables for the engine's tiered search, mirroring the reference
/// implementation's settings surface.
#[derive(Debug, Clone)]
pub struct PlacesEngineConfig {
    pub algo_version: String,
    pub places_hard_cap: u32,
    pub local_satisfy_ratio: f64,
    pub tile_step_deg: f64,
    pub max_tiles: usize,
    pub tile_ttl_secs: i64,
    pub time_budget_s: f64,
    pub max_overpass_tiles_per_request: usize,
    pub overpass_throttle_ms: u64,
    pub remote_publish_cap: usize,
    pub corridor_sample_interval_km: f64,
    pub corridor_accept_radius_m: f64,
}

impl Default for PlacesEngineConfig {
    fn default() -> Self {
        Self {
            algo_version: "places.v1.overpass.tiled".to_string(),
            places_hard_cap: 12_000,
            local_satisfy_ratio: 0.70,
            tile_step_deg: 0.15,
            max_tiles: 64,
            tile_ttl_secs: 60 * 60 * 24 * 14,
            time_budget_s: 10.0,
            max_overpass_tiles_per_request: 12,
            overpass_throttle_ms: 200,
            remote_publish_cap: 4000,
            corridor_sample_interval_km: 10.0,
            corridor_accept_radius_m: 500.0,
        }
    }
}

pub struct PlacesEngine {
    cache: PackCache,
    store: PlacesStore,
    remote: Option<Arc<dyn RemotePlacesPool>>,
    overpass: OverpassClient,
    config: PlacesEngineConfig,
}

fn bbox_from_request(req: &PlacesRequest) -> Option<BBox4> {
    if let Some(bbox) = req.bbox {
        return Some(bbox);
    }
    let center = req.center?;
    let radius_m = req.radius_m? as f64;
    let dlat = radius_m / 111_320.0;
    let cos_lat = center.lat.to_radians().cos().max(0.2);
    let dlng = radius_m / (111_320.0 * cos_lat);
    Some(BBox4::new(
        center.lng - dlng,
        center.lat - dlat,
        center.lng + dlng,
        center.lat + dlat,
    ))
}

fn dedup_push(seen: &mut HashSet<String>, items: &mut Vec<PlaceItem>, candidate: PlaceItem, limit: usize) -> bool {
    if seen.contains(&candidate.id) {
        return false;
    }
    seen.insert(candidate.id.clone());
    items.push(candidate);
    items.len() >= limit
}

impl PlacesEngine {
    pub fn new(
        cache: PackCache,
        store: PlacesStore,
        remote: Option<Arc<dyn RemotePlacesPool>>,
        overpass: OverpassClient,
        config: PlacesEngineConfig,
    ) -> Self {
        Self {
            cache,
            store,
            remote,
            overpass,
            config,
        }
    }

    async fn publish_to_remote(&self, items: &[PlaceItem], source: &str) {
        if let Some(remote) = &self.remote {
            let cap = self.config.remote_publish_cap;
            let subset = if cap > 0 && items.len() > cap {
                &items[..cap]
            } else {
                items
            };
            if let Err(e) = remote.upsert_items(subset, source).await {
                warn!(error = %e, source, "remote pool publish failed");
            }
        }
    }

    fn finalize_pack(&self, pkey: String, bbox: Option<BBox4>, items: Vec<PlaceItem>, provider: &str) -> PlacesPack {
        PlacesPack {
            places_key: pkey,
            bbox,
            items,
            provider: provider.to_string(),
            algo_version: self.config.algo_version.clone(),
            created_at: now_iso(),
        }
    }

    async fn cache_pack(&self, pack: &PlacesPack) -> RoamResult<()> {
        self.cache
            .put_places_pack(&pack.places_key, &self.config.algo_version, pack)
            .await?;
        Ok(())
    }

    /// The core tiered search: deterministic cache, then local store,
    /// then remote pool, then Overpass top-up.
    pub async fn search(&self, req: &PlacesRequest) -> RoamResult<PlacesPack> {
        let payload = serde_json::to_value(req)?;
        let pkey = places_key(&payload, &self.config.algo_version);

        if let Some(cached) = self.cache.get_places_pack::<PlacesPack>(&pkey).await? {
            counter!("places_search_tier_total", "tier" => "pack_cache").increment(1);
            if !cached.provider.contains("remote") {
                self.publish_to_remote(&cached.items, "cached_pack").await;
            }
            return Ok(cached);
        }

        let Some(bbox) = bbox_from_request(req) else {
            let pack = self.finalize_pack(pkey, None, Vec::new(), "local");
            self.cache_pack(&pack).await?;
            return Ok(pack);
        };

        let limit = req
            .limit
            .unwrap_or(50)
            .clamp(1, self.config.places_hard_cap) as usize;
        let need_count = ((limit as f64) * self.config.local_satisfy_ratio).ceil().max(1.0) as usize;
        let categories = req.categories.clone();

        let mut items = Vec::new();
        let mut seen = HashSet::new();

        let local_items = self.store.query_bbox(&bbox, Some(&categories), limit as i64).await?;
        for item in local_items {
            if dedup_push(&mut seen, &mut items, item, limit) {
                break;
            }
        }

        if items.len() >= need_count {
            counter!("places_search_tier_total", "tier" => "local_store").increment(1);
            let pack = self.finalize_pack(pkey, Some(bbox), items, "local");
            self.publish_to_remote(&pack.items, "pack").await;
            self.cache_pack(&pack).await?;
            return Ok(pack);
        }

        let mut provider = "local".to_string();
        if let Some(remote) = &self.remote {
            match remote.query_bbox(&bbox, &categories, limit as u32).await {
                Ok(remote_items) if !remote_items.is_empty() => {
                    let _ = self.store.upsert_items(&remote_items).await;
                    for item in remote_items {
                        if dedup_push(&mut seen, &mut items, item, limit) {
                            break;
                        }
                    }
                    provider = "local+remote".to_string();
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "remote pool query_bbox failed"),
            }
        }

        if items.len() >= need_count {
            counter!("places_search_tier_total", "tier" => "remote_pool").increment(1);
            let publish = !provider.contains("remote");
            let pack = self.finalize_pack(pkey, Some(bbox), items, &provider);
            if publish {
                self.publish_to_remote(&pack.items, "pack").await;
            }
            self.cache_pack(&pack).await?;
            return Ok(pack);
        }

        let filters = filters_for_categories(&categories);
        let name_clause = req
            .query
            .as_deref()
            .map(safe_name_regex)
            .filter(|s| !s.is_empty())
            .map(|s| format!("[\"name\"~\"{s}\",i]"))
            .unwrap_or_default();

        if filters.is_empty() && name_clause.is_empty() {
            counter!("places_search_tier_total", "tier" => "local_remote_unfiltered").increment(1);
            let pack = self.finalize_pack(pkey, Some(bbox), items, &provider);
            self.publish_to_remote(&pack.items, "pack").await;
            self.cache_pack(&pack).await?;
            return Ok(pack);
        }

        let (overpass_items, used_overpass) = self
            .tiled_top_up(&bbox, &categories, &filters, &name_clause, limit, &mut seen, &mut items)
            .await?;

        let final_provider = if used_overpass {
            counter!("places_search_tier_total", "tier" => "overpass").increment(1);
            format!("{provider}+overpass")
        } else {
            counter!("places_search_tier_total", "tier" => "local_remote_exhausted").increment(1);
            provider
        };
        let _ = overpass_items;

        let pack = self.finalize_pack(pkey, Some(bbox), items, &final_provider);
        self.publish_to_remote(&pack.items, "pack").await;
        self.cache_pack(&pack).await?;
        Ok(pack)
    }

    async fn tiled_top_up(
        &self,
        bbox: &BBox4,
        categories: &[PlaceCategory],
        filters: &[String],
        name_clause: &str,
        limit: usize,
        seen: &mut HashSet<String>,
        items: &mut Vec<PlaceItem>,
    ) -> RoamResult<(Vec<PlaceItem>, bool)> {
        let tiles = self
            .store
            .tiles_for_bbox(bbox, self.config.tile_step_deg, self.config.max_tiles, self.config.tile_ttl_secs)
            .await?;

        let started = Instant::now();
        let mut tiles_fetched = 0usize;
        let mut used_overpass = false;
        let mut discovered = Vec::new();

        for tile in tiles {
            if items.len() >= limit {
                break;
            }
            if started.elapsed().as_secs_f64() >= self.config.time_budget_s && tiles_fetched > 0 {
                break;
            }

            let ql = build_overpass_ql(&tile, filters, name_clause, 90);
            let data = match self.overpass.fetch(&ql).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "overpass tile fetch failed");
                    continue;
                }
            };

            let elements = data.get("elements").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let fetched: Vec<PlaceItem> = elements.iter().filter_map(element_to_item).collect();

            if !fetched.is_empty() {
                used_overpass = true;
                let _ = self.store.upsert_items(&fetched).await;
                self.publish_to_remote(&fetched, "overpass").await;
                discovered.extend(fetched.clone());
            }

            let _ = self
                .store
                .mark_tile_fetched(&tile, self.config.tile_step_deg, categories, elements.len())
                .await;

            for item in fetched {
                if dedup_push(seen, items, item, limit) {
                    break;
                }
            }

            tiles_fetched += 1;
            if tiles_fetched >= self.config.max_overpass_tiles_per_request {
                break;
            }
            if self.config.overpass_throttle_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.config.overpass_throttle_ms)).await;
            }
        }

        info!(tiles_fetched, found = discovered.len(), "tiled top-up complete");
        Ok((discovered, used_overpass))
    }

    /// Corridor-shaped top-up: sample the route polyline at fixed
    /// intervals, run a point+radius search per sample, and accept a
    /// candidate if it falls within `corridor_accept_radius_m` of any
    /// sample (rather than filtering globally by distance-to-route).
    pub async fn suggest_along_route(
        &self,
        polyline6: &str,
        categories: &[PlaceCategory],
        limit_per_sample: u32,
    ) -> RoamResult<Vec<RouteSuggestion>> {
        let points = roam_common::polyline6::decode(polyline6);
        let samples = sample_polyline(&points, self.config.corridor_sample_interval_km);

        let mut out = Vec::with_capacity(samples.len());
        for sample in samples {
            let req = PlacesRequest {
                bbox: None,
                center: Some(roam_common::contracts::LatLng {
                    lat: sample.lat,
                    lng: sample.lng,
                }),
                radius_m: Some(self.config.corridor_accept_radius_m as u32),
                categories: categories.to_vec(),
                query: None,
                limit: Some(limit_per_sample),
            };
            let places = self.search(&req).await?;
            out.push(RouteSuggestion {
                idx: sample.idx,
                lat: sample.lat,
                lng: sample.lng,
                km_from_start: sample.km_from_start,
                places,
            });
        }
        Ok(out)
    }

    /// Corridor-shaped top-up: a single polyline-search `PlacesPack`, not
    /// one pack per sample. The around-polyline Overpass query runs first;
    /// local store and remote pool supplement the set afterwards. Every
    /// accepted item, from any tier, is within `buffer_m` of the nearest
    /// sample.
    pub async fn search_along_corridor(&self, req: &CorridorPlacesRequest) -> RoamResult<PlacesPack> {
        let buffer_m = req.buffer_m as f64;
        let buffer_km = buffer_m / 1000.0;
        let limit = req.limit.unwrap_or(50).clamp(1, self.config.places_hard_cap) as usize;
        let pkey = corridor_places_key(&req.polyline6, buffer_km, &req.categories, limit as u32, &self.config.algo_version);

        if let Some(cached) = self.cache.get_places_pack::<PlacesPack>(&pkey).await? {
            counter!("places_search_tier_total", "tier" => "pack_cache").increment(1);
            if !cached.provider.contains("remote") {
                self.publish_to_remote(&cached.items, "cached_pack").await;
            }
            return Ok(cached);
        }

        let points = roam_common::polyline6::decode(&req.polyline6);
        let interval_km = req.sample_interval_km.unwrap_or(8.0);
        let samples = sample_polyline_with_last(&points, interval_km);

        if samples.is_empty() {
            let pack = self.finalize_pack(pkey, None, Vec::new(), "local");
            self.cache_pack(&pack).await?;
            return Ok(pack);
        }

        let bbox = bbox_around_samples(&samples, buffer_m);
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut tiers: Vec<&str> = Vec::new();

        let filters = filters_for_categories(&req.categories);
        let sample_coords: Vec<(f64, f64)> = samples.iter().map(|s| (s.lat, s.lng)).collect();
        let ql = build_overpass_around_ql(&sample_coords, &filters, "", buffer_m, 90);

        match self.overpass.fetch(&ql).await {
            Ok(data) => {
                let elements = data.get("elements").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                let fetched: Vec<PlaceItem> = elements
                    .iter()
                    .filter_map(element_to_item)
                    .filter(|item| within_buffer_of_any_sample(item, &samples, buffer_m))
                    .collect();
                if !fetched.is_empty() {
                    tiers.push("overpass");
                    let _ = self.store.upsert_items(&fetched).await;
                    self.publish_to_remote(&fetched, "overpass").await;
                }
                for item in fetched {
                    if dedup_push(&mut seen, &mut items, item, limit) {
                        break;
                    }
                }
            }
            Err(e) => warn!(error = %e, "corridor overpass around-query failed"),
        }

        if items.len() < limit {
            let local_items = self.store.query_bbox(&bbox, Some(&req.categories), limit as i64).await?;
            let mut used_local = false;
            for item in local_items {
                if !within_buffer_of_any_sample(&item, &samples, buffer_m) {
                    continue;
                }
                used_local = true;
                if dedup_push(&mut seen, &mut items, item, limit) {
                    break;
                }
            }
            if used_local {
                tiers.push("local");
            }
        }

        if items.len() < limit {
            if let Some(remote) = &self.remote {
                match remote.query_bbox(&bbox, &req.categories, limit as u32).await {
                    Ok(remote_items) if !remote_items.is_empty() => {
                        let accepted: Vec<PlaceItem> = remote_items
                            .into_iter()
                            .filter(|item| within_buffer_of_any_sample(item, &samples, buffer_m))
                            .collect();
                        if !accepted.is_empty() {
                            let _ = self.store.upsert_items(&accepted).await;
                            tiers.push("remote");
                        }
                        for item in accepted {
                            if dedup_push(&mut seen, &mut items, item, limit) {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "remote pool query_bbox failed"),
                }
            }
        }

        counter!("places_search_tier_total", "tier" => "corridor_top_up").increment(1);
        let provider = if tiers.is_empty() { "none".to_string() } else { tiers.join("+") };
        let pack = self.finalize_pack(pkey, Some(bbox), items, &provider);
        self.publish_to_remote(&pack.items, "pack").await;
        self.cache_pack(&pack).await?;
        Ok(pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_common::contracts::LatLng;

    fn sample_item(id: &str, lat: f64, lng: f64) -> PlaceItem {
        PlaceItem {
            id: id.to_string(),
            category: PlaceCategory::Fuel,
            name: Some("Servo".to_string()),
            lat,
            lng,
            tags: serde_json::json!({}),
            extra: serde_json::Map::new(),
            source: "overpass".to_string(),
            updated_at: now_iso(),
        }
    }

    async fn build_engine() -> PlacesEngine {
        let cache = PackCache::connect(":memory:").await.unwrap();
        let store = PlacesStore::new(&cache);
        let overpass = OverpassClient::new("http://127.0.0.1:1/interpreter", 1, 1, 0.01);
        PlacesEngine::new(cache, store, None, overpass, PlacesEngineConfig::default())
    }

    #[tokio::test]
    async fn search_without_geometry_returns_empty_local_pack() {
        let engine = build_engine().await;
        let req = PlacesRequest {
            bbox: None,
            center: None,
            radius_m: None,
            categories: vec![],
            query: None,
            limit: Some(10),
        };
        let pack = engine.search(&req).await.unwrap();
        assert!(pack.items.is_empty());
        assert_eq!(pack.provider, "local");
    }

    #[tokio::test]
    async fn search_satisfies_from_local_store_without_network() {
        let engine = build_engine().await;
        engine
            .store
            .upsert_items(&[sample_item("node:1", -27.47, 153.02)])
            .await
            .unwrap();

        let req = PlacesRequest {
            bbox: Some(BBox4::new(152.0, -28.0, 154.0, -27.0)),
            center: None,
            radius_m: None,
            categories: vec![PlaceCategory::Fuel],
            query: None,
            limit: Some(10),
        };
        let pack = engine.search(&req).await.unwrap();
        assert_eq!(pack.items.len(), 1);
        assert_eq!(pack.provider, "local");
    }

    #[tokio::test]
    async fn search_is_cached_on_second_call() {
        let engine = build_engine().await;
        engine
            .store
            .upsert_items(&[sample_item("node:1", -27.47, 153.02)])
            .await
            .unwrap();
        let req = PlacesRequest {
            bbox: Some(BBox4::new(152.0, -28.0, 154.0, -27.0)),
            center: None,
            radius_m: None,
            categories: vec![],
            query: None,
            limit: Some(10),
        };
        let first = engine.search(&req).await.unwrap();
        let second = engine.search(&req).await.unwrap();
        assert_eq!(first.places_key, second.places_key);
        assert_eq!(first.items.len(), second.items.len());
    }

    #[tokio::test]
    async fn suggest_along_route_returns_one_entry_per_sample() {
        let engine = build_engine().await;
        let poly = roam_common::polyline6::encode(&[(-27.0, 153.0), (-27.2, 153.2)]);
        let out = engine
            .suggest_along_route(&poly, &[PlaceCategory::Fuel], 5)
            .await
            .unwrap();
        assert!(!out.is_empty());
        assert_eq!(out[0].idx, 0);
    }

    #[tokio::test]
    async fn search_along_corridor_accepts_items_within_buffer_of_a_sample() {
        let engine = build_engine().await;
        engine
            .store
            .upsert_items(&[sample_item("node:1", -27.0, 153.0)])
            .await
            .unwrap();

        let poly = roam_common::polyline6::encode(&[(-27.0, 153.0), (-27.2, 153.2)]);
        let req = CorridorPlacesRequest {
            polyline6: poly,
            buffer_m: 2_000,
            categories: vec![PlaceCategory::Fuel],
            limit: Some(10),
            sample_interval_km: Some(8.0),
        };
        let pack = engine.search_along_corridor(&req).await.unwrap();
        assert_eq!(pack.items.len(), 1);
        assert_eq!(pack.items[0].id, "node:1");
    }

    #[tokio::test]
    async fn search_along_corridor_rejects_items_outside_buffer_of_every_sample() {
        let engine = build_engine().await;
        engine
            .store
            .upsert_items(&[sample_item("node:far", -29.0, 155.0)])
            .await
            .unwrap();

        let poly = roam_common::polyline6::encode(&[(-27.0, 153.0), (-27.2, 153.2)]);
        let req = CorridorPlacesRequest {
            polyline6: poly,
            buffer_m: 2_000,
            categories: vec![PlaceCategory::Fuel],
            limit: Some(10),
            sample_interval_km: Some(8.0),
        };
        let pack = engine.search_along_corridor(&req).await.unwrap();
        assert!(pack.items.is_empty());
    }

    #[tokio::test]
    async fn search_along_corridor_is_cached_on_second_call() {
        let engine = build_engine().await;
        let poly = roam_common::polyline6::encode(&[(-27.0, 153.0), (-27.2, 153.2)]);
        let req = CorridorPlacesRequest {
            polyline6: poly,
            buffer_m: 2_000,
            categories: vec![],
            limit: Some(10),
            sample_interval_km: Some(8.0),
        };
        let first = engine.search_along_corridor(&req).await.unwrap();
        let second = engine.search_along_corridor(&req).await.unwrap();
        assert_eq!(first.places_key, second.places_key);
    }

    #[test]
    fn bbox_from_request_uses_center_radius_when_no_bbox() {
        let req = PlacesRequest {
            bbox: None,
            center: Some(LatLng { lat: -27.0, lng: 153.0 }),
            radius_m: Some(1000),
            categories: vec![],
            query: None,
            limit: None,
        };
        let bbox = bbox_from_request(&req).unwrap();
        assert!(bbox.contains_point(-27.0, 153.0));
    }
}
