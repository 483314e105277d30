//! Manifest build and zip archive assembly for a sealed offline bundle.

use std::io::{Cursor, Write};

use roam_common::contracts::{
    CorridorGraphPack, HazardsOverlay, ManifestAsset, NavRoute, OfflineBundleManifest,
    PlacesPack, TrafficOverlay,
};
use roam_common::error::{RoamError, RoamResult};
use roam_common::time::now_iso;
use roam_storage::PackCache;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Inputs for one manifest build: the asset keys the orchestrator resolved,
/// and whether each dependency actually finished successfully.
#[derive(Debug, Clone)]
pub struct ManifestRequest {
    pub plan_id: String,
    pub route_key: String,
    pub navpack_ready: bool,
    pub corridor_key: Option<String>,
    pub corridor_ready: bool,
    pub places_key: Option<String>,
    pub places_ready: bool,
    pub traffic_key: Option<String>,
    pub traffic_ready: bool,
    pub hazards_key: Option<String>,
    pub hazards_ready: bool,
    pub algo_version: String,
}

/// The built zip archive plus per-member byte counts, for size telemetry.
#[derive(Debug, Clone)]
pub struct BundleZip {
    pub plan_id: String,
    pub zip_bytes: Vec<u8>,
    pub bytes_zip: usize,
    pub bytes_manifest: usize,
    pub bytes_navpack: usize,
    pub bytes_corridor: usize,
    pub bytes_places: usize,
    pub bytes_traffic: usize,
    pub bytes_hazards: usize,
}

/// Builds manifests and zip archives from whatever packs are already sitting
/// in the cache store under the keys the orchestrator resolved.
pub struct BundleAssembler {
    cache: PackCache,
}

impl BundleAssembler {
    pub fn new(cache: PackCache) -> Self {
        Self { cache }
    }

    async fn pack_bytes_for(&self, kind: &str, key: &str) -> RoamResult<usize> {
        match kind {
            "navpack" => self.cache.nav_pack_bytes(key).await,
            "corridor" => self.cache.corridor_pack_bytes(key).await,
            "places" => self.cache.places_pack_bytes(key).await,
            "traffic" => self.cache.traffic_pack_bytes(key).await,
            "hazards" => self.cache.hazards_pack_bytes(key).await,
            _ => Ok(0),
        }
    }

    /// Sums stored byte lengths for every ready asset and persists the
    /// manifest under `plan_id`. Calling again with the same inputs produces
    /// an equivalent manifest, modulo `created_at`.
    pub async fn build_manifest(
        &self,
        req: &ManifestRequest,
    ) -> RoamResult<OfflineBundleManifest> {
        let candidates: [(&str, Option<&str>, bool); 5] = [
            ("navpack", Some(req.route_key.as_str()), req.navpack_ready),
            ("corridor", req.corridor_key.as_deref(), req.corridor_ready),
            ("places", req.places_key.as_deref(), req.places_ready),
            ("traffic", req.traffic_key.as_deref(), req.traffic_ready),
            ("hazards", req.hazards_key.as_deref(), req.hazards_ready),
        ];

        let mut assets = Vec::with_capacity(candidates.len());
        let mut total_bytes = 0usize;
        for (kind, key, ready) in candidates {
            let (byte_len, present) = match (key, ready) {
                (Some(k), true) => {
                    let len = self.pack_bytes_for(kind, k).await?;
                    (len, len > 0)
                }
                _ => (0, false),
            };
            total_bytes += byte_len;
            assets.push(ManifestAsset {
                key: key.unwrap_or_default().to_string(),
                kind: kind.to_string(),
                byte_len,
                present,
            });
        }

        let manifest = OfflineBundleManifest {
            plan_id: req.plan_id.clone(),
            route_key: req.route_key.clone(),
            corridor_key: req.corridor_key.clone(),
            places_key: req.places_key.clone(),
            traffic_key: req.traffic_key.clone(),
            hazards_key: req.hazards_key.clone(),
            assets,
            total_bytes,
            algo_version: req.algo_version.clone(),
            created_at: now_iso(),
        };

        self.cache
            .put_manifest(&req.plan_id, &req.route_key, &manifest)
            .await?;
        Ok(manifest)
    }

    /// Retrieves the manifest and every pack it references, and zips them
    /// into one Deflate-compressed archive. A referenced key whose pack has
    /// since gone missing from the cache is a hard error naming that asset.
    pub async fn build_zip(&self, plan_id: &str) -> RoamResult<BundleZip> {
        let manifest: OfflineBundleManifest = self
            .cache
            .get_manifest(plan_id)
            .await?
            .ok_or_else(|| RoamError::NotFound(format!("bundle_missing: no manifest for plan_id {plan_id}")))?;

        let navpack: NavRoute = self
            .cache
            .get_nav_pack(&manifest.route_key)
            .await?
            .ok_or_else(|| {
                RoamError::AssetMissing(format!(
                    "navpack_missing: no navpack cached for route_key {}",
                    manifest.route_key
                ))
            })?;

        let corridor_key = manifest.corridor_key.as_deref().ok_or_else(|| {
            RoamError::AssetMissing("corridor_missing: manifest has no corridor_key".to_string())
        })?;
        let corridor: CorridorGraphPack = self
            .cache
            .get_corridor_pack(corridor_key)
            .await?
            .ok_or_else(|| {
                RoamError::AssetMissing(format!(
                    "corridor_missing: no corridor cached for corridor_key {corridor_key}"
                ))
            })?;

        let places: Option<PlacesPack> = match manifest.places_key.as_deref() {
            Some(key) => Some(self.cache.get_places_pack(key).await?.ok_or_else(|| {
                RoamError::AssetMissing(format!(
                    "places_missing: no places cached for places_key {key}"
                ))
            })?),
            None => None,
        };

        let traffic: Option<TrafficOverlay> = match manifest.traffic_key.as_deref() {
            Some(key) => Some(self.cache.get_traffic_pack(key).await?.ok_or_else(|| {
                RoamError::AssetMissing(format!(
                    "traffic_missing: no traffic cached for traffic_key {key}"
                ))
            })?),
            None => None,
        };

        let hazards: Option<HazardsOverlay> = match manifest.hazards_key.as_deref() {
            Some(key) => Some(self.cache.get_hazards_pack(key).await?.ok_or_else(|| {
                RoamError::AssetMissing(format!(
                    "hazards_missing: no hazards cached for hazards_key {key}"
                ))
            })?),
            None => None,
        };

        let b_manifest = serde_json::to_vec(&manifest)?;
        let b_nav = serde_json::to_vec(&navpack)?;
        let b_corr = serde_json::to_vec(&corridor)?;
        let b_places = places.as_ref().map(serde_json::to_vec).transpose()?;
        let b_traffic = traffic.as_ref().map(serde_json::to_vec).transpose()?;
        let b_hazards = hazards.as_ref().map(serde_json::to_vec).transpose()?;

        let mut buf = Vec::new();
        {
            let options =
                FileOptions::default().compression_method(CompressionMethod::Deflated);
            let mut zip = ZipWriter::new(Cursor::new(&mut buf));

            zip.start_file("manifest.json", options)
                .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
            zip.write_all(&b_manifest)?;

            zip.start_file("navpack.json", options)
                .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
            zip.write_all(&b_nav)?;

            zip.start_file("corridor.json", options)
                .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
            zip.write_all(&b_corr)?;

            if let Some(bytes) = &b_places {
                zip.start_file("places.json", options)
                    .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
                zip.write_all(bytes)?;
            }
            if let Some(bytes) = &b_traffic {
                zip.start_file("traffic.json", options)
                    .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
                zip.write_all(bytes)?;
            }
            if let Some(bytes) = &b_hazards {
                zip.start_file("hazards.json", options)
                    .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
                zip.write_all(bytes)?;
            }

            zip.finish()
                .map_err(|e| RoamError::InternalError(format!("zip error: {e}")))?;
        }

        Ok(BundleZip {
            plan_id: plan_id.to_string(),
            bytes_zip: buf.len(),
            bytes_manifest: b_manifest.len(),
            bytes_navpack: b_nav.len(),
            bytes_corridor: b_corr.len(),
            bytes_places: b_places.map(|b| b.len()).unwrap_or(0),
            bytes_traffic: b_traffic.map(|b| b.len()).unwrap_or(0),
            bytes_hazards: b_hazards.map(|b| b.len()).unwrap_or(0),
            zip_bytes: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_common::contracts::BBox4;

    async fn in_memory_cache() -> PackCache {
        PackCache::connect(":memory:").await.unwrap()
    }

    fn sample_nav_route(route_key: &str) -> NavRoute {
        NavRoute {
            route_key: route_key.to_string(),
            profile: "driving".to_string(),
            distance_m: 1000.0,
            duration_s: 60.0,
            polyline6: "abc".to_string(),
            legs: vec![],
            ascent_m: None,
            descent_m: None,
            grade_segments: vec![],
            algo_version: "navpack.v1".to_string(),
            created_at: now_iso(),
        }
    }

    #[tokio::test]
    async fn build_manifest_sums_only_ready_assets() {
        let cache = in_memory_cache().await;
        cache
            .put_nav_pack("rk1", "navpack.v1", &sample_nav_route("rk1"))
            .await
            .unwrap();

        let assembler = BundleAssembler::new(cache);
        let req = ManifestRequest {
            plan_id: "p1".to_string(),
            route_key: "rk1".to_string(),
            navpack_ready: true,
            corridor_key: Some("ck1".to_string()),
            corridor_ready: false,
            places_key: None,
            places_ready: false,
            traffic_key: None,
            traffic_ready: false,
            hazards_key: None,
            hazards_ready: false,
            algo_version: "bundle.v1".to_string(),
        };

        let manifest = assembler.build_manifest(&req).await.unwrap();
        assert!(manifest.total_bytes > 0);
        assert_eq!(manifest.assets.len(), 5);
        let nav_asset = manifest.assets.iter().find(|a| a.kind == "navpack").unwrap();
        assert!(nav_asset.present);
        let corridor_asset = manifest
            .assets
            .iter()
            .find(|a| a.kind == "corridor")
            .unwrap();
        assert!(!corridor_asset.present);
        assert_eq!(corridor_asset.byte_len, 0);
    }

    #[tokio::test]
    async fn build_manifest_is_idempotent_modulo_created_at() {
        let cache = in_memory_cache().await;
        cache
            .put_nav_pack("rk1", "navpack.v1", &sample_nav_route("rk1"))
            .await
            .unwrap();

        let assembler = BundleAssembler::new(cache);
        let req = ManifestRequest {
            plan_id: "p1".to_string(),
            route_key: "rk1".to_string(),
            navpack_ready: true,
            corridor_key: None,
            corridor_ready: false,
            places_key: None,
            places_ready: false,
            traffic_key: None,
            traffic_ready: false,
            hazards_key: None,
            hazards_ready: false,
            algo_version: "bundle.v1".to_string(),
        };

        let first = assembler.build_manifest(&req).await.unwrap();
        let second = assembler.build_manifest(&req).await.unwrap();
        assert_eq!(first.total_bytes, second.total_bytes);
        assert_eq!(first.assets.len(), second.assets.len());
    }

    #[tokio::test]
    async fn build_zip_fails_with_bundle_missing_when_no_manifest() {
        let cache = in_memory_cache().await;
        let assembler = BundleAssembler::new(cache);
        let err = assembler.build_zip("no-such-plan").await.unwrap_err();
        assert!(err.to_string().contains("bundle_missing"));
    }

    #[tokio::test]
    async fn build_zip_fails_with_navpack_missing_when_route_key_unresolved() {
        let cache = in_memory_cache().await;
        let assembler = BundleAssembler::new(cache);
        let req = ManifestRequest {
            plan_id: "p1".to_string(),
            route_key: "missing-route".to_string(),
            navpack_ready: false,
            corridor_key: None,
            corridor_ready: false,
            places_key: None,
            places_ready: false,
            traffic_key: None,
            traffic_ready: false,
            hazards_key: None,
            hazards_ready: false,
            algo_version: "bundle.v1".to_string(),
        };
        assembler.build_manifest(&req).await.unwrap();

        let err = assembler.build_zip("p1").await.unwrap_err();
        assert!(err.to_string().contains("navpack_missing"));
    }

    #[tokio::test]
    async fn build_zip_succeeds_and_zips_only_present_assets() {
        let cache = in_memory_cache().await;
        cache
            .put_nav_pack("rk1", "navpack.v1", &sample_nav_route("rk1"))
            .await
            .unwrap();
        let corridor = CorridorGraphPack {
            corridor_key: "ck1".to_string(),
            route_key: "rk1".to_string(),
            profile: "driving".to_string(),
            buffer_m: 2000,
            max_edges: 20000,
            bbox: BBox4::new(152.0, -28.0, 154.0, -27.0),
            nodes: vec![],
            edges: vec![],
            algo_version: "corridor.v1".to_string(),
            created_at: now_iso(),
        };
        cache
            .put_corridor_pack("ck1", "rk1", "driving", 2000, 20000, "corridor.v1", &corridor)
            .await
            .unwrap();

        let assembler = BundleAssembler::new(cache);
        let req = ManifestRequest {
            plan_id: "p1".to_string(),
            route_key: "rk1".to_string(),
            navpack_ready: true,
            corridor_key: Some("ck1".to_string()),
            corridor_ready: true,
            places_key: None,
            places_ready: false,
            traffic_key: None,
            traffic_ready: false,
            hazards_key: None,
            hazards_ready: false,
            algo_version: "bundle.v1".to_string(),
        };
        assembler.build_manifest(&req).await.unwrap();

        let zip = assembler.build_zip("p1").await.unwrap();
        assert!(zip.bytes_zip > 0);
        assert_eq!(zip.bytes_places, 0);
        assert!(zip.bytes_navpack > 0);
        assert!(zip.bytes_corridor > 0);

        let mut archive = zip::ZipArchive::new(Cursor::new(zip.zip_bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"manifest.json".to_string()));
        assert!(names.contains(&"navpack.json".to_string()));
        assert!(names.contains(&"corridor.json".to_string()));
        assert!(!names.contains(&"places.json".to_string()));
    }
}
