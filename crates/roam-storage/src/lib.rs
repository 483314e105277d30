//! Local-first pack cache, canonical POI store, and the road-network edge
//! store adapter.

pub mod cache;
pub mod edges;
pub mod places_store;

pub use cache::PackCache;
pub use edges::{create_edges_db, EdgeRow, EdgesDb};
pub use places_store::PlacesStore;

#[cfg(test)]
mod tests {
    use super::*;
    use roam_common::contracts::{BBox4, PlaceCategory, PlaceItem};

    async fn in_memory_cache() -> PackCache {
        PackCache::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn nav_pack_round_trips() {
        let cache = in_memory_cache().await;
        let pack = serde_json::json!({"distance_m": 1234.0});
        cache.put_nav_pack("rk1", "v1", &pack).await.unwrap();
        let got: serde_json::Value = cache.get_nav_pack("rk1").await.unwrap().unwrap();
        assert_eq!(got["distance_m"], 1234.0);
        assert!(cache.nav_pack_bytes("rk1").await.unwrap() > 0);
    }

    #[tokio::test]
    async fn missing_pack_returns_none() {
        let cache = in_memory_cache().await;
        let got: Option<serde_json::Value> = cache.get_corridor_pack("nope").await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn manifest_put_get_round_trips() {
        let cache = in_memory_cache().await;
        let manifest = serde_json::json!({"plan_id": "p1", "total_bytes": 42});
        cache.put_manifest("p1", "rk1", &manifest).await.unwrap();
        let got: serde_json::Value = cache.get_manifest("p1").await.unwrap().unwrap();
        assert_eq!(got["total_bytes"], 42);
    }

    fn sample_item(id: &str, lat: f64, lng: f64) -> PlaceItem {
        PlaceItem {
            id: id.to_string(),
            category: PlaceCategory::Fuel,
            name: Some("Test Servo".to_string()),
            lat,
            lng,
            tags: serde_json::json!({}),
            extra: serde_json::Map::new(),
            source: "overpass".to_string(),
            updated_at: roam_common::time::now_iso(),
        }
    }

    #[tokio::test]
    async fn upsert_and_query_bbox_round_trips() {
        let cache = in_memory_cache().await;
        let store = PlacesStore::new(&cache);
        let item = sample_item("node:123", -27.47, 153.02);
        let written = store.upsert_items(&[item]).await.unwrap();
        assert_eq!(written, 1);

        let bbox = BBox4::new(152.0, -28.0, 154.0, -27.0);
        let found = store.query_bbox(&bbox, None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "node:123");
    }

    #[tokio::test]
    async fn upsert_skips_unparseable_ids() {
        let cache = in_memory_cache().await;
        let store = PlacesStore::new(&cache);
        let item = sample_item("not-an-osm-id", -27.0, 153.0);
        let written = store.upsert_items(&[item]).await.unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn query_radius_filters_by_distance() {
        let cache = in_memory_cache().await;
        let store = PlacesStore::new(&cache);
        store
            .upsert_items(&[
                sample_item("node:1", -27.47, 153.02),
                sample_item("node:2", -33.86, 151.20),
            ])
            .await
            .unwrap();

        let nearby = store
            .query_radius(-27.47, 153.02, 5_000.0, None, 10)
            .await
            .unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].id, "node:1");
    }

    #[tokio::test]
    async fn tile_freshness_tracks_mark_fetched() {
        let cache = in_memory_cache().await;
        let store = PlacesStore::new(&cache);
        let bbox = BBox4::new(153.0, -28.0, 153.5, -27.5);
        assert!(!store.tile_is_fresh(&bbox, 0.5, 3600).await.unwrap());

        store
            .mark_tile_fetched(&bbox, 0.5, &[PlaceCategory::Fuel], 3)
            .await
            .unwrap();
        assert!(store.tile_is_fresh(&bbox, 0.5, 3600).await.unwrap());
        assert!(!store.tile_is_fresh(&bbox, 0.5, 0).await.unwrap());
    }
}
