//! Extracts the corridor-shaped subgraph of road-network edges around a
//! route, cached and content-addressed by [`roam_common::keying::corridor_key`].

use roam_common::contracts::{BBox4, CorridorEdge, CorridorGraphMeta, CorridorGraphPack, CorridorNode};
use roam_common::error::RoamResult;
use roam_common::geo::buffer_to_bbox;
use roam_common::keying::corridor_key;
use roam_common::polyline6;
use roam_common::time::now_iso;
use roam_storage::{EdgesDb, PackCache};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Result of [`CorridorService::ensure`]: the cheap metadata plus the full
/// pack, only loaded/rebuilt when the caller actually needs the graph.
pub struct CorridorEnsureResult {
    pub meta: CorridorGraphMeta,
    pub pack: CorridorGraphPack,
}

/// Builds and caches corridor graph packs from a route polyline, an
/// [`EdgesDb`] backend, and the shared [`PackCache`].
pub struct CorridorService {
    cache: PackCache,
    edges: Arc<dyn EdgesDb>,
    algo_version: String,
}

fn bbox_from_polyline6(poly6: &str) -> BBox4 {
    let pts = polyline6::decode(poly6);
    if pts.is_empty() {
        return BBox4::new(0.0, 0.0, 0.0, 0.0);
    }
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;
    for (lat, lng) in pts {
        min_lat = min_lat.min(lat);
        max_lat = max_lat.max(lat);
        min_lng = min_lng.min(lng);
        max_lng = max_lng.max(lng);
    }
    BBox4::new(min_lng, min_lat, max_lng, max_lat)
}

fn expand_bbox(bbox: &BBox4, buffer_m: u32) -> BBox4 {
    let (center_lat, _) = bbox.center();
    let (dlat, dlng) = buffer_to_bbox((center_lat, 0.0), buffer_m as f64);
    BBox4::new(
        bbox.min_lng - dlng,
        bbox.min_lat - dlat,
        bbox.max_lng + dlng,
        bbox.max_lat + dlat,
    )
}

impl CorridorService {
    pub fn new(cache: PackCache, edges: Arc<dyn EdgesDb>, algo_version: impl Into<String>) -> Self {
        Self {
            cache,
            edges,
            algo_version: algo_version.into(),
        }
    }

    /// Return the cached corridor pack for `route_key`/`buffer_m`/
    /// `max_edges`/`profile` if present, otherwise extract it fresh from
    /// the edge store and cache the result.
    pub async fn ensure(
        &self,
        route_key: &str,
        route_polyline6: &str,
        profile: &str,
        buffer_m: u32,
        max_edges: u32,
    ) -> RoamResult<CorridorEnsureResult> {
        let ckey = corridor_key(route_key, buffer_m, max_edges, profile, &self.algo_version);

        if let Some(pack) = self
            .cache
            .get_corridor_pack::<CorridorGraphPack>(&ckey)
            .await?
        {
            let byte_len = self.cache.corridor_pack_bytes(&ckey).await?;
            let meta = CorridorGraphMeta {
                corridor_key: ckey,
                node_count: pack.nodes.len(),
                edge_count: pack.edges.len(),
                byte_len,
            };
            return Ok(CorridorEnsureResult { meta, pack });
        }

        let base_bbox = bbox_from_polyline6(route_polyline6);
        let corridor_bbox = expand_bbox(&base_bbox, buffer_m);

        let rows = self
            .edges
            .query_bbox(
                corridor_bbox.min_lng,
                corridor_bbox.max_lng,
                corridor_bbox.min_lat,
                corridor_bbox.max_lat,
                max_edges,
            )
            .await?;

        let mut node_coords: HashMap<i64, (f64, f64)> = HashMap::new();
        let mut edges_out = Vec::with_capacity(rows.len());

        for row in &rows {
            node_coords
                .entry(row.from_id)
                .or_insert((row.from_lat, row.from_lng));
            node_coords
                .entry(row.to_id)
                .or_insert((row.to_lat, row.to_lng));

            let mut flags = 0u32;
            if row.toll {
                flags |= 1;
            }
            if row.ferry {
                flags |= 2;
            }
            if row.unsealed {
                flags |= 4;
            }

            edges_out.push(CorridorEdge {
                from_id: row.from_id,
                to_id: row.to_id,
                length_m: row.dist_m,
                flags,
                highway: row.highway.clone(),
                name: row.name.clone(),
                osm_way_id: row.osm_way_id,
            });
        }

        let nodes_out: Vec<CorridorNode> = node_coords
            .into_iter()
            .map(|(id, (lat, lng))| CorridorNode { id, lat, lng })
            .collect();

        debug!(
            route_key,
            nodes = nodes_out.len(),
            edges = edges_out.len(),
            "corridor extracted"
        );

        let created_at = now_iso();
        let pack = CorridorGraphPack {
            corridor_key: ckey.clone(),
            route_key: route_key.to_string(),
            profile: profile.to_string(),
            buffer_m,
            max_edges,
            bbox: corridor_bbox,
            nodes: nodes_out,
            edges: edges_out,
            algo_version: self.algo_version.clone(),
            created_at,
        };

        let byte_len = self
            .cache
            .put_corridor_pack(
                &ckey,
                route_key,
                profile,
                buffer_m,
                max_edges,
                &self.algo_version,
                &pack,
            )
            .await?;

        let meta = CorridorGraphMeta {
            corridor_key: ckey,
            node_count: pack.nodes.len(),
            edge_count: pack.edges.len(),
            byte_len,
        };

        Ok(CorridorEnsureResult { meta, pack })
    }

    /// Fetch-only accessor, used by the nav/bundle layer once a corridor
    /// key is already known.
    pub async fn get(&self, corridor_key: &str) -> RoamResult<Option<CorridorGraphPack>> {
        self.cache.get_corridor_pack(corridor_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roam_storage::EdgeRow;

    struct FakeEdgesDb {
        rows: Vec<EdgeRow>,
    }

    #[async_trait]
    impl EdgesDb for FakeEdgesDb {
        async fn query_bbox(
            &self,
            _min_lng: f64,
            _max_lng: f64,
            _min_lat: f64,
            _max_lat: f64,
            max_edges: u32,
        ) -> RoamResult<Vec<EdgeRow>> {
            Ok(self.rows.iter().take(max_edges as usize).cloned().collect())
        }

        async fn count(&self) -> RoamResult<i64> {
            Ok(self.rows.len() as i64)
        }
    }

    fn fake_edge(from: i64, to: i64) -> EdgeRow {
        EdgeRow {
            id: from,
            from_id: from,
            to_id: to,
            from_lat: -27.0,
            from_lng: 153.0,
            to_lat: -27.01,
            to_lng: 153.01,
            dist_m: 120.0,
            cost_s: 14.0,
            toll: false,
            ferry: false,
            unsealed: true,
            highway: Some("primary".to_string()),
            name: Some("Bruce Highway".to_string()),
            osm_way_id: Some(99),
        }
    }

    #[tokio::test]
    async fn ensure_builds_and_caches_pack() {
        let cache = PackCache::connect(":memory:").await.unwrap();
        let edges = Arc::new(FakeEdgesDb {
            rows: vec![fake_edge(1, 2), fake_edge(2, 3)],
        });
        let service = CorridorService::new(cache, edges, "corridor-v1");

        let poly = polyline6::encode(&[(-27.0, 153.0), (-27.02, 153.02)]);
        let result = service
            .ensure("route-key-1", &poly, "drive", 2000, 500)
            .await
            .unwrap();

        assert_eq!(result.pack.edges.len(), 2);
        assert_eq!(result.pack.nodes.len(), 3);
        assert!(result.pack.edges[0].flags & 4 != 0);

        let second = service
            .ensure("route-key-1", &poly, "drive", 2000, 500)
            .await
            .unwrap();
        assert_eq!(second.meta.corridor_key, result.meta.corridor_key);
        assert_eq!(second.pack.edges.len(), result.pack.edges.len());
    }

    #[test]
    fn bbox_from_polyline6_covers_all_points() {
        let poly = polyline6::encode(&[(-27.0, 153.0), (-28.0, 152.5)]);
        let bbox = bbox_from_polyline6(&poly);
        assert!(bbox.contains_point(-27.5, 152.75));
    }
}
