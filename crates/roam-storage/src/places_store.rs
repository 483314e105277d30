//! The canonical local POI store: `places_items` plus the `places_tile_state`
//! tile-freshness ledger, backing the local tier of the three-tier places
//! engine.

use roam_common::contracts::{BBox4, PlaceCategory, PlaceItem};
use roam_common::error::{RoamError, RoamResult};
use roam_common::geo::haversine_m;
use roam_common::time::now_iso;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::cache::PackCache;

/// The store's view of a candidate osm identity, derived either from
/// `extra.osm_type`/`extra.osm_id` or a `"type:id"`-formatted place id.
fn parse_osm_identity(item: &PlaceItem) -> (String, i64) {
    if let (Some(t), Some(i)) = (
        item.extra.get("osm_type").and_then(|v| v.as_str()),
        item.extra.get("osm_id").and_then(|v| v.as_i64()),
    ) {
        return (t.to_string(), i);
    }
    let parts: Vec<&str> = item.id.splitn(2, ':').collect();
    if parts.len() == 2 {
        if let Ok(id) = i64::from_str(parts[1]) {
            return (parts[0].to_string(), id);
        }
    }
    ("node".to_string(), 0)
}

fn tile_key(step_deg: f64, bbox: &BBox4) -> String {
    format!(
        "tile:{step_deg}:{},{},{},{}",
        bbox.min_lat, bbox.min_lng, bbox.max_lat, bbox.max_lng
    )
}

/// Walk `bbox` in `step_deg` increments, capped at `max_tiles`.
pub fn iter_tiles(bbox: &BBox4, step_deg: f64, max_tiles: usize) -> Vec<BBox4> {
    let mut tiles = Vec::new();
    let mut lat = bbox.min_lat;
    'outer: while lat < bbox.max_lat {
        let mut lng = bbox.min_lng;
        while lng < bbox.max_lng {
            tiles.push(BBox4::new(
                lng,
                lat,
                (lng + step_deg).min(bbox.max_lng),
                (lat + step_deg).min(bbox.max_lat),
            ));
            if tiles.len() >= max_tiles {
                break 'outer;
            }
            lng += step_deg;
        }
        lat += step_deg;
    }
    tiles
}

fn bbox_for_radius(center_lat: f64, center_lng: f64, radius_m: f64) -> BBox4 {
    let dlat = radius_m / 111_320.0;
    let cos_lat = center_lat.to_radians().cos().max(0.2);
    let dlng = radius_m / (111_320.0 * cos_lat);
    BBox4::new(
        center_lng - dlng,
        center_lat - dlat,
        center_lng + dlng,
        center_lat + dlat,
    )
}

fn category_from_str(s: &str) -> Option<PlaceCategory> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

/// Async handle to the local canonical POI store, layered on the same
/// SQLite pool as [`PackCache`].
#[derive(Clone)]
pub struct PlacesStore {
    pool: SqlitePool,
}

impl PlacesStore {
    pub fn new(cache: &PackCache) -> Self {
        Self {
            pool: cache.pool().clone(),
        }
    }

    /// Upsert a batch of items. Items whose osm identity can't be parsed
    /// (id defaults to 0) are skipped, matching the reference store's
    /// "don't persist what we can't key" rule.
    pub async fn upsert_items(&self, items: &[PlaceItem]) -> RoamResult<usize> {
        let mut written = 0usize;
        let now = now_iso();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RoamError::StorageError(format!("begin tx failed: {e}")))?;

        for item in items {
            let (osm_type, osm_id) = parse_osm_identity(item);
            if osm_id == 0 {
                continue;
            }
            let tags_json = serde_json::to_vec(&item.tags)?;
            let category = serde_json::to_value(item.category)?
                .as_str()
                .map(|s| s.to_string());

            sqlx::query(
                "INSERT INTO places_items
                     (osm_type, osm_id, lat, lng, name, category, tags_json, first_seen, last_seen)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(osm_type, osm_id) DO UPDATE SET
                     lat = excluded.lat,
                     lng = excluded.lng,
                     name = COALESCE(excluded.name, places_items.name),
                     category = COALESCE(excluded.category, places_items.category),
                     tags_json = excluded.tags_json,
                     last_seen = excluded.last_seen",
            )
            .bind(&osm_type)
            .bind(osm_id)
            .bind(item.lat)
            .bind(item.lng)
            .bind(&item.name)
            .bind(&category)
            .bind(&tags_json)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| RoamError::StorageError(format!("places upsert failed: {e}")))?;

            written += 1;
        }

        tx.commit()
            .await
            .map_err(|e| RoamError::StorageError(format!("commit failed: {e}")))?;
        Ok(written)
    }

    /// Row-range bbox query with an optional category filter.
    pub async fn query_bbox(
        &self,
        bbox: &BBox4,
        categories: Option<&[PlaceCategory]>,
        limit: i64,
    ) -> RoamResult<Vec<PlaceItem>> {
        let rows = if let Some(cats) = categories.filter(|c| !c.is_empty()) {
            let cat_strs: Vec<String> = cats
                .iter()
                .filter_map(|c| serde_json::to_value(c).ok()?.as_str().map(str::to_string))
                .collect();
            let placeholders = cat_strs.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT osm_type, osm_id, lat, lng, name, category, tags_json, last_seen
                 FROM places_items
                 WHERE lat BETWEEN ? AND ? AND lng BETWEEN ? AND ?
                   AND category IN ({placeholders})
                 LIMIT ?"
            );
            let mut q = sqlx::query(&sql)
                .bind(bbox.min_lat)
                .bind(bbox.max_lat)
                .bind(bbox.min_lng)
                .bind(bbox.max_lng);
            for c in &cat_strs {
                q = q.bind(c);
            }
            q.bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RoamError::StorageError(format!("bbox query failed: {e}")))?
        } else {
            sqlx::query(
                "SELECT osm_type, osm_id, lat, lng, name, category, tags_json, last_seen
                 FROM places_items
                 WHERE lat BETWEEN ? AND ? AND lng BETWEEN ? AND ?
                 LIMIT ?",
            )
            .bind(bbox.min_lat)
            .bind(bbox.max_lat)
            .bind(bbox.min_lng)
            .bind(bbox.max_lng)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("bbox query failed: {e}")))?
        };

        rows.into_iter().map(row_to_item).collect()
    }

    /// Bbox prefetch at `max(limit*3, 500)` rows, then haversine-filtered
    /// down to `limit`, matching the reference store's two-pass radius
    /// search.
    pub async fn query_radius(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        categories: Option<&[PlaceCategory]>,
        limit: i64,
    ) -> RoamResult<Vec<PlaceItem>> {
        let prefetch_limit = (limit * 3).max(500);
        let bbox = bbox_for_radius(lat, lng, radius_m);
        let candidates = self.query_bbox(&bbox, categories, prefetch_limit).await?;

        let mut matched: Vec<(f64, PlaceItem)> = candidates
            .into_iter()
            .filter_map(|item| {
                let d = haversine_m((lat, lng), (item.lat, item.lng));
                (d <= radius_m).then_some((d, item))
            })
            .collect();
        matched.sort_by(|a, b| a.0.total_cmp(&b.0));
        matched.truncate(limit.max(0) as usize);
        Ok(matched.into_iter().map(|(_, item)| item).collect())
    }

    pub async fn tile_is_fresh(&self, bbox: &BBox4, step_deg: f64, ttl_secs: i64) -> RoamResult<bool> {
        let key = tile_key(step_deg, bbox);
        let row = sqlx::query("SELECT last_fetched FROM places_tile_state WHERE tile_key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RoamError::StorageError(format!("tile freshness read failed: {e}")))?;
        match row {
            Some(row) => {
                let last_fetched: String = row.try_get("last_fetched").map_err(|e| {
                    RoamError::StorageError(format!("tile row decode failed: {e}"))
                })?;
                Ok(!roam_common::time::is_expired(
                    &last_fetched,
                    ttl_secs,
                    chrono::Utc::now(),
                ))
            }
            None => Ok(false),
        }
    }

    pub async fn mark_tile_fetched(
        &self,
        bbox: &BBox4,
        step_deg: f64,
        categories: &[PlaceCategory],
        item_count: usize,
    ) -> RoamResult<()> {
        let key = tile_key(step_deg, bbox);
        let categories_json = serde_json::to_vec(categories)?;
        sqlx::query(
            "INSERT INTO places_tile_state
                 (tile_key, min_lat, min_lng, max_lat, max_lng, categories_json, item_count, last_fetched)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tile_key) DO UPDATE SET
                 categories_json = excluded.categories_json,
                 item_count = excluded.item_count,
                 last_fetched = excluded.last_fetched",
        )
        .bind(&key)
        .bind(bbox.min_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lat)
        .bind(bbox.max_lng)
        .bind(&categories_json)
        .bind(item_count as i64)
        .bind(now_iso())
        .execute(&self.pool)
        .await
        .map_err(|e| RoamError::StorageError(format!("tile mark failed: {e}")))?;
        Ok(())
    }

    /// The tiles in `bbox` that are not yet fresh, for the tiled top-up
    /// path to fetch.
    pub async fn tiles_for_bbox(
        &self,
        bbox: &BBox4,
        step_deg: f64,
        max_tiles: usize,
        ttl_secs: i64,
    ) -> RoamResult<Vec<BBox4>> {
        let mut stale = Vec::new();
        for tile in iter_tiles(bbox, step_deg, max_tiles) {
            if !self.tile_is_fresh(&tile, step_deg, ttl_secs).await? {
                stale.push(tile);
            }
        }
        Ok(stale)
    }
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> RoamResult<PlaceItem> {
    let osm_type: String = row
        .try_get("osm_type")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let osm_id: i64 = row
        .try_get("osm_id")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let lat: f64 = row
        .try_get("lat")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let lng: f64 = row
        .try_get("lng")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let name: Option<String> = row
        .try_get("name")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let category: Option<String> = row
        .try_get("category")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let tags_json: Vec<u8> = row
        .try_get("tags_json")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;
    let last_seen: String = row
        .try_get("last_seen")
        .map_err(|e| RoamError::StorageError(format!("row decode failed: {e}")))?;

    let category = category
        .as_deref()
        .and_then(category_from_str)
        .unwrap_or(PlaceCategory::Place);
    let tags = if tags_json.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&tags_json)?
    };

    Ok(PlaceItem {
        id: format!("{osm_type}:{osm_id}"),
        category,
        name,
        lat,
        lng,
        tags,
        extra: serde_json::Map::new(),
        source: "local_store".to_string(),
        updated_at: last_seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter_tiles_respects_cap() {
        let bbox = BBox4::new(140.0, -30.0, 150.0, -20.0);
        let tiles = iter_tiles(&bbox, 1.0, 5);
        assert_eq!(tiles.len(), 5);
    }

    #[test]
    fn tile_key_stable_for_same_bbox() {
        let bbox = BBox4::new(140.0, -30.0, 141.0, -29.0);
        assert_eq!(tile_key(0.5, &bbox), tile_key(0.5, &bbox));
    }

    #[test]
    fn bbox_for_radius_grows_with_radius() {
        let small = bbox_for_radius(-27.0, 153.0, 500.0);
        let large = bbox_for_radius(-27.0, 153.0, 5000.0);
        assert!((large.max_lat - large.min_lat) > (small.max_lat - small.min_lat));
    }
}
