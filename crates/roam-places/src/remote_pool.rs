//! Shared remote POI pool: a PostgREST-backed table any deployment of the
//! engine reads through and writes behind into, generalized from the
//! reference implementation's Supabase-specific client.

use async_trait::async_trait;
use roam_common::contracts::{BBox4, PlaceCategory, PlaceItem};
use roam_common::error::{RoamError, RoamResult};
use serde_json::Value;

/// Read-through/write-behind interface over a remote POI store shared
/// across deployments. Implementations are expected to be best-effort:
/// callers swallow errors rather than fail the whole search.
#[async_trait]
pub trait RemotePlacesPool: Send + Sync {
    async fn upsert_items(&self, items: &[PlaceItem], source: &str) -> RoamResult<usize>;
    async fn query_bbox(
        &self,
        bbox: &BBox4,
        categories: &[PlaceCategory],
        limit: u32,
    ) -> RoamResult<Vec<PlaceItem>>;
}

fn category_str(c: PlaceCategory) -> String {
    serde_json::to_value(c)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// PostgREST-backed pool, matching the reference `roam_places_items` table
/// and its `osm_type,osm_id` upsert conflict target.
pub struct PostgrestPlacesPool {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    upsert_chunk: usize,
}

impl PostgrestPlacesPool {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, upsert_chunk: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            upsert_chunk: upsert_chunk.max(1),
        }
    }

    fn headers(&self) -> RoamResult<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        let api_key_value = self
            .api_key
            .parse()
            .map_err(|e| RoamError::InternalError(format!("invalid remote pool api key: {e}")))?;
        let auth_value = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|e| RoamError::InternalError(format!("invalid remote pool auth header: {e}")))?;
        headers.insert("apikey", api_key_value);
        headers.insert("Authorization", auth_value);
        headers.insert("Content-Type", "application/json".parse().unwrap());
        Ok(headers)
    }
}

#[async_trait]
impl RemotePlacesPool for PostgrestPlacesPool {
    async fn upsert_items(&self, items: &[PlaceItem], source: &str) -> RoamResult<usize> {
        let rows: Vec<Value> = items
            .iter()
            .filter_map(|it| {
                let osm_type = it.extra.get("osm_type")?.as_str()?.to_string();
                let osm_id = it.extra.get("osm_id")?.as_i64()?;
                Some(serde_json::json!({
                    "osm_type": osm_type,
                    "osm_id": osm_id,
                    "lat": it.lat,
                    "lng": it.lng,
                    "name": it.name,
                    "category": category_str(it.category),
                    "tags": it.extra,
                    "source": source,
                }))
            })
            .collect();

        if rows.is_empty() {
            return Ok(0);
        }

        let url = format!(
            "{}/rest/v1/roam_places_items?on_conflict=osm_type,osm_id",
            self.base_url
        );
        let mut headers = self.headers()?;
        headers.insert(
            "Prefer",
            "resolution=merge-duplicates,return=minimal".parse().unwrap(),
        );

        let mut written = 0usize;
        for chunk in rows.chunks(self.upsert_chunk) {
            let resp = self
                .http
                .post(&url)
                .headers(headers.clone())
                .json(chunk)
                .send()
                .await
                .map_err(|e| RoamError::ServiceUnavailable(format!("remote pool upsert failed: {e}")))?;
            resp.error_for_status()
                .map_err(|e| RoamError::ServiceUnavailable(format!("remote pool upsert rejected: {e}")))?;
            written += chunk.len();
        }
        Ok(written)
    }

    async fn query_bbox(
        &self,
        bbox: &BBox4,
        categories: &[PlaceCategory],
        limit: u32,
    ) -> RoamResult<Vec<PlaceItem>> {
        let mut params = vec![
            ("select".to_string(), "osm_type,osm_id,lat,lng,name,category,tags".to_string()),
            ("lat".to_string(), format!("gte.{}", bbox.min_lat)),
            ("lat".to_string(), format!("lte.{}", bbox.max_lat)),
            ("lng".to_string(), format!("gte.{}", bbox.min_lng)),
            ("lng".to_string(), format!("lte.{}", bbox.max_lng)),
            ("limit".to_string(), limit.to_string()),
        ];
        if !categories.is_empty() {
            let joined = categories
                .iter()
                .map(|c| category_str(*c))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("category".to_string(), format!("in.({joined})")));
        }

        let url = format!("{}/rest/v1/roam_places_items", self.base_url);
        let resp = self
            .http
            .get(&url)
            .headers(self.headers()?)
            .query(&params)
            .send()
            .await
            .map_err(|e| RoamError::ServiceUnavailable(format!("remote pool query failed: {e}")))?
            .error_for_status()
            .map_err(|e| RoamError::ServiceUnavailable(format!("remote pool query rejected: {e}")))?;

        let rows: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| RoamError::ServiceUnavailable(format!("remote pool decode failed: {e}")))?;

        let items = rows
            .into_iter()
            .filter_map(|r| {
                let osm_type = r.get("osm_type")?.as_str()?.to_string();
                let osm_id = r.get("osm_id")?.as_i64()?;
                let lat = r.get("lat")?.as_f64()?;
                let lng = r.get("lng")?.as_f64()?;
                let mut tags = r.get("tags").cloned().unwrap_or(Value::Object(Default::default()));
                if let Value::Object(map) = &mut tags {
                    map.insert("osm_type".to_string(), Value::String(osm_type.clone()));
                    map.insert("osm_id".to_string(), Value::from(osm_id));
                }
                let category = r
                    .get("category")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
                    .unwrap_or(PlaceCategory::Town);

                Some(PlaceItem {
                    id: format!("osm:{osm_type}:{osm_id}"),
                    category,
                    name: r.get("name").and_then(Value::as_str).map(str::to_string),
                    lat,
                    lng,
                    tags: tags.clone(),
                    extra: tags.as_object().cloned().unwrap_or_default(),
                    source: "remote_pool".to_string(),
                    updated_at: roam_common::time::now_iso(),
                })
            })
            .collect();

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_skips_items_without_osm_identity() {
        let pool = PostgrestPlacesPool::new("http://example.invalid", "key", 500);
        let item = PlaceItem {
            id: "x".to_string(),
            category: PlaceCategory::Fuel,
            name: None,
            lat: 0.0,
            lng: 0.0,
            tags: Value::Null,
            extra: serde_json::Map::new(),
            source: "test".to_string(),
            updated_at: roam_common::time::now_iso(),
        };
        let written = pool.upsert_items(&[item], "test").await.unwrap();
        assert_eq!(written, 0);
    }
}
