//! Overpass QL construction, tag-based category inference, and a
//! retrying Overpass API client.

use rand::Rng;
use roam_common::contracts::{BBox4, PlaceCategory, PlaceItem};
use roam_common::error::{RoamError, RoamResult};
use roam_common::time::now_iso;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Filter clauses per category, applied to node/way/relation queries.
/// Falls back to this table when no operator override is configured.
fn fallback_filters(category: PlaceCategory) -> &'static [&'static str] {
    use PlaceCategory::*;
    match category {
        Fuel => &[r#"["amenity"="fuel"]"#],
        Toilet => &[r#"["amenity"="toilets"]"#],
        Water => &[r#"["amenity"="drinking_water"]"#, r#"["man_made"="water_well"]"#],
        Camp => &[r#"["tourism"="camp_site"]"#, r#"["tourism"="caravan_site"]"#],
        Town => &[r#"["place"~"^(town|village|city|hamlet)$"]"#],
        Grocery => &[r#"["shop"="supermarket"]"#, r#"["shop"="convenience"]"#],
        Mechanic => &[r#"["shop"="car_repair"]"#, r#"["amenity"="car_repair"]"#],
        Hospital => &[r#"["amenity"="hospital"]"#],
        Pharmacy => &[r#"["amenity"="pharmacy"]"#],
        Viewpoint => &[r#"["tourism"="viewpoint"]"#],
        Cafe => &[r#"["amenity"="cafe"]"#],
        Restaurant => &[r#"["amenity"="restaurant"]"#],
        FastFood => &[r#"["amenity"="fast_food"]"#],
        Pub => &[r#"["amenity"="pub"]"#],
        Bar => &[r#"["amenity"="bar"]"#],
        Hotel => &[r#"["tourism"="hotel"]"#],
        Motel => &[r#"["tourism"="motel"]"#],
        Hostel => &[r#"["tourism"="hostel"]"#],
        Attraction => &[r#"["tourism"="attraction"]"#],
        Park => &[r#"["leisure"="park"]"#],
        Beach => &[r#"["natural"="beach"]"#],
        _ => &[],
    }
}

pub fn filters_for_categories(categories: &[PlaceCategory]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for &cat in categories {
        for f in fallback_filters(cat) {
            if seen.insert(*f) {
                out.push((*f).to_string());
            }
        }
    }
    out
}

fn bbox_str(b: &BBox4) -> String {
    format!("({},{},{},{})", b.min_lat, b.min_lng, b.max_lat, b.max_lng)
}

/// Build the Overpass QL body for one tile query.
pub fn build_overpass_ql(bbox: &BBox4, filters: &[String], name_clause: &str, timeout_s: u32) -> String {
    let bstr = bbox_str(bbox);
    let mut parts = String::new();
    if filters.is_empty() {
        parts.push_str(&format!("node{name_clause}{bstr};"));
        parts.push_str(&format!("way{name_clause}{bstr};"));
        parts.push_str(&format!("relation{name_clause}{bstr};"));
    } else {
        for f in filters {
            parts.push_str(&format!("node{name_clause}{f}{bstr};"));
            parts.push_str(&format!("way{name_clause}{f}{bstr};"));
            parts.push_str(&format!("relation{name_clause}{f}{bstr};"));
        }
    }
    format!("[out:json][timeout:{timeout_s}];({parts});out center;")
}

/// Build the Overpass QL body for a single "around polyline" query: every
/// sample point contributes one `around:radius,lat,lon` coordinate pair, so
/// the query matches anything within `radius_m` of *any* sample — the
/// corridor-shaped top-up, instead of a per-tile bbox grid.
pub fn build_overpass_around_ql(
    samples: &[(f64, f64)],
    filters: &[String],
    name_clause: &str,
    radius_m: f64,
    timeout_s: u32,
) -> String {
    let coords: String = samples
        .iter()
        .map(|(lat, lng)| format!(",{lat},{lng}"))
        .collect();
    let astr = format!("(around:{radius_m}{coords})");
    let mut parts = String::new();
    if filters.is_empty() {
        parts.push_str(&format!("node{name_clause}{astr};"));
        parts.push_str(&format!("way{name_clause}{astr};"));
        parts.push_str(&format!("relation{name_clause}{astr};"));
    } else {
        for f in filters {
            parts.push_str(&format!("node{name_clause}{f}{astr};"));
            parts.push_str(&format!("way{name_clause}{f}{astr};"));
            parts.push_str(&format!("relation{name_clause}{f}{astr};"));
        }
    }
    format!("[out:json][timeout:{timeout_s}];({parts});out center;")
}

/// Escape and truncate a free-text query for safe use inside a
/// case-insensitive Overpass name regex.
pub fn safe_name_regex(q: &str) -> String {
    let q = q.trim();
    if q.is_empty() {
        return String::new();
    }
    let escaped: String = q
        .chars()
        .filter(|c| *c != '"')
        .map(|c| {
            if "\\.+*?()|[]{}^$".contains(c) {
                format!("\\{c}")
            } else {
                c.to_string()
            }
        })
        .collect();
    escaped.chars().take(80).collect()
}

fn infer_category(tags: &HashMap<String, String>) -> PlaceCategory {
    let get = |k: &str| tags.get(k).map(String::as_str);
    match (
        get("amenity"),
        get("tourism"),
        get("place"),
        get("shop"),
        get("man_made"),
        get("leisure"),
        get("natural"),
    ) {
        (Some("fuel"), ..) => PlaceCategory::Fuel,
        (Some("toilets"), ..) => PlaceCategory::Toilet,
        (Some("drinking_water"), ..) => PlaceCategory::Water,
        (_, _, _, _, Some("water_well"), _, _) => PlaceCategory::Water,
        (_, Some("camp_site") | Some("caravan_site"), ..) => PlaceCategory::Camp,
        (_, _, Some("city") | Some("town") | Some("village") | Some("hamlet"), ..) => PlaceCategory::Town,
        (_, _, _, Some("supermarket") | Some("convenience"), ..) => PlaceCategory::Grocery,
        (Some("car_repair"), ..) => PlaceCategory::Mechanic,
        (_, _, _, Some("car_repair"), ..) => PlaceCategory::Mechanic,
        (Some("hospital"), ..) => PlaceCategory::Hospital,
        (Some("pharmacy"), ..) => PlaceCategory::Pharmacy,
        (_, Some("viewpoint"), ..) => PlaceCategory::Viewpoint,
        (Some("cafe"), ..) => PlaceCategory::Cafe,
        (Some("restaurant"), ..) => PlaceCategory::Restaurant,
        (Some("fast_food"), ..) => PlaceCategory::FastFood,
        (Some("pub"), ..) => PlaceCategory::Pub,
        (Some("bar"), ..) => PlaceCategory::Bar,
        (_, Some("hotel"), ..) => PlaceCategory::Hotel,
        (_, Some("motel"), ..) => PlaceCategory::Motel,
        (_, Some("hostel"), ..) => PlaceCategory::Hostel,
        (_, Some("attraction"), ..) => PlaceCategory::Attraction,
        (_, _, _, _, _, Some("park"), _) => PlaceCategory::Park,
        (_, _, _, _, _, _, Some("beach")) => PlaceCategory::Beach,
        _ => PlaceCategory::Town,
    }
}

/// Convert one raw Overpass element into a [`PlaceItem`], skipping
/// elements with no name, no coordinates, or no id — matching the
/// reference importer's acceptance rules.
pub fn element_to_item(el: &Value) -> Option<PlaceItem> {
    let tags_val = el.get("tags")?.as_object()?;
    let tags: HashMap<String, String> = tags_val
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    let name = tags
        .get("name")
        .or_else(|| tags.get("brand"))
        .or_else(|| tags.get("operator"))?
        .clone();

    let (lat, lng) = if let (Some(lat), Some(lng)) = (
        el.get("lat").and_then(Value::as_f64),
        el.get("lon").and_then(Value::as_f64),
    ) {
        (lat, lng)
    } else {
        let center = el.get("center")?;
        (
            center.get("lat").and_then(Value::as_f64)?,
            center.get("lon").and_then(Value::as_f64)?,
        )
    };

    let osm_type = el.get("type").and_then(Value::as_str).unwrap_or("node");
    let osm_id = el.get("id").and_then(Value::as_i64)?;

    let mut extra = serde_json::Map::new();
    for (k, v) in tags_val {
        extra.insert(k.clone(), v.clone());
    }
    extra.insert("osm_type".to_string(), Value::String(osm_type.to_string()));
    extra.insert("osm_id".to_string(), Value::from(osm_id));

    Some(PlaceItem {
        id: format!("osm:{osm_type}:{osm_id}"),
        category: infer_category(&tags),
        name: Some(name),
        lat,
        lng,
        tags: Value::Object(tags_val.clone()),
        extra,
        source: "overpass".to_string(),
        updated_at: now_iso(),
    })
}

/// Thin retrying client over the Overpass `/api/interpreter` endpoint.
pub struct OverpassClient {
    http: reqwest::Client,
    url: String,
    attempts: u32,
    base_sleep: Duration,
}

impl OverpassClient {
    pub fn new(url: impl Into<String>, timeout_s: u64, attempts: u32, base_sleep_s: f64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_s))
                .build()
                .expect("reqwest client build"),
            url: url.into(),
            attempts,
            base_sleep: Duration::from_secs_f64(base_sleep_s),
        }
    }

    fn is_retryable(status: reqwest::StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 502 | 503 | 504)
    }

    pub async fn fetch(&self, ql: &str) -> RoamResult<Value> {
        let mut last_err = None;
        for attempt in 0..self.attempts {
            let result = self.http.post(&self.url).body(ql.to_string()).send().await;
            match result {
                Ok(resp) if Self::is_retryable(resp.status()) => {
                    last_err = Some(format!("overpass retryable status {}", resp.status()));
                }
                Ok(resp) => {
                    return resp
                        .error_for_status()
                        .map_err(|e| RoamError::ServiceUnavailable(format!("overpass error: {e}")))?
                        .json::<Value>()
                        .await
                        .map_err(|e| RoamError::ServiceUnavailable(format!("overpass decode failed: {e}")));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                }
            }

            let jitter_ms: u64 = rand::thread_rng().gen_range(0..250);
            let backoff = self.base_sleep * 2u32.pow(attempt) + Duration::from_millis(jitter_ms);
            warn!(attempt, backoff_ms = backoff.as_millis() as u64, "overpass retry");
            tokio::time::sleep(backoff).await;
        }

        Err(RoamError::ServiceUnavailable(format!(
            "overpass fetch failed after {} attempts: {}",
            self.attempts,
            last_err.unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_dedup_across_categories() {
        let filters = filters_for_categories(&[PlaceCategory::Grocery, PlaceCategory::Grocery]);
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn safe_name_regex_strips_quotes_and_truncates() {
        let out = safe_name_regex(&format!("{}\"", "a".repeat(100)));
        assert!(out.len() <= 80);
        assert!(!out.contains('"'));
    }

    #[test]
    fn element_to_item_requires_name() {
        let el = serde_json::json!({"type": "node", "id": 1, "lat": -27.0, "lon": 153.0, "tags": {}});
        assert!(element_to_item(&el).is_none());
    }

    #[test]
    fn element_to_item_infers_fuel_category() {
        let el = serde_json::json!({
            "type": "node", "id": 42, "lat": -27.0, "lon": 153.0,
            "tags": {"name": "Shell Servo", "amenity": "fuel"}
        });
        let item = element_to_item(&el).unwrap();
        assert_eq!(item.category, PlaceCategory::Fuel);
        assert_eq!(item.id, "osm:node:42");
    }

    #[test]
    fn element_to_item_uses_center_when_no_direct_coords() {
        let el = serde_json::json!({
            "type": "way", "id": 7,
            "center": {"lat": -33.0, "lon": 151.0},
            "tags": {"name": "Some Park", "leisure": "park"}
        });
        let item = element_to_item(&el).unwrap();
        assert_eq!(item.category, PlaceCategory::Park);
    }
}
