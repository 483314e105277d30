//! Multi-state traffic overlay fan-out: QLD's official v2 API (full poll +
//! delta merge against an in-process cache) plus a per-state GeoJSON/JSON
//! feed registry for NSW, VIC, SA, WA and NT, unified into one dedup'd,
//! content-addressed [`TrafficOverlay`] pack.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use roam_common::config::RoamConfig;
use roam_common::contracts::{BBox4, EventSeverity, TrafficEvent, TrafficOverlay};
use roam_common::error::{RoamError, RoamResult};
use roam_common::keying::traffic_key;
use roam_common::time::{event_ended, is_expired, now_iso};
use roam_storage::PackCache;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use metrics::counter;
use tracing::warn;

use crate::registry::states_for_bbox;

const MAX_CONCURRENT_FEEDS: usize = 6;

fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest.iter().take(12).map(|b| format!("{b:02x}")).collect()
}

/// Classify a headline/description pair into `(category, severity)`,
/// matching the reference keyword triage.
fn classify(headline: &str, description: &str) -> (&'static str, EventSeverity) {
    let hay = format!("{headline} {description}").to_lowercase();
    if hay.contains("road closed") || hay.contains("closure") || hay.contains("closed") {
        ("closure", EventSeverity::Major)
    } else if hay.contains("roadworks") || hay.contains("works") {
        ("roadworks", EventSeverity::Moderate)
    } else if hay.contains("congestion") || hay.contains("heavy traffic") {
        ("congestion", EventSeverity::Minor)
    } else if hay.contains("flood") {
        ("flooding", EventSeverity::Major)
    } else if hay.contains("crash") || hay.contains("incident") || hay.contains("collision") {
        ("incident", EventSeverity::Moderate)
    } else {
        ("hazard", EventSeverity::Minor)
    }
}

fn geom_centroid(geom: &Value) -> Option<(f64, f64)> {
    let mut coords: Vec<(f64, f64)> = Vec::new();

    fn walk(v: &Value, out: &mut Vec<(f64, f64)>) {
        if let Some(arr) = v.as_array() {
            if arr.len() == 2 && arr.iter().all(|x| x.is_number()) {
                if let (Some(lng), Some(lat)) = (arr[0].as_f64(), arr[1].as_f64()) {
                    out.push((lat, lng));
                }
            } else {
                for item in arr {
                    walk(item, out);
                }
            }
        }
    }

    walk(geom.get("coordinates")?, &mut coords);
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (sum_lat, sum_lng) = coords.iter().fold((0.0, 0.0), |(a, b), (lat, lng)| (a + lat, b + lng));
    Some((sum_lat / n, sum_lng / n))
}

fn string_field<'a>(props: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| props.get(*k).and_then(Value::as_str))
}

fn feature_to_event(feature: &Value, source: &str, feed: &str, state: &str) -> Option<TrafficEvent> {
    let props = feature.get("properties").unwrap_or(feature);
    let headline = string_field(props, &["headline", "title", "event_type", "type", "description"])
        .unwrap_or(feed)
        .to_string();
    let description = string_field(props, &["description", "information", "advice"])
        .unwrap_or("")
        .to_string();

    let geom = feature.get("geometry");
    let (lat, lng) = if let (Some(lat), Some(lng)) = (
        props.get("lat").or_else(|| props.get("latitude")).and_then(Value::as_f64),
        props.get("lng").or_else(|| props.get("longitude")).and_then(Value::as_f64),
    ) {
        (lat, lng)
    } else {
        geom.and_then(geom_centroid)?
    };

    let (category, severity) = classify(&headline, &description);

    let source_id = feature
        .get("id")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
        .or_else(|| string_field(props, &["id", "event_id", "eventId"]).map(str::to_string));

    let id = match source_id {
        Some(sid) => stable_id(&[source, feed, &sid]),
        None => stable_id(&[source, feed, &headline, &format!("{lat:.5},{lng:.5}")]),
    };

    let geometry_polyline6 = geom.and_then(|g| g.get("coordinates")).and_then(|c| {
        let mut pts = Vec::new();
        fn walk(v: &Value, out: &mut Vec<(f64, f64)>) {
            if let Some(arr) = v.as_array() {
                if arr.len() == 2 && arr.iter().all(|x| x.is_number()) {
                    if let (Some(lng), Some(lat)) = (arr[0].as_f64(), arr[1].as_f64()) {
                        out.push((lat, lng));
                    }
                } else {
                    for item in arr {
                        walk(item, out);
                    }
                }
            }
        }
        walk(c, &mut pts);
        if pts.len() >= 2 {
            Some(roam_common::polyline6::encode(&pts))
        } else {
            None
        }
    });

    let text = if headline.is_empty() {
        feed.to_string()
    } else if description.is_empty() {
        headline
    } else {
        format!("{headline}: {description}")
    };

    Some(TrafficEvent {
        id,
        source: source.to_string(),
        state: state.to_string(),
        category: category.to_string(),
        severity,
        description: text,
        lat,
        lng,
        geometry_polyline6,
        start_time: string_field(props, &["start", "start_time", "startTime"]).map(str::to_string),
        end_time: string_field(props, &["end", "end_time", "endTime", "expires"]).map(str::to_string),
        updated_at: now_iso(),
    })
}

/// Parse a GeoJSON `FeatureCollection` body into events.
fn parse_geojson(body: &Value, source: &str, feed: &str, state: &str) -> Vec<TrafficEvent> {
    body.get("features")
        .and_then(Value::as_array)
        .map(|feats| {
            feats
                .iter()
                .filter_map(|f| feature_to_event(f, source, feed, state))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a bare JSON array of flat objects into events (NT road report).
fn parse_json_array(body: &Value, source: &str, feed: &str, state: &str) -> Vec<TrafficEvent> {
    body.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| feature_to_event(item, source, feed, state))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct QldMergeCache {
    full_at: Option<DateTime<Utc>>,
    delta_at: Option<DateTime<Utc>>,
    features_by_id: HashMap<String, Value>,
}

impl QldMergeCache {
    fn is_full_stale(&self, full_refresh_s: i64) -> bool {
        if self.features_by_id.is_empty() {
            return true;
        }
        match self.full_at {
            Some(t) => (Utc::now() - t).num_seconds() > full_refresh_s.max(1),
            None => true,
        }
    }

    fn can_use_cached(&self, ttl_s: i64) -> bool {
        if self.features_by_id.is_empty() {
            return false;
        }
        let newest = match (self.full_at, self.delta_at) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return false,
        };
        (Utc::now() - newest).num_seconds() <= ttl_s.max(1)
    }
}

fn qld_feature_cache_id(feature: &Value) -> String {
    let props = feature.get("properties").cloned().unwrap_or(Value::Null);
    let sid = feature
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| props.get("id").and_then(Value::as_str).map(str::to_string))
        .or_else(|| props.get("event_id").and_then(Value::as_str).map(str::to_string));
    match sid {
        Some(s) => stable_id(&["qldtraffic", &s]),
        None => {
            let geom = feature.get("geometry").cloned().unwrap_or(Value::Null);
            stable_id(&[
                "qldtraffic",
                &geom.get("type").and_then(Value::as_str).unwrap_or("").to_string(),
                &serde_json::to_string(&geom).unwrap_or_default(),
            ])
        }
    }
}

fn qld_status_allows(feature: &Value) -> bool {
    let status = feature
        .get("properties")
        .and_then(|p| p.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    status.is_empty() || status == "published" || status == "reopened"
}

/// Polls Australia's traffic feeds and assembles one content-addressed
/// overlay per bbox query, caching the result and isolating every
/// per-source failure into `warnings` rather than failing the poll.
pub struct TrafficEngine {
    cache: PackCache,
    http: reqwest::Client,
    qld_cache: Arc<RwLock<QldMergeCache>>,
}

impl TrafficEngine {
    pub fn new(cache: PackCache) -> Self {
        Self {
            cache,
            http: reqwest::Client::builder()
                .user_agent("roam/traffic")
                .build()
                .expect("reqwest client build"),
            qld_cache: Arc::new(RwLock::new(QldMergeCache::default())),
        }
    }

    async fn fetch_json(&self, url: &str, timeout: Duration) -> RoamResult<Value> {
        self.http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RoamError::ServiceUnavailable(format!("fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| RoamError::ServiceUnavailable(format!("rejected: {e}")))?
            .json::<Value>()
            .await
            .map_err(|e| RoamError::ServiceUnavailable(format!("decode failed: {e}")))
    }

    async fn poll_qld(&self, config: &RoamConfig, bbox: &BBox4, timeout: Duration) -> (Vec<TrafficEvent>, bool, Vec<String>) {
        let mut warnings = Vec::new();
        let events_url = config.qldtraffic_events_url.trim();
        if events_url.is_empty() {
            return (Vec::new(), false, warnings);
        }

        let api_key = (!config.qldtraffic_api_key.trim().is_empty()).then(|| config.qldtraffic_api_key.trim().to_string());
        let with_key = |url: &str| match &api_key {
            Some(k) => format!("{}{}apikey={k}", url, if url.contains('?') { "&" } else { "?" }),
            None => url.to_string(),
        };

        let full_refresh_s = config.qldtraffic_full_refresh_seconds as i64;
        let ttl_s = config.qldtraffic_cache_seconds as i64;

        let is_stale = { self.qld_cache.read().await.is_full_stale(full_refresh_s) };
        let result: RoamResult<()> = async {
            if is_stale {
                let data = self.fetch_json(&with_key(events_url), timeout).await?;
                let feats = data.get("features").and_then(Value::as_array).cloned().unwrap_or_default();
                let mut by_id = HashMap::new();
                for f in feats {
                    if qld_status_allows(&f) {
                        by_id.insert(qld_feature_cache_id(&f), f);
                    }
                }
                let mut cache = self.qld_cache.write().await;
                cache.features_by_id = by_id;
                cache.full_at = Some(Utc::now());
            } else {
                let delta_url = config.qldtraffic_events_delta_url.trim();
                let can_use_cached = { self.qld_cache.read().await.can_use_cached(ttl_s) };
                if !delta_url.is_empty() && !can_use_cached {
                    let data = self.fetch_json(&with_key(delta_url), timeout).await?;
                    let feats = data.get("features").and_then(Value::as_array).cloned().unwrap_or_default();
                    let mut cache = self.qld_cache.write().await;
                    for f in feats {
                        let id = qld_feature_cache_id(&f);
                        if qld_status_allows(&f) {
                            cache.features_by_id.insert(id, f);
                        } else {
                            cache.features_by_id.remove(&id);
                        }
                    }
                    cache.delta_at = Some(Utc::now());
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            counter!("overlay_source_failures_total", "source" => "traffic:qld_v2").increment(1);
            warnings.push(format!("traffic:qld_v2 failed: {e}"));
            return (Vec::new(), false, warnings);
        }

        let now = Utc::now();
        let cache = self.qld_cache.read().await;
        let items = cache
            .features_by_id
            .values()
            .filter_map(|f| feature_to_event(f, "qldtraffic", "events", "qld"))
            .filter(|ev| !event_ended(ev.end_time.as_deref(), now))
            .filter(|ev| BBox4::new(ev.lng - 0.01, ev.lat - 0.01, ev.lng + 0.01, ev.lat + 0.01).overlaps(bbox))
            .collect();
        (items, true, warnings)
    }

    /// Poll every state feed that overlaps `bbox`, dedup by stable id, and
    /// cache the resulting pack keyed by bbox + participating sources.
    pub async fn poll(&self, config: &RoamConfig, bbox: &BBox4) -> RoamResult<TrafficOverlay> {
        let algo_version = &config.traffic_algo_version;
        let states = states_for_bbox(bbox);
        let timeout = Duration::from_secs_f64(config.overlays_timeout_s);

        let mut attempted = Vec::new();
        if !config.qldtraffic_events_url.trim().is_empty() && states.contains(&"qld") {
            attempted.push("qldtraffic:v2".to_string());
        }
        let other_feeds = self.feed_plan(config, &states);
        attempted.extend(other_feeds.iter().map(|(_, feed, _)| format!("{feed}")));

        let key = traffic_key(
            &json!({ "bbox": bbox, "states": states, "sources": attempted }),
            algo_version,
        );

        if let Some(cached) = self.cache.get_traffic_pack::<TrafficOverlay>(&key).await? {
            if !is_expired(&cached.created_at, config.overlays_cache_seconds as i64, Utc::now()) {
                return Ok(cached);
            }
        }

        let mut warnings = Vec::new();
        let mut items = Vec::new();

        if states.contains(&"nsw") && config.nsw_traffic_enabled && config.nsw_traffic_api_key.trim().is_empty() {
            warnings.push("traffic:nsw skipped — no API key configured".to_string());
        }

        if states.contains(&"qld") {
            let (qld_items, qld_ok, qld_warnings) = self.poll_qld(config, bbox, timeout).await;
            items.extend(qld_items);
            warnings.extend(qld_warnings);
            if !qld_ok {
                warn!("qld traffic v2 poll produced no items");
            }
        }

        let fetched: Vec<(String, String, RoamResult<Value>)> = stream::iter(other_feeds.into_iter())
            .map(|(state, feed, url)| {
                let http = self.http.clone();
                async move {
                    let result = http
                        .get(&url)
                        .timeout(timeout)
                        .send()
                        .await
                        .map_err(|e| RoamError::ServiceUnavailable(e.to_string()))
                        .and_then(|r| {
                            r.error_for_status()
                                .map_err(|e| RoamError::ServiceUnavailable(e.to_string()))
                        });
                    let body = match result {
                        Ok(resp) => resp.json::<Value>().await.map_err(|e| RoamError::ServiceUnavailable(e.to_string())),
                        Err(e) => Err(e),
                    };
                    (state, feed, body)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FEEDS)
            .collect()
            .await;

        let now = Utc::now();
        for (state, feed, body) in fetched {
            match body {
                Ok(body) => {
                    let parsed = if feed == "nt_road_report" {
                        parse_json_array(&body, &feed, &feed, &state)
                    } else {
                        parse_geojson(&body, &feed, &feed, &state)
                    };
                    items.extend(parsed.into_iter().filter(|ev| !event_ended(ev.end_time.as_deref(), now)).filter(|ev| {
                        BBox4::new(ev.lng - 0.01, ev.lat - 0.01, ev.lng + 0.01, ev.lat + 0.01).overlaps(bbox)
                    }));
                }
                Err(e) => {
                    counter!("overlay_source_failures_total", "source" => format!("traffic:{feed}")).increment(1);
                    warnings.push(format!("traffic:{feed} fetch failed: {e}"));
                }
            }
        }

        let mut dedup: HashMap<String, TrafficEvent> = HashMap::new();
        for ev in items {
            dedup.insert(ev.id.clone(), ev);
        }

        let mut provider = if attempted.is_empty() {
            "unknown".to_string()
        } else {
            attempted.join("+")
        };
        if dedup.is_empty() {
            provider.push_str(":empty");
        }

        let pack = TrafficOverlay {
            traffic_key: key.clone(),
            bbox: *bbox,
            provider,
            algo_version: algo_version.clone(),
            created_at: now_iso(),
            items: dedup.into_values().collect(),
            warnings,
        };

        self.cache.put_traffic_pack(&key, algo_version, &pack).await?;
        Ok(pack)
    }

    /// Build the `(state, feed_name, url)` plan for every non-QLD source
    /// enabled in config and overlapping the requested states.
    fn feed_plan(&self, config: &RoamConfig, states: &[&str]) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        if states.contains(&"nsw") && config.nsw_traffic_enabled && !config.nsw_traffic_api_key.trim().is_empty() {
            for feed in config.nsw_traffic_feed_list() {
                let url = format!("{}/{}", config.nsw_traffic_base_url.trim_end_matches('/'), feed);
                out.push(("nsw".to_string(), format!("nsw_traffic_{feed}"), url));
            }
        }
        if states.contains(&"vic") && config.vic_traffic_enabled {
            out.push(("vic".to_string(), "vic_traffic_unplanned".to_string(), config.vic_traffic_unplanned_url.clone()));
            out.push(("vic".to_string(), "vic_traffic_planned".to_string(), config.vic_traffic_planned_url.clone()));
            out.push(("vic".to_string(), "vic_traffic_closures".to_string(), config.vic_traffic_closures_url.clone()));
        }
        if states.contains(&"sa") && config.sa_traffic_enabled {
            out.push(("sa".to_string(), "sa_traffic".to_string(), config.sa_traffic_events_url.clone()));
        }
        if states.contains(&"wa") && config.wa_traffic_enabled {
            out.push(("wa".to_string(), "wa_traffic_arcgis".to_string(), config.wa_traffic_arcgis_url.clone()));
        }
        if states.contains(&"nt") && config.nt_traffic_enabled {
            out.push(("nt".to_string(), "nt_road_report".to_string(), config.nt_road_report_url.clone()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_detects_closure_over_roadworks() {
        let (cat, sev) = classify("Road closed due to flooding", "major closure");
        assert_eq!(cat, "closure");
        assert_eq!(sev, EventSeverity::Major);
    }

    #[test]
    fn classify_falls_back_to_hazard() {
        let (cat, _) = classify("Something unusual", "nothing matches");
        assert_eq!(cat, "hazard");
    }

    #[test]
    fn stable_id_is_deterministic_and_length_bound() {
        let a = stable_id(&["qldtraffic", "events", "123"]);
        let b = stable_id(&["qldtraffic", "events", "123"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn feature_to_event_uses_geometry_centroid_when_no_lat_lng_props() {
        let feature = json!({
            "id": "E1",
            "properties": {"headline": "Roadworks on Bruce Hwy"},
            "geometry": {"type": "Point", "coordinates": [153.0, -27.0]},
        });
        let ev = feature_to_event(&feature, "nsw_traffic", "incidents", "nsw").unwrap();
        assert_eq!(ev.lat, -27.0);
        assert_eq!(ev.lng, 153.0);
        assert_eq!(ev.category, "roadworks");
    }

    #[test]
    fn qld_merge_cache_starts_stale() {
        let cache = QldMergeCache::default();
        assert!(cache.is_full_stale(900));
        assert!(!cache.can_use_cached(60));
    }
}
