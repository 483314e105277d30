//! Multi-state hazard overlay fan-out: CAP-AU XML (severe weather /
//! emergency alerts), BOM RSS warnings, and a generalized JSON/ArcGIS
//! vendor-feed parser for the remaining state emergency services, unified
//! into one dedup'd, content-addressed [`HazardsOverlay`] pack with
//! CAP-AU composite priority scoring.

use chrono::Utc;
use metrics::counter;
use roam_common::config::RoamConfig;
use roam_common::contracts::{BBox4, HazardEvent, HazardsOverlay};
use roam_common::error::RoamResult;
use roam_common::keying::hazards_key;
use roam_common::time::{event_ended, is_expired, now_iso};
use roam_storage::PackCache;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest.iter().take(12).map(|b| format!("{b:02x}")).collect()
}

/// CAP-AU `severity` score, per the standard CAP-AU scoring convention.
pub fn severity_score(sev: &str) -> f64 {
    match sev.to_lowercase().as_str() {
        "extreme" => 1.0,
        "severe" => 0.8,
        "moderate" => 0.5,
        "minor" => 0.2,
        _ => 0.0,
    }
}

/// CAP-AU `urgency` score.
pub fn urgency_score(urgency: &str) -> f64 {
    match urgency.to_lowercase().as_str() {
        "immediate" => 1.0,
        "expected" => 0.7,
        "future" => 0.4,
        "past" => 0.1,
        _ => 0.0,
    }
}

/// CAP-AU `certainty` score.
pub fn certainty_score(certainty: &str) -> f64 {
    match certainty.to_lowercase().as_str() {
        "observed" => 1.0,
        "likely" => 0.7,
        "possible" => 0.5,
        "unlikely" => 0.2,
        _ => 0.0,
    }
}

/// Composite priority: weighted blend of severity, urgency and certainty,
/// rounded to three decimals.
pub fn effective_priority(severity: &str, urgency: &str, certainty: &str) -> f64 {
    let raw = 0.40 * severity_score(severity) + 0.35 * urgency_score(urgency) + 0.25 * certainty_score(certainty);
    (raw * 1000.0).round() / 1000.0
}

fn severity_from_text(title: &str, desc: &str) -> &'static str {
    let hay = format!("{title} {desc}").to_lowercase();
    if hay.contains("emergency warning") || hay.contains("evacuate") || hay.contains("dangerous") {
        "severe"
    } else if hay.contains("warning") {
        "moderate"
    } else if hay.contains("watch") || hay.contains("advice") {
        "minor"
    } else {
        "unknown"
    }
}

fn kind_from_text(title: &str, event: Option<&str>) -> &'static str {
    let t = event.unwrap_or(title).to_lowercase();
    if t.contains("flood") {
        "flood"
    } else if t.contains("cyclone") {
        "cyclone"
    } else if t.contains("storm") || t.contains("thunder") {
        "storm"
    } else if t.contains("fire") || t.contains("bushfire") {
        "fire"
    } else if t.contains("wind") || t.contains("gale") {
        "wind"
    } else if t.contains("heat") {
        "heat"
    } else if t.contains("marine") {
        "marine"
    } else {
        "weather_warning"
    }
}

#[derive(Debug, Deserialize, Default)]
struct RssFeed {
    channel: RssChannel,
}

#[derive(Debug, Deserialize, Default)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize, Default)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

fn parse_rss(xml_text: &str, source: &str) -> Vec<HazardEvent> {
    let feed: RssFeed = match quick_xml::de::from_str(xml_text) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    feed.channel
        .items
        .into_iter()
        .filter_map(|item| {
            let title = item.title.unwrap_or_default().trim().to_string();
            let desc = item.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
            if title.is_empty() && desc.is_none() {
                return None;
            }
            let severity = severity_from_text(&title, desc.as_deref().unwrap_or(""));
            let kind = kind_from_text(&title, None);
            let id = stable_id(&[
                source,
                &title.chars().take(160).collect::<String>(),
                item.link.as_deref().unwrap_or(""),
                item.pub_date.as_deref().unwrap_or(""),
            ]);
            Some(HazardEvent {
                id,
                source: source.to_string(),
                state: String::new(),
                category: kind.to_string(),
                headline: if title.is_empty() { "Warning".to_string() } else { title },
                description: desc.unwrap_or_default(),
                severity: severity.to_string(),
                urgency: "unknown".to_string(),
                certainty: "unknown".to_string(),
                effective_priority: effective_priority(severity, "unknown", "unknown"),
                bbox: None,
                polygon_polyline6: None,
                effective_from: item.pub_date.clone(),
                effective_until: None,
                updated_at: now_iso(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize, Default)]
struct CapAlert {
    identifier: Option<String>,
    sent: Option<String>,
    #[serde(rename = "info", default)]
    infos: Vec<CapInfo>,
}

#[derive(Debug, Deserialize, Default)]
struct CapInfo {
    event: Option<String>,
    headline: Option<String>,
    description: Option<String>,
    instruction: Option<String>,
    severity: Option<String>,
    onset: Option<String>,
    effective: Option<String>,
    expires: Option<String>,
    web: Option<String>,
    #[serde(rename = "area", default)]
    areas: Vec<CapArea>,
}

#[derive(Debug, Deserialize, Default)]
struct CapArea {
    #[serde(default)]
    polygon: Vec<String>,
    #[serde(default)]
    circle: Vec<String>,
}

/// Parse a CAP-AU `"lat,lon lat,lon ..."` polygon string into a GeoJSON
/// ring (`[lon, lat]` pairs), closing it if the feed left it open.
fn parse_cap_polygon(text: &str) -> Option<Vec<(f64, f64)>> {
    let mut pts = Vec::new();
    for part in text.trim().replace('\n', " ").split_whitespace() {
        let Some((lat_s, lon_s)) = part.split_once(',') else { continue };
        let (Ok(lat), Ok(lon)) = (lat_s.parse::<f64>(), lon_s.parse::<f64>()) else { continue };
        pts.push((lon, lat));
    }
    if pts.len() < 3 {
        return None;
    }
    if pts.first() != pts.last() {
        let first = pts[0];
        pts.push(first);
    }
    Some(pts)
}

fn bbox_of_ring(ring: &[(f64, f64)]) -> BBox4 {
    let (mut min_lng, mut min_lat, mut max_lng, mut max_lat) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for (lng, lat) in ring {
        min_lng = min_lng.min(*lng);
        max_lng = max_lng.max(*lng);
        min_lat = min_lat.min(*lat);
        max_lat = max_lat.max(*lat);
    }
    BBox4::new(min_lng, min_lat, max_lng, max_lat)
}

fn cap_info_geometry(info: &CapInfo) -> Option<(Vec<(f64, f64)>, BBox4)> {
    for area in &info.areas {
        for poly_text in &area.polygon {
            if let Some(ring) = parse_cap_polygon(poly_text) {
                let bbox = bbox_of_ring(&ring);
                return Some((ring, bbox));
            }
        }
        for circle_text in &area.circle {
            let bits: Vec<&str> = circle_text.split(|c| c == ',' || c == ' ').filter(|s| !s.is_empty()).collect();
            if bits.len() >= 2 {
                if let (Ok(lat), Ok(lon)) = (bits[0].parse::<f64>(), bits[1].parse::<f64>()) {
                    let ring = vec![(lon, lat)];
                    return Some((ring, BBox4::new(lon, lat, lon, lat)));
                }
            }
        }
    }
    None
}

fn parse_cap(xml_text: &str, source: &str) -> Vec<HazardEvent> {
    let alert: CapAlert = match quick_xml::de::from_str(xml_text) {
        Ok(a) => a,
        Err(_) => return Vec::new(),
    };

    let identifier = alert.identifier.unwrap_or_default();
    let sent = alert.sent.clone();

    alert
        .infos
        .into_iter()
        .map(|info| {
            let title = info
                .headline
                .clone()
                .or_else(|| info.event.clone())
                .unwrap_or_else(|| "Warning".to_string());
            let description = info.description.clone().or_else(|| info.instruction.clone()).unwrap_or_default();
            let severity = info
                .severity
                .as_deref()
                .map(|s| s.to_lowercase())
                .filter(|s| matches!(s.as_str(), "extreme" | "severe" | "moderate" | "minor"))
                .unwrap_or_else(|| "unknown".to_string());
            let kind = kind_from_text(&title, info.event.as_deref());

            let (ring, bbox) = match cap_info_geometry(&info) {
                Some((ring, bbox)) => (Some(ring), Some(bbox)),
                None => (None, None),
            };
            let polygon_polyline6 = ring
                .filter(|r| r.len() >= 2)
                .map(|r| roam_common::polyline6::encode(&r.iter().map(|(lng, lat)| (*lat, *lng)).collect::<Vec<_>>()));

            let effective_from = info.effective.clone().or_else(|| info.onset.clone()).or_else(|| sent.clone());
            let id = stable_id(&[
                source,
                &identifier,
                &title.chars().take(160).collect::<String>(),
                effective_from.as_deref().unwrap_or("").chars().take(80).collect::<String>().as_str(),
                info.expires.as_deref().unwrap_or("").chars().take(80).collect::<String>().as_str(),
            ]);

            HazardEvent {
                id,
                source: source.to_string(),
                state: String::new(),
                category: kind.to_string(),
                headline: title,
                description,
                severity,
                urgency: "unknown".to_string(),
                certainty: "unknown".to_string(),
                effective_priority: 0.0,
                bbox,
                polygon_polyline6,
                effective_from,
                effective_until: info.expires.clone(),
                updated_at: now_iso(),
            }
        })
        .map(|mut ev| {
            ev.effective_priority = effective_priority(&ev.severity, &ev.urgency, &ev.certainty);
            ev
        })
        .collect()
}

/// Flexible extraction for vendor JSON/GeoJSON/ArcGIS-JSON hazard feeds
/// that carry no CAP-AU urgency/certainty dimensions: title/description
/// drive a text-based severity guess, composite priority is severity-only.
fn parse_json_vendor(body: &Value, source: &str) -> Vec<HazardEvent> {
    let items: Vec<&Value> = body
        .get("features")
        .or_else(|| body.get("incidents"))
        .or_else(|| body.get("data"))
        .or_else(|| body.get("result"))
        .or_else(|| body.get("results"))
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_else(|| body.as_array().map(|a| a.iter().collect()).unwrap_or_default());

    items
        .into_iter()
        .filter_map(|item| {
            let props = item.get("attributes").or_else(|| item.get("properties")).unwrap_or(item);
            let title = props
                .get("title")
                .or_else(|| props.get("name"))
                .or_else(|| props.get("headline"))
                .or_else(|| props.get("incidentType"))
                .and_then(Value::as_str)
                .unwrap_or("Warning")
                .to_string();
            let description = props
                .get("description")
                .or_else(|| props.get("status"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            let point = item.get("geometry").and_then(|geom| {
                if let (Some(x), Some(y)) = (geom.get("x").and_then(Value::as_f64), geom.get("y").and_then(Value::as_f64)) {
                    return Some((y, x));
                }
                let coords = geom.get("coordinates")?.as_array()?;
                if coords.len() == 2 {
                    return Some((coords[1].as_f64()?, coords[0].as_f64()?));
                }
                None
            }).or_else(|| {
                let lat = props.get("latitude").or_else(|| props.get("lat")).and_then(Value::as_f64)?;
                let lng = props.get("longitude").or_else(|| props.get("lng")).and_then(Value::as_f64)?;
                Some((lat, lng))
            });

            let severity = severity_from_text(&title, &description);
            let kind = kind_from_text(&title, props.get("category").and_then(Value::as_str));
            let id = stable_id(&[source, &title.chars().take(160).collect::<String>(), &description.chars().take(80).collect::<String>()]);

            Some(HazardEvent {
                id,
                source: source.to_string(),
                state: String::new(),
                category: kind.to_string(),
                headline: title,
                description,
                severity: severity.to_string(),
                urgency: "unknown".to_string(),
                certainty: "unknown".to_string(),
                effective_priority: effective_priority(severity, "unknown", "unknown"),
                bbox: point.map(|(lat, lng)| BBox4::new(lng, lat, lng, lat)),
                polygon_polyline6: None,
                effective_from: None,
                effective_until: None,
                updated_at: now_iso(),
            })
        })
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Rss,
    Cap,
    CapWithRssFallback,
    JsonVendor,
}

struct HazardSource {
    key: &'static str,
    state: &'static str,
    url: String,
    format: SourceFormat,
}

fn bbox_diag(bbox: &BBox4) -> f64 {
    let dx = bbox.max_lng - bbox.min_lng;
    let dy = bbox.max_lat - bbox.min_lat;
    (dx * dx + dy * dy).sqrt()
}

pub struct HazardsEngine {
    cache: PackCache,
    http: reqwest::Client,
}

impl HazardsEngine {
    pub fn new(cache: PackCache) -> Self {
        Self {
            cache,
            http: reqwest::Client::builder()
                .user_agent("roam/hazards")
                .build()
                .expect("reqwest client build"),
        }
    }

    fn sources(&self, config: &RoamConfig, states: &[&str]) -> Vec<HazardSource> {
        let mut out = Vec::new();
        let bom = [
            ("qld", &config.bom_rss_qld_url),
            ("nsw", &config.bom_rss_nsw_url),
            ("vic", &config.bom_rss_vic_url),
            ("sa", &config.bom_rss_sa_url),
            ("wa", &config.bom_rss_wa_url),
            ("nt", &config.bom_rss_nt_url),
            ("tas", &config.bom_rss_tas_url),
        ];
        if config.hazards_enable_bom_rss {
            for (state, url) in bom {
                if states.contains(&state) && !url.trim().is_empty() {
                    out.push(HazardSource {
                        key: "bom_rss",
                        state,
                        url: url.clone(),
                        format: SourceFormat::Rss,
                    });
                }
            }
        }
        if states.contains(&"qld") {
            if !config.qld_disaster_cap_url.trim().is_empty() {
                out.push(HazardSource {
                    key: "qld_disaster_cap",
                    state: "qld",
                    url: config.qld_disaster_cap_url.clone(),
                    format: SourceFormat::Cap,
                });
            }
            if !config.qld_emergency_alerts_url.trim().is_empty() {
                out.push(HazardSource {
                    key: "qld_emergency_alerts",
                    state: "qld",
                    url: config.qld_emergency_alerts_url.clone(),
                    format: SourceFormat::CapWithRssFallback,
                });
            }
        }
        if states.contains(&"nsw") && !config.nsw_rfs_fires_url.trim().is_empty() {
            out.push(HazardSource {
                key: "nsw_rfs_fires",
                state: "nsw",
                url: config.nsw_rfs_fires_url.clone(),
                format: SourceFormat::JsonVendor,
            });
        }
        if states.contains(&"vic") && !config.vic_emergency_url.trim().is_empty() {
            out.push(HazardSource {
                key: "vic_emergency",
                state: "vic",
                url: config.vic_emergency_url.clone(),
                format: SourceFormat::JsonVendor,
            });
        }
        if states.contains(&"sa") && !config.sa_cfs_url.trim().is_empty() {
            out.push(HazardSource {
                key: "sa_cfs",
                state: "sa",
                url: config.sa_cfs_url.clone(),
                format: SourceFormat::JsonVendor,
            });
        }
        if states.contains(&"wa") && config.wa_dfes_enabled {
            for feed in config.wa_dfes_feed_list() {
                out.push(HazardSource {
                    key: "wa_dfes",
                    state: "wa",
                    url: format!("{}/{}", config.wa_dfes_base_url.trim_end_matches('/'), feed),
                    format: SourceFormat::JsonVendor,
                });
            }
        }
        if states.contains(&"tas") && config.tas_hazards_enabled && !config.tas_thelist_url.trim().is_empty() {
            out.push(HazardSource {
                key: "tas_thelist",
                state: "tas",
                url: config.tas_thelist_url.clone(),
                format: SourceFormat::JsonVendor,
            });
        }
        if config.dea_hotspots_enabled && !config.dea_hotspots_url.trim().is_empty() {
            out.push(HazardSource {
                key: "dea_hotspots",
                state: "national",
                url: config.dea_hotspots_url.clone(),
                format: SourceFormat::JsonVendor,
            });
        }
        out
    }

    /// Poll every hazard source relevant to `bbox`, dedup by stable id and
    /// cache the pack keyed by bbox + participating source keys.
    pub async fn poll(&self, config: &RoamConfig, bbox: &BBox4) -> RoamResult<HazardsOverlay> {
        let algo_version = &config.hazards_algo_version;
        let states = crate::registry::states_for_bbox(bbox);
        let use_sources = self.sources(config, &states);

        let key = hazards_key(
            &json!({ "bbox": bbox, "sources": use_sources.iter().map(|s| s.key).collect::<Vec<_>>() }),
            algo_version,
        );

        if let Some(cached) = self.cache.get_hazards_pack::<HazardsOverlay>(&key).await? {
            if !is_expired(&cached.created_at, config.overlays_cache_seconds as i64, Utc::now()) {
                return Ok(cached);
            }
        }

        if use_sources.is_empty() {
            let pack = HazardsOverlay {
                hazards_key: key.clone(),
                bbox: *bbox,
                provider: "disabled".to_string(),
                algo_version: algo_version.clone(),
                created_at: now_iso(),
                items: Vec::new(),
                warnings: vec!["No hazard sources configured/enabled.".to_string()],
            };
            self.cache.put_hazards_pack(&key, algo_version, &pack).await?;
            return Ok(pack);
        }

        let timeout = Duration::from_secs_f64(config.overlays_timeout_s);
        let diag = bbox_diag(bbox);
        let mut warnings = Vec::new();
        let mut items = Vec::new();

        for source in &use_sources {
            let text = match self
                .http
                .get(&source.url)
                .timeout(timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(resp) => resp.text().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            let text = match text {
                Ok(t) => t,
                Err(e) => {
                    counter!("overlay_source_failures_total", "source" => format!("hazards:{}", source.key)).increment(1);
                    warnings.push(format!("hazards:{} fetch failed: {e}", source.key));
                    continue;
                }
            };

            let mut events = match source.format {
                SourceFormat::Rss => parse_rss(&text, source.key),
                SourceFormat::Cap => parse_cap(&text, source.key),
                SourceFormat::CapWithRssFallback => {
                    let cap_events = parse_cap(&text, source.key);
                    if cap_events.is_empty() {
                        parse_rss(&text, source.key)
                    } else {
                        cap_events
                    }
                }
                SourceFormat::JsonVendor => match serde_json::from_str::<Value>(&text) {
                    Ok(body) => parse_json_vendor(&body, source.key),
                    Err(e) => {
                        counter!("overlay_source_failures_total", "source" => format!("hazards:{}", source.key)).increment(1);
                        warnings.push(format!("hazards:{} parse failed: {e}", source.key));
                        Vec::new()
                    }
                },
            };

            for ev in &mut events {
                ev.state = source.state.to_string();
            }

            let now = Utc::now();
            events.retain(|ev| !event_ended(ev.effective_until.as_deref(), now));

            for ev in events {
                match &ev.bbox {
                    Some(ev_bbox) if ev_bbox.overlaps(bbox) => items.push(ev),
                    Some(_) => {}
                    None if diag >= 0.35 => items.push(ev),
                    None => {}
                }
            }
        }

        let mut dedup: HashMap<String, HazardEvent> = HashMap::new();
        for ev in items {
            dedup.insert(ev.id.clone(), ev);
        }

        let provider = if dedup.is_empty() {
            "empty".to_string()
        } else {
            use_sources.iter().map(|s| s.key).collect::<Vec<_>>().join(";")
        };

        let pack = HazardsOverlay {
            hazards_key: key.clone(),
            bbox: *bbox,
            provider,
            algo_version: algo_version.clone(),
            created_at: now_iso(),
            items: dedup.into_values().collect(),
            warnings,
        };

        self.cache.put_hazards_pack(&key, algo_version, &pack).await?;
        Ok(pack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_priority_matches_severe_immediate_observed_scenario() {
        let p = effective_priority("severe", "immediate", "observed");
        assert!((p - 0.920).abs() < 1e-9);
    }

    #[test]
    fn composite_priority_matches_severe_future_possible_scenario() {
        let p = effective_priority("severe", "future", "possible");
        assert!((p - 0.585).abs() < 1e-9);
    }

    #[test]
    fn unknown_dimensions_score_zero() {
        assert_eq!(severity_score("nonsense"), 0.0);
        assert_eq!(urgency_score(""), 0.0);
        assert_eq!(certainty_score("unknown"), 0.0);
    }

    #[test]
    fn parse_cap_polygon_closes_open_ring() {
        let ring = parse_cap_polygon("-27.0,153.0 -27.1,153.1 -27.2,153.0").unwrap();
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn parse_cap_polygon_rejects_too_few_points() {
        assert!(parse_cap_polygon("-27.0,153.0 -27.1,153.1").is_none());
    }

    #[test]
    fn parse_rss_skips_items_with_no_title_or_description() {
        let xml = r#"<rss><channel>
            <item><title></title><description></description></item>
            <item><title>Severe Weather Warning</title><description>Damaging winds</description></item>
        </channel></rss>"#;
        let events = parse_rss(xml, "bom_rss_qld");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, "moderate");
    }

    #[test]
    fn parse_cap_extracts_polygon_and_severity() {
        let xml = r#"<alert><identifier>A1</identifier><sent>2026-01-01T00:00:00Z</sent>
            <info>
                <event>Severe Thunderstorm</event>
                <headline>Severe Thunderstorm Warning</headline>
                <severity>Severe</severity>
                <effective>2026-01-01T01:00:00Z</effective>
                <expires>2026-01-01T06:00:00Z</expires>
                <area><polygon>-27.0,153.0 -27.1,153.1 -27.2,153.0</polygon></area>
            </info>
        </alert>"#;
        let events = parse_cap(xml, "qld_disaster_cap");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, "severe");
        assert_eq!(events[0].category, "storm");
        assert!(events[0].bbox.is_some());
        assert!(events[0].polygon_polyline6.is_some());
    }

    #[test]
    fn parse_json_vendor_reads_arcgis_shape() {
        let body = json!({
            "features": [{
                "attributes": {"title": "Bushfire Warning near Huonville"},
                "geometry": {"x": 147.05, "y": -43.0}
            }]
        });
        let events = parse_json_vendor(&body, "tas_thelist");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, "fire");
        assert!(events[0].bbox.is_some());
    }
}
