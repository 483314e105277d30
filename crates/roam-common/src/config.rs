//! Environment-driven configuration, loaded once at service startup.
//!
//! Every field has a documented default; `from_env` only overrides what's
//! actually set, logging at `debug` which variables were overridden so a
//! misconfigured deployment is easy to diagnose from its own logs.

use std::env;

use serde::{Deserialize, Serialize};
use tracing::debug;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => match v.parse() {
            Ok(parsed) => {
                debug!(key, value = %v, "config overridden from environment");
                parsed
            }
            Err(_) => default,
        },
        Err(_) => default,
    }
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Top-level configuration for the whole corridor engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoamConfig {
    // Paths
    pub data_dir: String,
    pub cache_db_path: String,

    // Edge store
    pub edges_database_url: Option<String>,
    pub edges_db_path: String,

    // Routing / elevation
    pub osrm_base_url: String,
    pub osrm_profile: String,
    pub osrm_timeout_s: u64,
    pub elevation_base_url: String,
    pub elevation_timeout_s: u64,
    pub elevation_sample_interval_m: f64,
    pub elevation_batch_size: u32,
    pub elevation_grade_segment_km: f64,

    // Versioning
    pub algo_version: String,
    pub corridor_algo_version: String,
    pub places_algo_version: String,
    pub traffic_algo_version: String,
    pub hazards_algo_version: String,

    // Corridor defaults
    pub corridor_buffer_m_default: u32,
    pub corridor_max_edges_default: u32,

    // Places (Overpass + tiled top-up)
    pub overpass_url: String,
    pub overpass_timeout_s: u64,
    pub overpass_throttle_s: f64,
    pub overpass_retries: u32,
    pub overpass_retry_base_s: f64,
    pub places_tile_step_deg: f64,
    pub places_max_tiles: u32,
    pub places_hard_cap: u32,
    pub places_local_satisfy_ratio: f64,
    pub places_tile_ttl_s: u64,
    pub places_time_budget_s: f64,
    pub places_max_overpass_tiles_per_req: u32,
    pub places_remote_publish_cap: u32,

    // Remote POI pool (shared canonical store, external collaborator)
    pub remote_pool_url: Option<String>,
    pub remote_pool_api_key: Option<String>,
    pub remote_pool_enabled: bool,

    // Overlays (shared)
    pub overlays_cache_seconds: u64,
    pub overlays_timeout_s: f64,

    // QLD traffic (v2 full/delta merge)
    pub qldtraffic_api_key: String,
    pub qldtraffic_events_url: String,
    pub qldtraffic_events_delta_url: String,
    pub qldtraffic_cache_seconds: u64,
    pub qldtraffic_full_refresh_seconds: u64,

    // NSW traffic
    pub nsw_traffic_enabled: bool,
    pub nsw_traffic_api_key: String,
    pub nsw_traffic_base_url: String,
    pub nsw_traffic_feeds: String,

    // VIC traffic
    pub vic_traffic_enabled: bool,
    pub vic_traffic_api_key: String,
    pub vic_traffic_unplanned_url: String,
    pub vic_traffic_planned_url: String,
    pub vic_traffic_closures_url: String,

    // SA traffic (disabled by default - dead upstream)
    pub sa_traffic_enabled: bool,
    pub sa_traffic_events_url: String,

    // WA traffic
    pub wa_traffic_enabled: bool,
    pub wa_traffic_arcgis_url: String,

    // NT traffic
    pub nt_traffic_enabled: bool,
    pub nt_road_report_url: String,

    // BOM RSS hazard feeds
    pub hazards_enable_bom_rss: bool,
    pub bom_rss_qld_url: String,
    pub bom_rss_nsw_url: String,
    pub bom_rss_vic_url: String,
    pub bom_rss_sa_url: String,
    pub bom_rss_wa_url: String,
    pub bom_rss_nt_url: String,
    pub bom_rss_tas_url: String,

    // CAP-AU hazard feeds
    pub qld_disaster_cap_url: String,
    pub qld_emergency_alerts_url: String,
    pub nsw_rfs_fires_url: String,
    pub vic_emergency_url: String,
    pub sa_cfs_url: String,

    pub wa_dfes_enabled: bool,
    pub wa_dfes_base_url: String,
    pub wa_dfes_feeds: String,

    pub dea_hotspots_enabled: bool,
    pub dea_hotspots_url: String,
    pub dea_hotspots_min_confidence: u32,
    pub dea_hotspots_max_hours: u32,

    pub tas_hazards_enabled: bool,
    pub tas_thelist_url: String,

    // Bundle assembly
    pub bundle_include_places_default: bool,
}

impl RoamConfig {
    /// Load configuration from the process environment, falling back to
    /// the documented defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            data_dir: env_string_or("DATA_DIR", "data"),
            cache_db_path: env_string_or("CACHE_DB_PATH", "data/roam_cache.db"),

            edges_database_url: env_opt_string("EDGES_DATABASE_URL"),
            edges_db_path: env_string_or("EDGES_DB_PATH", "data/edges.db"),

            osrm_base_url: env_string_or("OSRM_BASE_URL", "http://127.0.0.1:5000"),
            osrm_profile: env_string_or("OSRM_PROFILE", "driving"),
            osrm_timeout_s: env_or("OSRM_TIMEOUT_S", 30),
            elevation_base_url: env_string_or(
                "ELEVATION_BASE_URL",
                "https://api.open-elevation.com",
            ),
            elevation_timeout_s: env_or("ELEVATION_TIMEOUT_S", 30),
            elevation_sample_interval_m: env_or("ELEVATION_SAMPLE_INTERVAL_M", 200.0),
            elevation_batch_size: env_or("ELEVATION_BATCH_SIZE", 200),
            elevation_grade_segment_km: env_or("ELEVATION_GRADE_SEGMENT_KM", 5.0),

            algo_version: env_string_or("ALGO_VERSION", "navpack.v1.osrm.mld"),
            corridor_algo_version: env_string_or(
                "CORRIDOR_ALGO_VERSION",
                "corridor.v1.edgesqlite",
            ),
            places_algo_version: env_string_or("PLACES_ALGO_VERSION", "places.v1.overpass.tiled"),
            traffic_algo_version: env_string_or("TRAFFIC_ALGO_VERSION", "traffic.v4.multistate"),
            hazards_algo_version: env_string_or(
                "HAZARDS_ALGO_VERSION",
                "hazards.v3.multistate.cap",
            ),

            corridor_buffer_m_default: env_or("CORRIDOR_BUFFER_M_DEFAULT", 15_000),
            corridor_max_edges_default: env_or("CORRIDOR_MAX_EDGES_DEFAULT", 350_000),

            overpass_url: env_string_or("OVERPASS_URL", "https://overpass-api.de/api/interpreter"),
            overpass_timeout_s: env_or("OVERPASS_TIMEOUT_S", 90),
            overpass_throttle_s: env_or("OVERPASS_THROTTLE_S", 0.2),
            overpass_retries: env_or("OVERPASS_RETRIES", 4),
            overpass_retry_base_s: env_or("OVERPASS_RETRY_BASE_S", 0.75),
            places_tile_step_deg: env_or("PLACES_TILE_STEP_DEG", 0.15),
            places_max_tiles: env_or("PLACES_MAX_TILES", 64),
            places_hard_cap: env_or("PLACES_HARD_CAP", 12_000),
            places_local_satisfy_ratio: env_or("PLACES_LOCAL_SATISFY_RATIO", 0.70),
            places_tile_ttl_s: env_or("PLACES_TILE_TTL_S", 60 * 60 * 24 * 14),
            places_time_budget_s: env_or("PLACES_TIME_BUDGET_S", 10.0),
            places_max_overpass_tiles_per_req: env_or("PLACES_MAX_OVERPASS_TILES_PER_REQ", 12),
            places_remote_publish_cap: env_or("PLACES_REMOTE_PUBLISH_CAP", 4000),

            remote_pool_url: env_opt_string("REMOTE_POOL_URL"),
            remote_pool_api_key: env_opt_string("REMOTE_POOL_API_KEY"),
            remote_pool_enabled: env_or("REMOTE_POOL_ENABLED", false),

            overlays_cache_seconds: env_or("OVERLAYS_CACHE_SECONDS", 120),
            overlays_timeout_s: env_or("OVERLAYS_TIMEOUT_S", 15.0),

            qldtraffic_api_key: env_string_or("QLDTRAFFIC_API_KEY", ""),
            qldtraffic_events_url: env_string_or(
                "QLDTRAFFIC_EVENTS_URL",
                "https://api.qldtraffic.qld.gov.au/v2/events",
            ),
            qldtraffic_events_delta_url: env_string_or(
                "QLDTRAFFIC_EVENTS_DELTA_URL",
                "https://api.qldtraffic.qld.gov.au/v2/events/past-one-hour",
            ),
            qldtraffic_cache_seconds: env_or("QLDTRAFFIC_CACHE_SECONDS", 60),
            qldtraffic_full_refresh_seconds: env_or("QLDTRAFFIC_FULL_REFRESH_SECONDS", 900),

            nsw_traffic_enabled: env_or("NSW_TRAFFIC_ENABLED", true),
            nsw_traffic_api_key: env_string_or("NSW_TRAFFIC_API_KEY", ""),
            nsw_traffic_base_url: env_string_or(
                "NSW_TRAFFIC_BASE_URL",
                "https://api.transport.nsw.gov.au/v1/live/hazards",
            ),
            nsw_traffic_feeds: env_string_or(
                "NSW_TRAFFIC_FEEDS",
                "incidents,fires,floods,alpine,roadworks,majorevent,planned",
            ),

            vic_traffic_enabled: env_or("VIC_TRAFFIC_ENABLED", true),
            vic_traffic_api_key: env_string_or("VIC_TRAFFIC_API_KEY", ""),
            vic_traffic_unplanned_url: env_string_or(
                "VIC_TRAFFIC_UNPLANNED_URL",
                "https://data-exchange.vicroads.vic.gov.au/opendata/v2/unplanneddisruptions",
            ),
            vic_traffic_planned_url: env_string_or(
                "VIC_TRAFFIC_PLANNED_URL",
                "https://data-exchange.vicroads.vic.gov.au/opendata/v1/planneddisruptions",
            ),
            vic_traffic_closures_url: env_string_or(
                "VIC_TRAFFIC_CLOSURES_URL",
                "https://data-exchange.vicroads.vic.gov.au/opendata/v1/emergencyroadclosures",
            ),

            sa_traffic_enabled: env_or("SA_TRAFFIC_ENABLED", false),
            sa_traffic_events_url: env_string_or(
                "SA_TRAFFIC_EVENTS_URL",
                "https://data.sa.gov.au/data/dataset/traffic-sa-road-events/resource/road-events.geojson",
            ),

            wa_traffic_enabled: env_or("WA_TRAFFIC_ENABLED", true),
            wa_traffic_arcgis_url: env_string_or(
                "WA_TRAFFIC_ARCGIS_URL",
                "https://services2.arcgis.com/cHGEnmsJ165IBJRM/arcgis/rest/services/WebEoc_RoadIncidents/FeatureServer/1/query?where=1%3D1&outFields=*&f=geojson",
            ),

            nt_traffic_enabled: env_or("NT_TRAFFIC_ENABLED", true),
            nt_road_report_url: env_string_or(
                "NT_ROAD_REPORT_URL",
                "https://roadreport.nt.gov.au/api/Obstruction/GetAll",
            ),

            hazards_enable_bom_rss: env_or("HAZARDS_ENABLE_BOM_RSS", true),
            bom_rss_qld_url: env_string_or(
                "BOM_RSS_QLD_URL",
                "https://www.bom.gov.au/fwo/IDZ00056.warnings_qld.xml",
            ),
            bom_rss_nsw_url: env_string_or(
                "BOM_RSS_NSW_URL",
                "https://www.bom.gov.au/fwo/IDZ00054.warnings_nsw.xml",
            ),
            bom_rss_vic_url: env_string_or(
                "BOM_RSS_VIC_URL",
                "https://www.bom.gov.au/fwo/IDZ00059.warnings_vic.xml",
            ),
            bom_rss_sa_url: env_string_or(
                "BOM_RSS_SA_URL",
                "https://www.bom.gov.au/fwo/IDZ00057.warnings_sa.xml",
            ),
            bom_rss_wa_url: env_string_or(
                "BOM_RSS_WA_URL",
                "https://www.bom.gov.au/fwo/IDZ00058.warnings_wa.xml",
            ),
            bom_rss_nt_url: env_string_or(
                "BOM_RSS_NT_URL",
                "https://www.bom.gov.au/fwo/IDZ00055.warnings_nt.xml",
            ),
            bom_rss_tas_url: env_string_or(
                "BOM_RSS_TAS_URL",
                "https://www.bom.gov.au/fwo/IDZ00060.warnings_tas.xml",
            ),

            qld_disaster_cap_url: env_string_or(
                "QLD_DISASTER_CAP_URL",
                "https://publiccontent-qld-alerts.s3.ap-southeast-2.amazonaws.com/content/Feeds/StormFloodCycloneWarnings/StormWarnings_capau.xml",
            ),
            qld_emergency_alerts_url: env_string_or(
                "QLD_EMERGENCY_ALERTS_URL",
                "https://publiccontent-qld-alerts.s3.ap-southeast-2.amazonaws.com/content/Feeds/QLDEmergencyAlerts/QLDEmergencyAlerts.xml",
            ),
            nsw_rfs_fires_url: env_string_or(
                "NSW_RFS_FIRES_URL",
                "https://www.rfs.nsw.gov.au/feeds/majorIncidents.json",
            ),
            vic_emergency_url: env_string_or(
                "VIC_EMERGENCY_URL",
                "https://data.emergency.vic.gov.au/Show?pageId=getIncidentJSON",
            ),
            sa_cfs_url: env_string_or(
                "SA_CFS_URL",
                "https://data.eso.sa.gov.au/prod/cfs/criimson/cfs_current_incidents.json",
            ),

            wa_dfes_enabled: env_or("WA_DFES_ENABLED", true),
            wa_dfes_base_url: env_string_or("WA_DFES_BASE_URL", "https://api.emergency.wa.gov.au/v1"),
            wa_dfes_feeds: env_string_or("WA_DFES_FEEDS", "incidents,warnings"),

            dea_hotspots_enabled: env_or("DEA_HOTSPOTS_ENABLED", true),
            dea_hotspots_url: env_string_or(
                "DEA_HOTSPOTS_URL",
                "https://hotspots.dea.ga.gov.au/data/recent-hotspots.json",
            ),
            dea_hotspots_min_confidence: env_or("DEA_HOTSPOTS_MIN_CONFIDENCE", 50),
            dea_hotspots_max_hours: env_or("DEA_HOTSPOTS_MAX_HOURS", 72),

            tas_hazards_enabled: env_or("TAS_HAZARDS_ENABLED", true),
            tas_thelist_url: env_string_or(
                "TAS_THELIST_URL",
                "https://services.thelist.tas.gov.au/arcgis/rest/services/Public/EmergencyManagementPublic/MapServer/72/query?where=1%3D1&outFields=*&f=json",
            ),

            bundle_include_places_default: env_or("BUNDLE_INCLUDE_PLACES_DEFAULT", true),
        }
    }

    pub fn nsw_traffic_feed_list(&self) -> Vec<String> {
        self.nsw_traffic_feeds
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn wa_dfes_feed_list(&self) -> Vec<String> {
        self.wa_dfes_feeds
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        // SAFETY: tests run single-threaded within this module; no other
        // test mutates these specific env vars.
        env::remove_var("CORRIDOR_BUFFER_M_DEFAULT");
        let cfg = RoamConfig::from_env();
        assert_eq!(cfg.corridor_buffer_m_default, 15_000);
        assert!(!cfg.sa_traffic_enabled);
        assert!(cfg.nsw_traffic_enabled);
    }

    #[test]
    fn feed_list_splits_on_comma() {
        let cfg = RoamConfig::from_env();
        assert!(cfg.nsw_traffic_feed_list().contains(&"incidents".to_string()));
        assert!(cfg.nsw_traffic_feed_list().len() >= 5);
    }
}
