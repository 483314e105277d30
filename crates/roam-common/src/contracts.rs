//! Wire/storage types shared by every corridor-engine crate.
//!
//! Field names and shapes mirror the JSON contracts the bundle ultimately
//! ships to a client device, so these are the serde source of truth for
//! the whole workspace.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in WGS84 degrees, `(minLng, minLat, maxLng, maxLat)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox4 {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BBox4 {
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        }
    }

    pub fn overlaps(&self, other: &BBox4) -> bool {
        !(self.max_lng < other.min_lng
            || self.min_lng > other.max_lng
            || self.max_lat < other.min_lat
            || self.min_lat > other.max_lat)
    }

    pub fn contains_point(&self, lat: f64, lng: f64) -> bool {
        lng >= self.min_lng && lng <= self.max_lng && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// True if the bbox spans most of Australia (a national-scale query).
    pub fn covers_australia(&self) -> bool {
        (self.max_lng - self.min_lng) > 15.0 && (self.max_lat - self.min_lat) > 10.0
    }
}

/// One stop in a [`NavRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripStop {
    pub id: Option<String>,
    #[serde(default = "default_stop_type")]
    pub r#type: String,
    pub lat: f64,
    pub lng: f64,
    pub name: Option<String>,
}

fn default_stop_type() -> String {
    "poi".to_string()
}

/// A navigation request: an ordered list of stops plus routing preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavRequest {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub prefs: serde_json::Value,
    pub stops: Vec<TripStop>,
    #[serde(default)]
    pub avoid: Vec<String>,
    pub depart_at: Option<String>,
}

fn default_profile() -> String {
    "drive".to_string()
}

/// A single routing maneuver, OSRM-shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavManeuver {
    pub r#type: String,
    pub modifier: Option<String>,
    /// `[lng, lat]`, preserved in OSRM's native coordinate order.
    pub location: [f64; 2],
    pub instruction: Option<String>,
}

/// A single routing step: one maneuver plus the geometry to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavStep {
    pub maneuver: NavManeuver,
    pub distance_m: f64,
    pub duration_s: f64,
    pub polyline6: String,
    pub name: Option<String>,
}

/// A leg between two consecutive stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavLeg {
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: Vec<NavStep>,
}

/// One grade segment of a route, with the accumulated elevation it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeSegment {
    pub start_km: f64,
    pub end_km: f64,
    pub grade_pct: f64,
    pub fuel_factor: f64,
}

/// The assembled route returned by the routing + elevation wrappers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavRoute {
    pub route_key: String,
    pub profile: String,
    pub distance_m: f64,
    pub duration_s: f64,
    pub polyline6: String,
    pub legs: Vec<NavLeg>,
    pub ascent_m: Option<f64>,
    pub descent_m: Option<f64>,
    pub grade_segments: Vec<GradeSegment>,
    pub algo_version: String,
    pub created_at: String,
}

/// A node in the corridor graph, as stored by the edge store adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorNode {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
}

/// An edge in the corridor graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorEdge {
    pub from_id: i64,
    pub to_id: i64,
    pub length_m: f64,
    /// Bitmask: 1=toll, 2=ferry, 4=unsealed.
    pub flags: u32,
    pub highway: Option<String>,
    pub name: Option<String>,
    pub osm_way_id: Option<i64>,
}

/// The corridor-shaped subgraph extracted along a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorGraphPack {
    pub corridor_key: String,
    pub route_key: String,
    pub profile: String,
    pub buffer_m: u32,
    pub max_edges: u32,
    pub bbox: BBox4,
    pub nodes: Vec<CorridorNode>,
    pub edges: Vec<CorridorEdge>,
    pub algo_version: String,
    pub created_at: String,
}

/// Lightweight sidecar of a [`CorridorGraphPack`] used for byte accounting
/// without re-deserializing the whole pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorGraphMeta {
    pub corridor_key: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub byte_len: usize,
}

/// The closed vocabulary of POI categories (~45 tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceCategory {
    // Essentials & safety
    Fuel,
    EvCharging,
    RestArea,
    Toilet,
    Water,
    DumpPoint,
    Mechanic,
    Hospital,
    Pharmacy,
    // Supplies
    Grocery,
    Town,
    Atm,
    Laundromat,
    // Food & drink
    Bakery,
    Cafe,
    Restaurant,
    FastFood,
    Pub,
    Bar,
    // Accommodation
    Camp,
    Hotel,
    Motel,
    Hostel,
    // Nature & outdoors
    Viewpoint,
    Waterfall,
    SwimmingHole,
    Beach,
    NationalPark,
    Hiking,
    Picnic,
    HotSpring,
    // Family & recreation
    Playground,
    Pool,
    Zoo,
    ThemePark,
    // Culture & sightseeing
    VisitorInfo,
    Museum,
    Gallery,
    Heritage,
    Winery,
    Brewery,
    Attraction,
    Market,
    Park,
    // Geocoder
    Address,
    Place,
    Region,
}

/// A lat/lng pair, used as the `center` of a radius-based [`PlacesRequest`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A POI search request: either a bbox or a center+radius, plus category
/// and free-text filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacesRequest {
    pub bbox: Option<BBox4>,
    pub center: Option<LatLng>,
    pub radius_m: Option<u32>,
    #[serde(default)]
    pub categories: Vec<PlaceCategory>,
    pub query: Option<String>,
    pub limit: Option<u32>,
}

/// A polyline+buffer POI search request: the corridor-shaped top-up path,
/// for routes where a bbox-first query would bias results toward the
/// destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorPlacesRequest {
    pub polyline6: String,
    pub buffer_m: u32,
    #[serde(default)]
    pub categories: Vec<PlaceCategory>,
    pub limit: Option<u32>,
    pub sample_interval_km: Option<f64>,
}

/// A single point of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceItem {
    pub id: String,
    pub category: PlaceCategory,
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub tags: serde_json::Value,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub source: String,
    pub updated_at: String,
}

/// A cached set of places covering one bbox/corridor query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacesPack {
    pub places_key: String,
    pub bbox: Option<BBox4>,
    pub items: Vec<PlaceItem>,
    /// Which tiers contributed, e.g. `"local"`, `"local+remote"`,
    /// `"local+remote+overpass"`.
    pub provider: String,
    pub algo_version: String,
    pub created_at: String,
}

/// One sample point along a route with its own places search result, as
/// returned by `suggest_along_route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSuggestion {
    pub idx: usize,
    pub lat: f64,
    pub lng: f64,
    pub km_from_start: f64,
    pub places: PlacesPack,
}

/// Severity taxonomy shared by traffic events and hazards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Minor,
    Moderate,
    Major,
    Severe,
}

/// A single traffic disruption (closure, roadworks, incident, congestion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEvent {
    pub id: String,
    pub source: String,
    pub state: String,
    pub category: String,
    pub severity: EventSeverity,
    pub description: String,
    pub lat: f64,
    pub lng: f64,
    pub geometry_polyline6: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub updated_at: String,
}

/// A single hazard/alert (fire, flood, severe weather warning).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardEvent {
    pub id: String,
    pub source: String,
    pub state: String,
    pub category: String,
    pub headline: String,
    pub description: String,
    pub severity: String,
    pub urgency: String,
    pub certainty: String,
    pub effective_priority: f64,
    pub bbox: Option<BBox4>,
    pub polygon_polyline6: Option<String>,
    pub effective_from: Option<String>,
    pub effective_until: Option<String>,
    pub updated_at: String,
}

/// One poll result from the overlay fan-out: items plus any per-source
/// failures, which never fail the whole poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayPoll<T> {
    pub items: Vec<T>,
    pub warnings: Vec<String>,
}

/// A cached, content-addressed traffic overlay poll for one bbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficOverlay {
    pub traffic_key: String,
    pub bbox: BBox4,
    pub provider: String,
    pub algo_version: String,
    pub created_at: String,
    pub items: Vec<TrafficEvent>,
    pub warnings: Vec<String>,
}

/// A cached, content-addressed hazards overlay poll for one bbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardsOverlay {
    pub hazards_key: String,
    pub bbox: BBox4,
    pub provider: String,
    pub algo_version: String,
    pub created_at: String,
    pub items: Vec<HazardEvent>,
    pub warnings: Vec<String>,
}

/// One asset referenced by an [`OfflineBundleManifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestAsset {
    pub key: String,
    pub kind: String,
    pub byte_len: usize,
    pub present: bool,
}

/// The manifest describing one sealed offline bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineBundleManifest {
    pub plan_id: String,
    pub route_key: String,
    pub corridor_key: Option<String>,
    pub places_key: Option<String>,
    pub traffic_key: Option<String>,
    pub hazards_key: Option<String>,
    pub assets: Vec<ManifestAsset>,
    pub total_bytes: usize,
    pub algo_version: String,
    pub created_at: String,
}
