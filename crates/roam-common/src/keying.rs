//! Content-address key derivation.
//!
//! Every pack is addressed by `base64url_nopad(sha256(canonical_json(payload)))`.
//! Two implementations computing the same normalized payload must produce
//! the same key, so normalization is exact and versioned by `algo_version`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::canon::to_canonical_bytes;
use crate::contracts::NavRequest;

/// `base64url_nopad(sha256(data))`.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    URL_SAFE_NO_PAD.encode(digest)
}

fn hash_value(payload: &Value) -> String {
    content_hash(&to_canonical_bytes(payload))
}

/// Normalize a [`NavRequest`] for hashing: round stop coordinates to 6dp,
/// default `type` to `poi`, drop unknown fields by re-serializing through
/// the typed struct.
pub fn normalize_nav_request(req: &NavRequest) -> Value {
    let stops: Vec<Value> = req
        .stops
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "type": s.r#type,
                "lat": round6(s.lat),
                "lng": round6(s.lng),
                "name": s.name,
            })
        })
        .collect();

    json!({
        "profile": req.profile,
        "prefs": req.prefs,
        "stops": stops,
        "avoid": req.avoid,
        "depart_at": req.depart_at,
    })
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

/// Derive the deterministic route key for a [`NavRequest`].
pub fn route_key_from_request(req: &NavRequest, algo_version: &str) -> String {
    let norm = normalize_nav_request(req);
    hash_value(&json!({ "algo_version": algo_version, "req": norm }))
}

/// Derive the deterministic corridor key for a route + extraction params.
pub fn corridor_key(
    route_key: &str,
    buffer_m: u32,
    max_edges: u32,
    profile: &str,
    algo_version: &str,
) -> String {
    hash_value(&json!({
        "algo_version": algo_version,
        "route_key": route_key,
        "buffer_m": buffer_m,
        "max_edges": max_edges,
        "profile": profile,
    }))
}

/// Derive the deterministic places key for an arbitrary places-query payload.
pub fn places_key(query: &Value, algo_version: &str) -> String {
    hash_value(&json!({ "algo_version": algo_version, "req": query }))
}

/// Derive the deterministic key for a polyline+buffer ("corridor-shaped")
/// POI top-up. The polyline itself is hashed before inclusion so the key's
/// input payload stays bounded regardless of route length.
pub fn corridor_places_key(
    polyline6: &str,
    buffer_km: f64,
    categories: &[crate::contracts::PlaceCategory],
    limit: u32,
    algo_version: &str,
) -> String {
    let mut sorted_categories = categories.to_vec();
    sorted_categories.sort();
    hash_value(&json!({
        "algo_version": algo_version,
        "polyline_hash": content_hash(polyline6.as_bytes()),
        "buffer_km": buffer_km,
        "categories": sorted_categories,
        "limit": limit,
    }))
}

/// Derive the deterministic traffic-overlay key for a bbox-scoped poll.
pub fn traffic_key(bbox: &Value, algo_version: &str) -> String {
    hash_value(&json!({ "algo_version": algo_version, "bbox": bbox }))
}

/// Derive the deterministic hazards-overlay key for a bbox-scoped poll.
pub fn hazards_key(bbox: &Value, algo_version: &str) -> String {
    hash_value(&json!({ "algo_version": algo_version, "bbox": bbox }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::TripStop;

    fn sample_request() -> NavRequest {
        NavRequest {
            profile: "drive".into(),
            prefs: Value::Null,
            stops: vec![
                TripStop {
                    id: Some("a".into()),
                    r#type: "start".into(),
                    lat: -27.4705,
                    lng: 153.0260,
                    name: None,
                },
                TripStop {
                    id: Some("b".into()),
                    r#type: "end".into(),
                    lat: -33.8688,
                    lng: 151.2093,
                    name: None,
                },
            ],
            avoid: vec![],
            depart_at: None,
        }
    }

    #[test]
    fn route_key_is_stable_for_equivalent_requests() {
        let req = sample_request();
        let k1 = route_key_from_request(&req, "v1");
        let k2 = route_key_from_request(&req, "v1");
        assert_eq!(k1, k2);
    }

    #[test]
    fn route_key_changes_with_algo_version() {
        let req = sample_request();
        assert_ne!(
            route_key_from_request(&req, "v1"),
            route_key_from_request(&req, "v2")
        );
    }

    #[test]
    fn route_key_rounds_coordinates_before_hashing() {
        let mut req = sample_request();
        req.stops[0].lat = -27.47050000001;
        let a = route_key_from_request(&req, "v1");
        req.stops[0].lat = -27.470500000002;
        let b = route_key_from_request(&req, "v1");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_has_no_padding() {
        let h = content_hash(b"hello world");
        assert!(!h.contains('='));
    }

    #[test]
    fn corridor_places_key_is_order_independent_over_categories() {
        use crate::contracts::PlaceCategory;
        let a = corridor_places_key(
            "abc123",
            10.0,
            &[PlaceCategory::Fuel, PlaceCategory::Camp],
            50,
            "v1",
        );
        let b = corridor_places_key(
            "abc123",
            10.0,
            &[PlaceCategory::Camp, PlaceCategory::Fuel],
            50,
            "v1",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn corridor_places_key_changes_with_buffer_km() {
        let a = corridor_places_key("abc123", 10.0, &[], 50, "v1");
        let b = corridor_places_key("abc123", 20.0, &[], 50, "v1");
        assert_ne!(a, b);
    }
}
