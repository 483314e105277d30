//! OSRM routing client: waypoint submission, maneuver/leg normalization,
//! and per-leg geometry stitching from step polylines.

use std::time::Duration;

use roam_common::contracts::{NavLeg, NavManeuver, NavRequest, NavRoute, NavStep};
use roam_common::error::{RoamError, RoamResult};
use roam_common::keying::route_key_from_request;
use roam_common::polyline6;
use roam_common::time::now_iso;
use serde_json::Value;

/// OSRM maneuver types we map 1:1. Anything else falls back to `"turn"`.
const KNOWN_MANEUVER_TYPES: &[&str] = &[
    "turn",
    "depart",
    "arrive",
    "merge",
    "fork",
    "on ramp",
    "off ramp",
    "roundabout",
    "rotary",
    "exit roundabout",
    "new name",
    "continue",
    "end of road",
    "notification",
];

/// OSRM modifiers we map 1:1. Anything else is dropped to `None`.
const KNOWN_MODIFIERS: &[&str] = &[
    "left",
    "right",
    "slight left",
    "slight right",
    "sharp left",
    "sharp right",
    "straight",
    "uturn",
];

/// Concatenate a step's worth of decoded points into one running sequence,
/// skipping each step's first point after the first step (the shared
/// junction with the previous step's last point).
fn concat_step_geometries(steps: &[NavStep]) -> String {
    let mut all_pts: Vec<(f64, f64)> = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        if step.polyline6.is_empty() {
            continue;
        }
        let pts = polyline6::decode(&step.polyline6);
        if i == 0 {
            all_pts.extend(pts);
        } else if !pts.is_empty() {
            all_pts.extend_from_slice(&pts[1..]);
        }
    }
    if all_pts.is_empty() {
        String::new()
    } else {
        polyline6::encode(&all_pts)
    }
}

fn parse_maneuver(raw: Option<&Value>) -> NavManeuver {
    let empty = Value::Null;
    let raw = raw.unwrap_or(&empty);

    let raw_type = raw.get("type").and_then(Value::as_str).unwrap_or("turn");
    let r#type = if KNOWN_MANEUVER_TYPES.contains(&raw_type) {
        raw_type
    } else {
        "turn"
    }
    .to_string();

    let modifier = raw
        .get("modifier")
        .and_then(Value::as_str)
        .filter(|m| KNOWN_MODIFIERS.contains(m))
        .map(str::to_string);

    let loc = raw.get("location").and_then(Value::as_array);
    let location = match loc {
        Some(l) if l.len() >= 2 => [
            l[0].as_f64().unwrap_or(0.0),
            l[1].as_f64().unwrap_or(0.0),
        ],
        _ => [0.0, 0.0],
    };

    NavManeuver {
        r#type,
        modifier,
        location,
        instruction: None,
    }
}

fn parse_step(osrm_step: &Value) -> NavStep {
    NavStep {
        maneuver: parse_maneuver(osrm_step.get("maneuver")),
        distance_m: osrm_step.get("distance").and_then(Value::as_f64).unwrap_or(0.0),
        duration_s: osrm_step.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
        polyline6: osrm_step
            .get("geometry")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        name: osrm_step
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

fn parse_osrm_leg(osrm_leg: &Value) -> NavLeg {
    let steps: Vec<NavStep> = osrm_leg
        .get("steps")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(parse_step).collect())
        .unwrap_or_default();

    NavLeg {
        distance_m: osrm_leg
            .get("distance")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .round(),
        duration_s: osrm_leg
            .get("duration")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .round(),
        steps,
    }
}

/// Thin client over a running OSRM instance.
pub struct OsrmClient {
    base_url: String,
    profile: String,
    algo_version: String,
    http: reqwest::Client,
}

impl OsrmClient {
    pub fn new(base_url: &str, profile: &str, algo_version: &str, timeout_s: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            profile: profile.to_string(),
            algo_version: algo_version.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_s))
                .build()
                .expect("reqwest client build"),
        }
    }

    /// Submits `req`'s waypoints to OSRM and returns the assembled route.
    /// `ascent_m`/`descent_m`/`grade_segments` are left unset — the
    /// elevation wrapper fills those in afterward.
    pub async fn route(&self, req: &NavRequest) -> RoamResult<NavRoute> {
        if req.stops.len() < 2 {
            return Err(RoamError::BadRequest(
                "bad_nav_request: stops must contain at least 2 points".to_string(),
            ));
        }

        let coords = req
            .stops
            .iter()
            .map(|s| format!("{},{}", s.lng, s.lat))
            .collect::<Vec<_>>()
            .join(";");

        let url = format!("{}/route/v1/{}/{coords}", self.base_url, self.profile);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("overview", "full"),
                ("geometries", "polyline6"),
                ("steps", "true"),
                ("annotations", "distance,duration,speed"),
                ("alternatives", "false"),
            ])
            .send()
            .await
            .map_err(|e| RoamError::ServiceUnavailable(format!("osrm_unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let truncated = &body[..body.len().min(500)];
            return Err(RoamError::ServiceUnavailable(format!(
                "osrm_error: OSRM returned {status}: {truncated}"
            )));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| RoamError::ServiceUnavailable(format!("osrm_bad_body: {e}")))?;

        let routes = data.get("routes").and_then(Value::as_array);
        let best = routes
            .and_then(|r| r.first())
            .ok_or_else(|| RoamError::ServiceUnavailable("osrm_no_routes: OSRM returned no routes".to_string()))?;

        let legs_out: Vec<NavLeg> = best
            .get("legs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(parse_osrm_leg).collect())
            .unwrap_or_default();

        // Rebuild the whole-route geometry from stitched step polylines —
        // more accurate than OSRM's generalized overview geometry.
        let all_steps: Vec<NavStep> = legs_out.iter().flat_map(|l| l.steps.clone()).collect();
        let stitched = concat_step_geometries(&all_steps);
        let route_poly6 = if stitched.is_empty() {
            best.get("geometry")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        } else {
            stitched
        };
        if route_poly6.is_empty() {
            return Err(RoamError::ServiceUnavailable(
                "osrm_bad_geometry: OSRM returned empty geometry".to_string(),
            ));
        }

        let dist_m = best.get("distance").and_then(Value::as_f64).unwrap_or(0.0).round();
        let dur_s = best.get("duration").and_then(Value::as_f64).unwrap_or(0.0).round();

        Ok(NavRoute {
            route_key: route_key_from_request(req, &self.algo_version),
            profile: req.profile.clone(),
            distance_m: dist_m,
            duration_s: dur_s,
            polyline6: route_poly6,
            legs: legs_out,
            ascent_m: None,
            descent_m: None,
            grade_segments: Vec::new(),
            algo_version: self.algo_version.clone(),
            created_at: now_iso(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roam_common::contracts::TripStop;
    use serde_json::json;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_request() -> NavRequest {
        NavRequest {
            profile: "drive".to_string(),
            prefs: json!({}),
            stops: vec![
                TripStop {
                    id: Some("start".to_string()),
                    r#type: "start".to_string(),
                    lat: -27.4698,
                    lng: 153.0251,
                    name: None,
                },
                TripStop {
                    id: Some("end".to_string()),
                    r#type: "end".to_string(),
                    lat: -28.0167,
                    lng: 153.4000,
                    name: None,
                },
            ],
            avoid: vec![],
            depart_at: None,
        }
    }

    #[test]
    fn unknown_maneuver_type_coerces_to_turn() {
        let m = parse_maneuver(Some(&json!({"type": "weird_new_thing", "location": [153.0, -27.0]})));
        assert_eq!(m.r#type, "turn");
        assert_eq!(m.location, [153.0, -27.0]);
    }

    #[test]
    fn unknown_modifier_drops_to_none() {
        let m = parse_maneuver(Some(&json!({"type": "turn", "modifier": "backflip"})));
        assert!(m.modifier.is_none());
    }

    #[test]
    fn known_modifier_is_preserved() {
        let m = parse_maneuver(Some(&json!({"type": "turn", "modifier": "slight left"})));
        assert_eq!(m.modifier.as_deref(), Some("slight left"));
    }

    #[test]
    fn leg_geometry_stitches_steps_dropping_shared_junction() {
        let p1 = polyline6::encode(&[(-27.0, 153.0), (-27.1, 153.1)]);
        let p2 = polyline6::encode(&[(-27.1, 153.1), (-27.2, 153.2)]);
        let steps = vec![
            NavStep {
                maneuver: parse_maneuver(None),
                distance_m: 100.0,
                duration_s: 10.0,
                polyline6: p1,
                name: None,
            },
            NavStep {
                maneuver: parse_maneuver(None),
                distance_m: 100.0,
                duration_s: 10.0,
                polyline6: p2,
                name: None,
            },
        ];
        let stitched = concat_step_geometries(&steps);
        let pts = polyline6::decode(&stitched);
        assert_eq!(pts.len(), 3);
    }

    #[tokio::test]
    async fn route_rejects_single_stop_request() {
        let client = OsrmClient::new("http://127.0.0.1:1", "driving", "navpack.v1", 5);
        let mut req = sample_request();
        req.stops.truncate(1);
        let err = client.route(&req).await.unwrap_err();
        assert!(err.to_string().contains("bad_nav_request"));
    }

    #[tokio::test]
    async fn route_parses_osrm_response_into_nav_route() {
        let server = MockServer::start().await;
        let step_poly = polyline6::encode(&[(-27.4698, 153.0251), (-28.0167, 153.4000)]);
        let osrm_body = json!({
            "routes": [{
                "distance": 64000.4,
                "duration": 3600.2,
                "geometry": step_poly,
                "legs": [{
                    "distance": 64000.4,
                    "duration": 3600.2,
                    "steps": [{
                        "distance": 64000.4,
                        "duration": 3600.2,
                        "geometry": step_poly,
                        "name": "Pacific Motorway",
                        "maneuver": {
                            "type": "depart",
                            "location": [153.0251, -27.4698],
                            "bearing_before": 0,
                            "bearing_after": 90
                        }
                    }]
                }]
            }]
        });

        Mock::given(method("GET"))
            .and(path_regex(r"^/route/v1/driving/.*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(osrm_body))
            .mount(&server)
            .await;

        let client = OsrmClient::new(&server.uri(), "driving", "navpack.v1", 5);
        let route = client.route(&sample_request()).await.unwrap();
        assert_eq!(route.legs.len(), 1);
        assert_eq!(route.legs[0].steps.len(), 1);
        assert_eq!(route.legs[0].steps[0].maneuver.r#type, "depart");
        assert!(route.distance_m > 0.0);
        assert!(!route.polyline6.is_empty());
    }
}
