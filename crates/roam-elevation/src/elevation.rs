//! Elevation sampling, batched Open-Elevation lookups, and grade-segment
//! fuel-penalty computation.

use std::time::Duration;

use roam_common::contracts::GradeSegment;
use roam_common::error::{RoamError, RoamResult};
use roam_common::geo::{haversine_m, sample_polyline, PolylineSample};
use roam_common::polyline6;
use serde_json::{json, Value};

fn round_to(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}

/// One elevation-tagged point along a route.
#[derive(Debug, Clone, Copy)]
pub struct ElevationSample {
    pub km_along: f64,
    pub elevation_m: f64,
    pub lat: f64,
    pub lng: f64,
}

/// The full elevation profile for one route geometry.
#[derive(Debug, Clone)]
pub struct ElevationProfile {
    pub samples: Vec<ElevationSample>,
    pub min_elevation_m: f64,
    pub max_elevation_m: f64,
    pub total_ascent_m: f64,
    pub total_descent_m: f64,
}

/// Fuel-penalty lookup by grade percentage, steep downhill to steep uphill.
const GRADE_FUEL_FACTORS: &[(f64, f64, f64)] = &[
    (-100.0, -5.0, 0.85),
    (-5.0, -2.0, 0.90),
    (-2.0, 2.0, 1.00),
    (2.0, 5.0, 1.15),
    (5.0, 100.0, 1.35),
];

pub fn fuel_factor_for_grade(grade_pct: f64) -> f64 {
    for &(lo, hi, factor) in GRADE_FUEL_FACTORS {
        if grade_pct >= lo && grade_pct < hi {
            return factor;
        }
    }
    1.0
}

fn interp_elevation(samples: &[ElevationSample], km: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    if km <= samples[0].km_along {
        return samples[0].elevation_m;
    }
    if km >= samples[samples.len() - 1].km_along {
        return samples[samples.len() - 1].elevation_m;
    }
    for w in samples.windows(2) {
        if w[1].km_along >= km {
            let span = w[1].km_along - w[0].km_along;
            if span < 1e-6 {
                return w[1].elevation_m;
            }
            let frac = (km - w[0].km_along) / span;
            return w[0].elevation_m + (w[1].elevation_m - w[0].elevation_m) * frac;
        }
    }
    samples[samples.len() - 1].elevation_m
}

/// Divide an elevation profile into fixed-length segments, each tagged with
/// its average grade and a fuel-penalty multiplier.
pub fn compute_grade_segments(
    profile: &ElevationProfile,
    segment_length_km: f64,
) -> Vec<GradeSegment> {
    let samples = &profile.samples;
    if samples.len() < 2 {
        return Vec::new();
    }
    let total_km = samples[samples.len() - 1].km_along;
    let mut segments = Vec::new();
    let mut seg_start_km = 0.0;

    while seg_start_km < total_km {
        let seg_end_km = (seg_start_km + segment_length_km).min(total_km);
        let start_elev = interp_elevation(samples, seg_start_km);
        let end_elev = interp_elevation(samples, seg_end_km);
        let dist_km = seg_end_km - seg_start_km;
        let elev_change = end_elev - start_elev;
        let grade_pct = if dist_km > 0.01 {
            (elev_change / (dist_km * 1000.0)) * 100.0
        } else {
            0.0
        };

        segments.push(GradeSegment {
            start_km: round_to(seg_start_km, 2),
            end_km: round_to(seg_end_km, 2),
            grade_pct: round_to(grade_pct, 2),
            fuel_factor: fuel_factor_for_grade(grade_pct),
        });

        seg_start_km = seg_end_km;
    }

    segments
}

/// Samples `points` every `interval_m`, always including the last point
/// even if it doesn't land on an exact interval crossing.
fn sample_for_elevation(points: &[(f64, f64)], interval_m: f64) -> Vec<PolylineSample> {
    let mut samples = sample_polyline(points, interval_m / 1000.0);
    let last = points[points.len() - 1];
    let needs_last = match samples.last() {
        Some(s) => (s.lat - last.0).abs() > 1e-7 || (s.lng - last.1).abs() > 1e-7,
        None => true,
    };
    if needs_last {
        let total_km: f64 = points
            .windows(2)
            .map(|w| haversine_m(w[0], w[1]) / 1000.0)
            .sum();
        samples.push(PolylineSample {
            idx: samples.len(),
            lat: last.0,
            lng: last.1,
            km_from_start: total_km,
        });
    }
    samples
}

/// Thin batching client over the Open-Elevation lookup API.
pub struct ElevationClient {
    base_url: String,
    http: reqwest::Client,
    batch_size: usize,
}

impl ElevationClient {
    pub fn new(base_url: &str, timeout_s: u64, batch_size: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_s))
                .build()
                .expect("reqwest client build"),
            batch_size: batch_size.max(1) as usize,
        }
    }

    /// Builds a full elevation profile from a polyline6 geometry.
    pub async fn profile(
        &self,
        geometry: &str,
        sample_interval_m: f64,
    ) -> RoamResult<ElevationProfile> {
        let pts = polyline6::decode(geometry);
        if pts.len() < 2 {
            return Err(RoamError::ServiceUnavailable(
                "elevation_bad_geometry: Need at least 2 points".to_string(),
            ));
        }

        let sample_coords = sample_for_elevation(&pts, sample_interval_m);
        if sample_coords.is_empty() {
            return Err(RoamError::ServiceUnavailable(
                "elevation_no_samples: Failed to sample route".to_string(),
            ));
        }

        let latlngs: Vec<(f64, f64)> = sample_coords.iter().map(|s| (s.lat, s.lng)).collect();
        let elevations = self.fetch_elevations(&latlngs).await?;

        let samples: Vec<ElevationSample> = sample_coords
            .iter()
            .zip(elevations.iter())
            .map(|(s, e)| ElevationSample {
                km_along: round_to(s.km_from_start, 2),
                elevation_m: round_to(*e, 1),
                lat: round_to(s.lat, 6),
                lng: round_to(s.lng, 6),
            })
            .collect();

        let elev_values: Vec<f64> = samples.iter().map(|s| s.elevation_m).collect();
        let mut total_ascent = 0.0;
        let mut total_descent = 0.0;
        for w in elev_values.windows(2) {
            let diff = w[1] - w[0];
            if diff > 0.0 {
                total_ascent += diff;
            } else {
                total_descent += diff.abs();
            }
        }

        let min_elevation = elev_values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_elevation = elev_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Ok(ElevationProfile {
            samples,
            min_elevation_m: round_to(min_elevation, 1),
            max_elevation_m: round_to(max_elevation, 1),
            total_ascent_m: round_to(total_ascent, 1),
            total_descent_m: round_to(total_descent, 1),
        })
    }

    async fn fetch_elevations(&self, latlngs: &[(f64, f64)]) -> RoamResult<Vec<f64>> {
        let mut all_elevations = Vec::with_capacity(latlngs.len());

        for batch in latlngs.chunks(self.batch_size) {
            let locations: Vec<Value> = batch
                .iter()
                .map(|(lat, lng)| {
                    json!({"latitude": round_to(*lat, 6), "longitude": round_to(*lng, 6)})
                })
                .collect();

            let resp = self
                .http
                .post(format!("{}/api/v1/lookup", self.base_url))
                .json(&json!({"locations": locations}))
                .send()
                .await
                .map_err(|e| {
                    RoamError::ServiceUnavailable(format!(
                        "elevation_api_unreachable: Open-Elevation request failed: {e}"
                    ))
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let truncated = &body[..body.len().min(300)];
                return Err(RoamError::ServiceUnavailable(format!(
                    "elevation_api_error: Open-Elevation returned {status}: {truncated}"
                )));
            }

            let data: Value = resp.json().await.map_err(|e| {
                RoamError::ServiceUnavailable(format!("elevation_bad_body: {e}"))
            })?;
            let results = data
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if results.len() != batch.len() {
                return Err(RoamError::ServiceUnavailable(format!(
                    "elevation_api_mismatch: Expected {} results, got {}",
                    batch.len(),
                    results.len()
                )));
            }

            for r in &results {
                let elev = r.get("elevation").and_then(Value::as_f64).unwrap_or(0.0);
                all_elevations.push(elev);
            }
        }

        Ok(all_elevations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn fuel_factor_covers_every_band() {
        assert_eq!(fuel_factor_for_grade(-8.0), 0.85);
        assert_eq!(fuel_factor_for_grade(-3.0), 0.90);
        assert_eq!(fuel_factor_for_grade(0.0), 1.00);
        assert_eq!(fuel_factor_for_grade(3.0), 1.15);
        assert_eq!(fuel_factor_for_grade(8.0), 1.35);
    }

    #[test]
    fn sample_for_elevation_always_includes_last_point() {
        let pts: Vec<(f64, f64)> = (0..5).map(|i| (-27.0 - i as f64 * 0.01, 153.0)).collect();
        let samples = sample_for_elevation(&pts, 50_000.0);
        let last = samples.last().unwrap();
        assert!((last.lat - pts[pts.len() - 1].0).abs() < 1e-7);
    }

    #[test]
    fn grade_segments_empty_for_single_sample() {
        let profile = ElevationProfile {
            samples: vec![ElevationSample {
                km_along: 0.0,
                elevation_m: 10.0,
                lat: -27.0,
                lng: 153.0,
            }],
            min_elevation_m: 10.0,
            max_elevation_m: 10.0,
            total_ascent_m: 0.0,
            total_descent_m: 0.0,
        };
        assert!(compute_grade_segments(&profile, 5.0).is_empty());
    }

    #[test]
    fn grade_segments_flag_steep_uphill() {
        let profile = ElevationProfile {
            samples: vec![
                ElevationSample { km_along: 0.0, elevation_m: 0.0, lat: -27.0, lng: 153.0 },
                ElevationSample { km_along: 5.0, elevation_m: 500.0, lat: -27.1, lng: 153.0 },
            ],
            min_elevation_m: 0.0,
            max_elevation_m: 500.0,
            total_ascent_m: 500.0,
            total_descent_m: 0.0,
        };
        let segments = compute_grade_segments(&profile, 5.0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].fuel_factor, 1.35);
        assert!(segments[0].grade_pct > 5.0);
    }

    #[tokio::test]
    async fn profile_rejects_degenerate_geometry() {
        let client = ElevationClient::new("http://127.0.0.1:1", 5, 200);
        let single_point = polyline6::encode(&[(-27.0, 153.0)]);
        let err = client.profile(&single_point, 200.0).await.unwrap_err();
        assert!(err.to_string().contains("elevation_bad_geometry"));
    }

    #[tokio::test]
    async fn profile_computes_ascent_and_descent_from_mock_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/lookup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"latitude": -27.0, "longitude": 153.0, "elevation": 10.0},
                    {"latitude": -27.05, "longitude": 153.0, "elevation": 60.0},
                    {"latitude": -27.1, "longitude": 153.0, "elevation": 20.0},
                ]
            })))
            .mount(&server)
            .await;

        let client = ElevationClient::new(&server.uri(), 5, 200);
        let geometry = polyline6::encode(&[(-27.0, 153.0), (-27.05, 153.0), (-27.1, 153.0)]);
        let profile = client.profile(&geometry, 100.0).await.unwrap();

        assert!(profile.total_ascent_m > 0.0);
        assert!(profile.total_descent_m > 0.0);
        assert_eq!(profile.min_elevation_m, 10.0);
        assert_eq!(profile.max_elevation_m, 60.0);
    }
}
