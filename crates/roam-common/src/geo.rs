//! Great-circle geometry helpers shared by the corridor, places, and
//! elevation components: haversine distance, bearing, destination point,
//! and fixed-interval polyline sampling.

const EARTH_RADIUS_KM: f64 = 6371.0;
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two `(lat, lng)` points, in meters.
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lng1) = a;
    let (lat2, lng2) = b;
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing in radians from point `a` to point `b`, `(lat, lng)` order.
pub fn bearing_rad(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.0.to_radians();
    let lat2 = b.0.to_radians();
    let dlng = (b.1 - a.1).to_radians();

    let x = dlng.cos() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    y.atan2(x)
}

/// Destination point `distance_km` along `bearing_rad` from `origin`, `(lat, lng)` order.
pub fn destination_point(origin: (f64, f64), bearing_rad: f64, distance_km: f64) -> (f64, f64) {
    let lat_rad = origin.0.to_radians();
    let lng_rad = origin.1.to_radians();
    let angular_dist = distance_km / EARTH_RADIUS_KM;

    let lat2 = (lat_rad.sin() * angular_dist.cos()
        + lat_rad.cos() * angular_dist.sin() * bearing_rad.cos())
    .asin();
    let lng2 = lng_rad
        + (bearing_rad.sin() * angular_dist.sin() * lat_rad.cos())
            .atan2(angular_dist.cos() - lat_rad.sin() * lat2.sin());

    (lat2.to_degrees(), lng2.to_degrees())
}

/// One sample point along a polyline, at a fixed cumulative-distance interval.
#[derive(Debug, Clone, Copy)]
pub struct PolylineSample {
    pub idx: usize,
    pub lat: f64,
    pub lng: f64,
    pub km_from_start: f64,
}

/// Sample `points` (a decoded polyline) every `interval_km`, always
/// including the first point. Used by both the POI corridor top-up and
/// the elevation wrapper so the two share one sampling cadence.
pub fn sample_polyline(points: &[(f64, f64)], interval_km: f64) -> Vec<PolylineSample> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut samples = vec![PolylineSample {
        idx: 0,
        lat: points[0].0,
        lng: points[0].1,
        km_from_start: 0.0,
    }];

    let mut cum_km = 0.0;
    let mut next_target = interval_km;
    for i in 1..points.len() {
        let seg_km = haversine_m(points[i - 1], points[i]) / 1000.0;
        let seg_start_km = cum_km;
        cum_km += seg_km;

        while next_target <= cum_km && seg_km > 0.0 {
            let t = (next_target - seg_start_km) / seg_km;
            let lat = points[i - 1].0 + (points[i].0 - points[i - 1].0) * t;
            let lng = points[i - 1].1 + (points[i].1 - points[i - 1].1) * t;
            samples.push(PolylineSample {
                idx: samples.len(),
                lat,
                lng,
                km_from_start: next_target,
            });
            next_target += interval_km;
        }
    }

    samples
}

/// Expand a single `(lat, lng)` buffer distance in meters into a bbox,
/// accounting for longitude compression at latitude. Matches the corridor
/// extractor's degree-per-meter approximation.
pub fn buffer_to_bbox(center: (f64, f64), buffer_m: f64) -> (f64, f64) {
    let dlat = buffer_m / 111_320.0;
    let cos_lat = center.0.to_radians().cos().max(0.2);
    let dlng = buffer_m / (111_320.0 * cos_lat);
    (dlat, dlng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_identical_points() {
        assert!(haversine_m((-27.4, 153.0), (-27.4, 153.0)) < 1e-6);
    }

    #[test]
    fn haversine_known_distance_brisbane_sydney() {
        // Approximately 730km great-circle.
        let d = haversine_m((-27.4698, 153.0251), (-33.8688, 151.2093)) / 1000.0;
        assert!((d - 730.0).abs() < 30.0, "distance was {d}km");
    }

    #[test]
    fn destination_point_round_trips_bearing_and_distance() {
        let origin = (-27.0, 153.0);
        let dest = destination_point(origin, 0.0_f64.to_radians(), 10.0);
        let d = haversine_m(origin, dest) / 1000.0;
        assert!((d - 10.0).abs() < 0.05);
        assert!(dest.0 > origin.0); // bearing 0 = due north
    }

    #[test]
    fn sample_polyline_includes_first_point_and_respects_interval() {
        let points: Vec<(f64, f64)> = (0..20)
            .map(|i| (-27.0 - i as f64 * 0.01, 153.0))
            .collect();
        let samples = sample_polyline(&points, 5.0);
        assert_eq!(samples[0].km_from_start, 0.0);
        for w in samples.windows(2) {
            assert!(w[1].km_from_start > w[0].km_from_start);
        }
    }

    #[test]
    fn buffer_floor_prevents_longitude_blowup_near_poles() {
        let (_, dlng) = buffer_to_bbox((-89.9, 0.0), 15_000.0);
        let (_, dlng_eq) = buffer_to_bbox((0.0, 0.0), 15_000.0);
        // cos floor of 0.2 caps dlng at 5x the equatorial value.
        assert!(dlng <= dlng_eq * 5.0 + 1e-9);
    }
}
