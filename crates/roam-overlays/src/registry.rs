//! Australian state/territory detection from bounding boxes, used by both
//! the traffic and hazards fan-out to decide which per-state sources to
//! poll for a given query bbox.

use roam_common::contracts::BBox4;

/// Approximate state bounding boxes `(minLng, minLat, maxLng, maxLat)`.
/// Overlap at borders is intentional — better to query both NSW and QLD
/// for a border route than miss one.
const STATE_BOUNDS: &[(&str, f64, f64, f64, f64)] = &[
    ("qld", 137.5, -29.5, 154.5, -9.5),
    ("nsw", 140.5, -37.6, 154.0, -27.5),
    ("vic", 140.5, -39.3, 150.5, -33.5),
    ("sa", 128.5, -38.2, 141.5, -25.5),
    ("wa", 112.5, -35.2, 129.5, -13.5),
    ("nt", 128.5, -26.5, 138.5, -10.5),
    ("tas", 143.5, -43.8, 149.0, -39.3),
    ("act", 148.5, -36.0, 149.5, -35.0),
];

fn bbox_overlaps(a: (f64, f64, f64, f64), b: &BBox4) -> bool {
    !(a.2 < b.min_lng || a.0 > b.max_lng || a.3 < b.min_lat || a.1 > b.max_lat)
}

/// Sorted list of state/territory codes whose bounds overlap `bbox`.
pub fn states_for_bbox(bbox: &BBox4) -> Vec<&'static str> {
    let mut codes: Vec<&'static str> = STATE_BOUNDS
        .iter()
        .filter(|(_, min_lng, min_lat, max_lng, max_lat)| {
            bbox_overlaps((*min_lng, *min_lat, *max_lng, *max_lat), bbox)
        })
        .map(|(code, ..)| *code)
        .collect();
    codes.sort_unstable();
    codes
}

/// True if `bbox` spans most of Australia (a national-scale query).
pub fn bbox_covers_australia(bbox: &BBox4) -> bool {
    let lng_span = bbox.max_lng - bbox.min_lng;
    let lat_span = bbox.max_lat - bbox.min_lat;
    lng_span > 15.0 && lat_span > 10.0
}

/// Human-readable state name, falling back to the upper-cased code.
pub fn state_label(code: &str) -> String {
    match code {
        "qld" => "Queensland".to_string(),
        "nsw" => "New South Wales".to_string(),
        "vic" => "Victoria".to_string(),
        "sa" => "South Australia".to_string(),
        "wa" => "Western Australia".to_string(),
        "nt" => "Northern Territory".to_string(),
        "tas" => "Tasmania".to_string(),
        "act" => "Australian Capital Territory".to_string(),
        other => other.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_overlapping_border_states() {
        let bbox = BBox4::new(150.0, -34.0, 154.0, -27.0);
        assert_eq!(states_for_bbox(&bbox), vec!["nsw", "qld"]);
    }

    #[test]
    fn whole_continent_bbox_covers_australia() {
        let bbox = BBox4::new(112.0, -44.0, 154.0, -10.0);
        assert!(bbox_covers_australia(&bbox));
    }

    #[test]
    fn small_city_bbox_does_not_cover_australia() {
        let bbox = BBox4::new(153.0, -28.0, 153.1, -27.9);
        assert!(!bbox_covers_australia(&bbox));
    }

    #[test]
    fn unknown_code_falls_back_to_uppercase() {
        assert_eq!(state_label("xx"), "XX");
    }
}
