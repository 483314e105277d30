//! Google-style polyline codec at 1e6 (Polyline6) precision.
//!
//! Coordinates are `(lat, lng)` pairs, encoded as a signed zigzag delta
//! chain of 5-bit chunks. This must stay byte-identical to every other
//! implementation that shares the same corridor/route packs, so the
//! algorithm is not "improved" — it is the canonical Google polyline
//! algorithm at 1e-6 degree precision.

const PRECISION: f64 = 1_000_000.0;

fn encode_value(out: &mut String, v: i64) {
    let mut v = if v < 0 { !(v << 1) } else { v << 1 };
    while v >= 0x20 {
        let chunk = ((0x20 | (v & 0x1F)) + 63) as u8;
        out.push(chunk as char);
        v >>= 5;
    }
    out.push((v as u8 + 63) as char);
}

/// Encode a sequence of `(lat, lng)` points into a Polyline6 string.
pub fn encode(coords: &[(f64, f64)]) -> String {
    let mut last_lat: i64 = 0;
    let mut last_lng: i64 = 0;
    let mut out = String::with_capacity(coords.len() * 8);
    for &(lat, lng) in coords {
        let ilat = (lat * PRECISION).round() as i64;
        let ilng = (lng * PRECISION).round() as i64;
        encode_value(&mut out, ilat - last_lat);
        encode_value(&mut out, ilng - last_lng);
        last_lat = ilat;
        last_lng = ilng;
    }
    out
}

fn decode_value(bytes: &[u8], idx: &mut usize) -> i64 {
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let b = bytes[*idx] as i64 - 63;
        *idx += 1;
        result |= (b & 0x1F) << shift;
        shift += 5;
        if b < 0x20 {
            break;
        }
    }
    if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    }
}

/// Decode a Polyline6 string back into `(lat, lng)` points.
pub fn decode(poly: &str) -> Vec<(f64, f64)> {
    let bytes = poly.as_bytes();
    let mut idx = 0usize;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;
    let mut coords = Vec::new();
    while idx < bytes.len() {
        lat += decode_value(bytes, &mut idx);
        lng += decode_value(bytes, &mut idx);
        coords.push((lat as f64 / PRECISION, lng as f64 / PRECISION));
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_precision() {
        let coords = vec![
            (-27.470125, 153.021072),
            (-27.471800, 153.023400),
            (-27.499999, 153.100001),
        ];
        let encoded = encode(&coords);
        let decoded = decode(&encoded);
        assert_eq!(decoded.len(), coords.len());
        for ((a_lat, a_lng), (b_lat, b_lng)) in coords.iter().zip(decoded.iter()) {
            assert!((a_lat - b_lat).abs() < 1e-6);
            assert!((a_lng - b_lng).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_input_encodes_empty() {
        assert_eq!(encode(&[]), "");
        assert!(decode("").is_empty());
    }

    #[test]
    fn negative_deltas_round_trip() {
        let coords = vec![(10.0, 10.0), (9.5, 9.5), (-5.123456, -5.654321)];
        let decoded = decode(&encode(&coords));
        for ((a_lat, a_lng), (b_lat, b_lng)) in coords.iter().zip(decoded.iter()) {
            assert!((a_lat - b_lat).abs() < 1e-6);
            assert!((a_lng - b_lng).abs() < 1e-6);
        }
    }

    #[test]
    fn known_vector_matches_google_example() {
        // The canonical Google polyline algorithm example, reused here at
        // 1e6 precision since the bit-twiddling is the same.
        let coords = vec![(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        let encoded = encode(&coords);
        let decoded = decode(&encoded);
        assert_eq!(decoded.len(), 3);
        assert!((decoded[0].0 - 38.5).abs() < 1e-6);
        assert!((decoded[2].1 - (-126.453)).abs() < 1e-6);
    }
}
