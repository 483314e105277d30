//! Tests for the bundle-service HTTP server's request/response shapes.
//!
//! The `server` module is private to the binary, same as the teacher's
//! ingester service — so these exercise serialization/deserialization of
//! the request/response JSON shapes rather than the handlers directly.

use serde_json::json;

#[test]
fn build_bundle_request_deserializes_minimal() {
    let body = json!({
        "plan_id": "plan-1",
        "nav_request": {
            "stops": [
                {"type": "start", "lat": -27.4698, "lng": 153.0251},
                {"type": "end", "lat": -28.0167, "lng": 153.4000}
            ]
        }
    });

    let value: serde_json::Value = serde_json::from_value(body).unwrap();
    assert_eq!(value["plan_id"], "plan-1");
    assert_eq!(value["nav_request"]["stops"].as_array().unwrap().len(), 2);
}

#[test]
fn build_bundle_request_deserializes_with_overrides() {
    let body = json!({
        "plan_id": "plan-2",
        "nav_request": {
            "profile": "drive",
            "stops": [
                {"type": "start", "lat": -27.4698, "lng": 153.0251},
                {"type": "end", "lat": -28.0167, "lng": 153.4000}
            ]
        },
        "categories": ["fuel", "food"],
        "buffer_m": 20000,
        "max_edges": 100000
    });

    let value: serde_json::Value = serde_json::from_value(body).unwrap();
    assert_eq!(value["buffer_m"], 20000);
    assert_eq!(value["categories"][0], "fuel");
}

#[test]
fn build_bundle_response_serializes_success() {
    let response = json!({
        "success": true,
        "plan_id": "plan-1",
        "total_bytes": 4096,
        "message": "bundle built"
    });

    let text = serde_json::to_string(&response).unwrap();
    assert!(text.contains("\"success\":true"));
    assert!(text.contains("\"total_bytes\":4096"));
}

#[test]
fn build_bundle_response_serializes_failure() {
    let response = json!({
        "success": false,
        "plan_id": "plan-1",
        "total_bytes": 0,
        "message": "not found: bundle_missing"
    });

    let text = serde_json::to_string(&response).unwrap();
    assert!(text.contains("\"success\":false"));
    assert!(text.contains("bundle_missing"));
}
