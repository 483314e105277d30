//! Elevation profile wrapper: route-polyline sampling, batched Open-Elevation
//! lookups, and grade-segment fuel-penalty computation.

pub mod elevation;

pub use elevation::{
    compute_grade_segments, fuel_factor_for_grade, ElevationClient, ElevationProfile,
    ElevationSample,
};
