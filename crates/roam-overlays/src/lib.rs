//! State-aware traffic and hazard overlay fan-out: per-state source
//! registry, QLD's official full/delta merge cache, CAP-AU XML parsing,
//! and composite hazard priority scoring.

pub mod hazards;
pub mod registry;
pub mod traffic;

pub use hazards::{certainty_score, effective_priority, severity_score, urgency_score, HazardsEngine};
pub use registry::{bbox_covers_australia, state_label, states_for_bbox};
pub use traffic::TrafficEngine;
