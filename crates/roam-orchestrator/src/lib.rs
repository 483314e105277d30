//! Composes the corridor, POI, overlay, routing, elevation, and bundle
//! layers into one end-to-end bundle build for a plan. No retries at this
//! layer — each composed dependency owns its own resilience.

pub mod orchestrator;

pub use orchestrator::{BundleBuildRequest, BundleOrchestrator};
