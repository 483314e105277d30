//! OSRM routing wrapper: waypoint submission, maneuver normalization, and
//! per-leg/whole-route geometry stitching.

pub mod osrm;

pub use osrm::OsrmClient;
