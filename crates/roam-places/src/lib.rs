//! Three-tier point-of-interest search: deterministic pack cache, local
//! canonical store, shared remote pool, and Overpass top-up (tiled or
//! corridor-shaped).

pub mod engine;
pub mod overpass;
pub mod remote_pool;

pub use engine::{PlacesEngine, PlacesEngineConfig};
pub use overpass::OverpassClient;
pub use remote_pool::{PostgrestPlacesPool, RemotePlacesPool};
