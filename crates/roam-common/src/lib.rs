//! Shared types, keying, codec, geometry, config and error handling for
//! the roam corridor engine.

pub mod canon;
pub mod config;
pub mod contracts;
pub mod error;
pub mod geo;
pub mod keying;
pub mod polyline6;
pub mod time;

pub use config::RoamConfig;
pub use contracts::*;
pub use error::{RoamError, RoamResult};
