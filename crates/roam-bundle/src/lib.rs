//! Sealed offline bundle assembly: manifest build with byte accounting, and
//! zip archive packaging of every pack a manifest references.

pub mod assembler;

pub use assembler::{BundleAssembler, BundleZip, ManifestRequest};
