//! Stratum Runtime - image store, build cache and layer builds.
//!
//! This crate provides the content-addressed OCI image layout that built
//! layers are stored in, the build cache that decides whether a layer has
//! to be rebuilt, and the driver that runs builds through a container
//! runtime.

#![allow(clippy::result_large_err)]

pub mod build;
pub mod cache;
pub mod oci;

// Re-export common types
pub use build::{BuildDriver, BuildOutcome, ChrootRuntime, ContainerRuntime, LayerCompression};
pub use cache::{BuildCache, CacheEntry, CachedOutput, LayerSpecs};
pub use oci::{BlobReader, BlobStore, ConfigGenerator, Digest, ImageLayout, ReferenceIndex};
pub use oci::{Blob, Descriptor, Manifest};
pub use oci::{IdMapping, MapOptions, TarUnpacker, Unpacker};

/// Stratum Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
