//! Stratum Core - Foundational Types
//!
//! Errors, build configuration, and the fully-resolved layer specifications
//! shared by the image store, the build cache, and the CLI.

pub mod config;
pub mod env;
pub mod error;
pub mod layer;
pub mod stratumfile;

// Re-export commonly used types
pub use config::BuildConfig;
pub use error::{Result, StratumError};
pub use layer::{BindMount, ImageSource, ImportSpec, Layer, SourceType};
pub use stratumfile::Stratumfile;

/// Stratum version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
