//! Layer builds.
//!
//! - `BuildDriver`: cache-aware build of layers in dependency order
//! - `ContainerRuntime`: where build commands actually run
//! - `create_layer_from_dir`: packages a built rootfs as a layer blob

pub mod driver;
pub mod import;
pub mod layer;
pub mod runtime;

pub use driver::{BuildDriver, BuildOutcome};
pub use import::{copy_tree, grab};
pub use layer::{create_layer_from_dir, LayerCompression};
pub use runtime::{ChrootRuntime, Container, ContainerRuntime, IMPORT_MOUNT};
