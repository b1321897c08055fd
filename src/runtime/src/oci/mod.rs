//! OCI image layout storage.
//!
//! A content-addressed blob store and a tag index over one on-disk OCI
//! image layout, plus manifest and config handling on top.

pub mod blob;
pub mod config;
pub mod digest;
pub mod dir;
pub mod layout;
pub mod refs;
pub mod types;
pub mod unpack;

pub use blob::{BlobReader, BlobStore};
pub use config::ConfigGenerator;
pub use digest::{Digest, Digester};
pub use layout::ImageLayout;
pub use refs::ReferenceIndex;
pub use types::{
    Blob, Descriptor, Index, Manifest, ANNOTATION_REF_NAME, MEDIA_TYPE_IMAGE_CONFIG,
    MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_LAYER_GZIP,
    MEDIA_TYPE_LAYER_TAR,
};
pub use unpack::{IdMapping, MapOptions, TarUnpacker, Unpacker};
