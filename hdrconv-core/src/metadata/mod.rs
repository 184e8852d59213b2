//! Metadata records: ISO gain map block, Apple headroom, and XMP primitives.

pub mod apple;
pub mod gainmap;
pub mod xmp;

pub use apple::AppleHeadroomMetadata;
pub use gainmap::GainmapMetadata;
