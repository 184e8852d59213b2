//! Color model: transfer functions, primaries, conversions and tone curves.

pub mod gamut;
pub mod tonemap;
pub mod transfer;

pub use gamut::*;
pub use tonemap::*;
pub use transfer::*;
