//! Error taxonomy and shared constants.

use thiserror::Error;

/// Errors that can occur while reading, converting or writing HDR images.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The input is not a recognized container, or its structure is malformed.
    #[error("format error: {0}")]
    Format(String),

    /// Multi-Picture Format directory is malformed or truncated.
    #[error("MPF parsing error: {0}")]
    MpfParse(String),

    /// ISOBMFF box structure is malformed or truncated.
    #[error("box parsing error: {0}")]
    BoxParse(String),

    /// A required metadata field is absent or violates an invariant.
    #[error("invalid metadata: {0}")]
    Metadata(String),

    /// Unknown primaries or transfer function identifier.
    #[error("unsupported color space: {0}")]
    ColorSpace(String),

    /// Image dimensions are invalid (zero or too large).
    #[error("invalid image dimensions: {0}x{1}")]
    InvalidDimensions(u32, u32),

    /// Baseline and gain map shapes are incompatible.
    #[error("dimension mismatch: baseline is {base_w}x{base_h}, gain map is {gain_w}x{gain_h}")]
    DimensionMismatch {
        /// Baseline width.
        base_w: u32,
        /// Baseline height.
        base_h: u32,
        /// Gain map width.
        gain_w: u32,
        /// Gain map height.
        gain_h: u32,
    },

    /// Unregistered format identifier or invalid generator options.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input exceeds safety limits.
    #[error("input exceeds safety limit: {0}")]
    LimitExceeded(String),

    /// Pixel buffer does not match the declared shape.
    #[error("invalid pixel data: {0}")]
    InvalidPixelData(String),

    /// The external compressed-sample coder failed.
    #[error("sample coding error: {0}")]
    Coding(String),

    /// Writing the output stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unrecognized or structurally malformed container.
    Format,
    /// Missing or out-of-range metadata.
    Metadata,
    /// Unknown primaries/transfer identifier.
    ColorSpace,
    /// Incompatible image shapes.
    Dimension,
    /// Unregistered format or invalid options.
    Configuration,
    /// Failure reported by the external sample coder.
    Coding,
    /// Output stream failure.
    Io,
}

impl Error {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format(_)
            | Error::MpfParse(_)
            | Error::BoxParse(_)
            | Error::LimitExceeded(_)
            | Error::InvalidPixelData(_) => ErrorKind::Format,
            Error::Metadata(_) => ErrorKind::Metadata,
            Error::ColorSpace(_) => ErrorKind::ColorSpace,
            Error::InvalidDimensions(..) | Error::DimensionMismatch { .. } => ErrorKind::Dimension,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Coding(_) => ErrorKind::Coding,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type for hdrconv operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Reference display luminance values (in nits).
pub mod luminance {
    /// SDR reference white. The canonical rendering's 1.0.
    pub const SDR_WHITE_NITS: f32 = 203.0;

    /// Nominal peak of an HLG reference display.
    pub const HLG_PEAK_NITS: f32 = 1000.0;

    /// PQ peak luminance
    pub const PQ_PEAK_NITS: f32 = 10000.0;
}
