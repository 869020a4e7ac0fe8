//! Image backend trait and shared types.
//!
//! [`BackendImage`] is the only view this crate has of a decoded image: a
//! handle that answers dimension and metadata queries and derives new
//! handles (region extraction, vertical joins, resizes, line caches). Handles
//! are never mutated by the read-side functions in [`metadata`](crate::metadata)
//! or [`position`](super::position); the derive operations always return a
//! fresh handle.
//!
//! Long-running pixel work happens in [`BackendImage::evaluate`]. While it
//! runs, the backend calls every handler registered with
//! [`BackendImage::on_eval`] with a [`Progress`] report and an [`EvalSink`]
//! through which the handler can kill the evaluation and record an error.
//! Handlers are delivered serially per handle.
//!
//! The production implementation is
//! [`RasterImage`](super::raster::RasterImage), built on the `image` crate.

use crate::format::Output;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode image: {0}")]
    Encode(String),
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("{0}")]
    Killed(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Well-known metadata tag names.
pub mod tags {
    pub const ICC_PROFILE: &str = "icc-profile-data";
    pub const ORIENTATION: &str = "orientation";
    pub const N_PAGES: &str = "n-pages";
    pub const PAGE_HEIGHT: &str = "page-height";
    pub const CHROMA_SUBSAMPLE: &str = "jpeg-chroma-subsample";
    pub const INTERLACED: &str = "interlaced";
    pub const PALETTE_BIT_DEPTH: &str = "palette-bit-depth";
    pub const LOOP: &str = "loop";
    pub const DELAY: &str = "delay";
    pub const HEIF_PRIMARY: &str = "heif-primary";
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Int(i32),
    Double(f64),
    Str(String),
    IntArray(Vec<i32>),
    Blob(Vec<u8>),
}

impl TagValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            TagValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            TagValue::IntArray(v) => Some(v),
            _ => None,
        }
    }
}

/// How pixel values should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    Srgb,
    BW,
    Rgb16,
    Grey16,
    Cmyk,
    Multiband,
}

impl Interpretation {
    /// Short lowercase name used in the descriptive document.
    pub fn nick(self) -> &'static str {
        match self {
            Interpretation::Srgb => "srgb",
            Interpretation::BW => "b-w",
            Interpretation::Rgb16 => "rgb16",
            Interpretation::Grey16 => "grey16",
            Interpretation::Cmyk => "cmyk",
            Interpretation::Multiband => "multiband",
        }
    }
}

/// Storage format of one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandFormat {
    Uchar,
    Ushort,
    Float,
}

impl BandFormat {
    pub fn nick(self) -> &'static str {
        match self {
            BandFormat::Uchar => "uchar",
            BandFormat::Ushort => "ushort",
            BandFormat::Float => "float",
        }
    }
}

/// Right-angle rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Angle {
    D0,
    D90,
    D180,
    D270,
}

/// Progress report delivered to evaluation handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Whole seconds since evaluation started.
    pub run: u64,
    /// Percent complete, 0-100.
    pub percent: u32,
}

/// Side channel handed to evaluation handlers.
pub trait EvalSink {
    /// Ask the backend to stop evaluating as soon as feasible.
    fn set_kill(&self);

    /// Record an error on the image's error channel.
    fn report_error(&self, message: String);
}

/// Callback invoked during evaluation.
pub type EvalHandler = Box<dyn FnMut(&Progress, &dyn EvalSink) + Send>;

/// A decoded image handle.
///
/// Dimensions are whole-image dimensions: a multi-page image is stored as a
/// "filmstrip" of pages stacked top to bottom, so `height()` is
/// `page_height() * n_pages`.
pub trait BackendImage: Sized {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn bands(&self) -> u32;
    fn interpretation(&self) -> Interpretation;
    fn band_format(&self) -> BandFormat;
    /// Horizontal resolution in pixels per millimetre. 1.0 when unknown.
    fn xres(&self) -> f64;
    fn has_alpha(&self) -> bool;
    /// Name of the load operation that produced this image, if any.
    fn loader(&self) -> Option<&str>;

    fn tag(&self, name: &str) -> Option<TagValue>;
    fn set_tag(&mut self, name: &str, value: TagValue);

    /// Height of one page. Equals `height()` for single-page images.
    fn page_height(&self) -> u32;

    fn extract_area(&self, left: u32, top: u32, width: u32, height: u32)
    -> Result<Self, BackendError>;

    /// Stack `pages` top to bottom in one column.
    fn join_vertical(pages: Vec<Self>) -> Result<Self, BackendError>;

    /// Insert a line cache of `tile_height` rows in front of this image.
    fn line_cache(&self, tile_height: u32) -> Result<Self, BackendError>;

    fn resize(&self, width: u32, height: u32) -> Result<Self, BackendError>;

    fn rotate(&self, angle: Angle) -> Result<Self, BackendError>;

    /// Register an evaluation progress handler. The handler lives exactly as
    /// long as this handle's evaluation state.
    fn on_eval(&self, handler: EvalHandler);

    fn is_killed(&self) -> bool;

    /// Compute all pixels, reporting progress to registered handlers.
    fn evaluate(&self) -> Result<Self, BackendError>;

    fn write_to_buffer(&self, output: Output, quality: u8) -> Result<Vec<u8>, BackendError>;
}
