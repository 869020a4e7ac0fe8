//! Transformation pipeline.
//!
//! Runs one decoded image through the geometry and metadata layers and
//! produces either encoded pixels or the descriptive document:
//!
//! ```text
//! loader ─▶ ImageType ─▶ Output (saver check)
//!    │
//!    ▼
//! page selection ─▶ rotate ─▶ cover resize ─▶ gravity crop ─▶ line cache
//!                                               (per page)        │
//!                                                                 ▼
//!                                     deadline ─▶ encode  |  json description
//! ```
//!
//! Everything here is generic over [`BackendImage`], so the control flow is
//! tested against the recording mock and run for real against
//! [`RasterImage`].

use crate::config::{ServiceConfig, load_config};
use crate::format::{ImageType, Output, SaverMask, UnknownOutput, determine_image_type, to_output};
use crate::imaging::{
    Angle, BackendError, BackendImage, CropGeometry, Gravity, RasterImage, Rect, TagValue,
    crop_pages, setup_timeout_handler, tags,
};
use crate::metadata::{image_to_json, resolve_angle_rotation};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    UnknownFormat(#[from] UnknownOutput),
    #[error("Saving to {output} is disabled. Supported savers: {supported}")]
    SaverDisabled { output: Output, supported: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the caller asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformRequest {
    /// Target width; derived from the aspect ratio when only `height` is set.
    pub width: Option<u32>,
    /// Target height; derived from the aspect ratio when only `width` is set.
    pub height: Option<u32>,
    /// Crop anchor. `None` falls back to the configured default.
    pub gravity: Option<Gravity>,
    /// Output format. `None` keeps the source format.
    pub format: Option<Output>,
    /// Rotation in degrees; only right angles have an effect.
    pub rotate: i32,
}

impl TransformRequest {
    /// Set the output format from an extension name.
    pub fn with_format_name(mut self, name: &str) -> Result<Self, PipelineError> {
        self.format = Some(name.parse()?);
        Ok(self)
    }
}

/// Result of [`transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub output: Output,
    pub width: u32,
    pub height: u32,
    pub pages: u32,
    pub bytes: Vec<u8>,
}

/// Source type as reported by the image's loader.
pub fn source_type<I: BackendImage>(img: &I) -> ImageType {
    img.loader()
        .map(determine_image_type)
        .unwrap_or(ImageType::Unknown)
}

/// The output to write: the requested one, else the source type's natural
/// output. It must be enabled in `savers`.
pub fn resolve_output(
    image_type: ImageType,
    requested: Option<Output>,
    savers: SaverMask,
) -> Result<Output, PipelineError> {
    let output = requested.unwrap_or_else(|| to_output(image_type));
    if !savers.contains(output) {
        return Err(PipelineError::SaverDisabled {
            output,
            supported: savers.to_string(),
        });
    }
    Ok(output)
}

/// Resized page dimensions and crop window for a cover fit.
///
/// With both target dimensions the page is scaled uniformly until it covers
/// the window; with one, the other follows the aspect ratio and no crop is
/// needed.
fn cover_geometry(
    page: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> Option<((u32, u32), (u32, u32))> {
    let (in_w, in_h) = (f64::from(page.0), f64::from(page.1));
    let scaled = |v: f64| (v.round() as u32).max(1);
    match (width, height) {
        (Some(tw), Some(th)) => {
            let scale = (f64::from(tw) / in_w).max(f64::from(th) / in_h);
            let resized = (scaled(in_w * scale).max(tw), scaled(in_h * scale).max(th));
            Some((resized, (tw, th)))
        }
        (Some(tw), None) => {
            let resized = (tw, scaled(in_h * f64::from(tw) / in_w));
            Some((resized, resized))
        }
        (None, Some(th)) => {
            let resized = (scaled(in_w * f64::from(th) / in_h), th);
            Some((resized, resized))
        }
        (None, None) => None,
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    BackendError::InvalidGeometry(message.into()).into()
}

/// Transform `img` as described by `request`.
pub fn transform<I: BackendImage>(
    img: I,
    request: &TransformRequest,
    config: &ServiceConfig,
) -> Result<Transformed, PipelineError> {
    let image_type = source_type(&img);
    let output = resolve_output(image_type, request.format, config.saver_mask())?;
    if request.width == Some(0) || request.height == Some(0) {
        return Err(invalid("target dimensions must be non-zero"));
    }

    let mut img = img;
    let mut page_height = img.page_height().max(1);
    let source_pages = img
        .tag(tags::N_PAGES)
        .and_then(|v| v.as_int())
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(1)
        .clamp(1, (img.height() / page_height).max(1));

    // The description reports the page structure, so it keeps pages too.
    let n_pages = if output.supports_multi_pages() || output == Output::Json {
        source_pages.min(config.images.max_pages)
    } else {
        1
    };
    if n_pages < source_pages {
        tracing::debug!(source_pages, kept = n_pages, %output, "Dropping pages");
        img = img.extract_area(0, 0, img.width(), page_height * n_pages)?;
        img.set_tag(tags::N_PAGES, TagValue::Int(n_pages as i32));
        if n_pages > 1 {
            img.set_tag(tags::PAGE_HEIGHT, TagValue::Int(page_height as i32));
        }
        if let Some(TagValue::IntArray(mut delay)) = img.tag(tags::DELAY) {
            delay.truncate(n_pages as usize);
            img.set_tag(tags::DELAY, TagValue::IntArray(delay));
        }
    }

    let angle = resolve_angle_rotation(request.rotate);
    if angle != Angle::D0 {
        img = img.rotate(angle)?;
        page_height = img.page_height().max(1);
    }

    let original = (img.width(), page_height);
    if let Some((resized, target)) = cover_geometry(original, request.width, request.height) {
        tracing::debug!(?original, ?resized, ?target, n_pages, "Cover resize");
        if resized != original {
            img = img.resize(resized.0, resized.1 * n_pages)?;
            page_height = resized.1;
        }
        if target != resized {
            let gravity = request.gravity.unwrap_or_else(|| config.gravity());
            let offset = gravity.offset(CropGeometry {
                original: (original.0 as i32, original.1 as i32),
                target: (target.0 as i32, target.1 as i32),
                image: (resized.0 as i32, resized.1 as i32),
            });
            let rect = Rect::from_offset(offset, target.0, target.1)
                .ok_or_else(|| invalid(format!("crop offset {offset:?} is negative")))?;
            tracing::debug!(%gravity, ?rect, "Crop");
            img = crop_pages(&img, rect, n_pages, page_height)?;
            page_height = rect.height;
        }
    }

    let (width, height) = (img.width(), img.height());
    if output == Output::Json {
        let bytes = image_to_json(&img, image_type)?.into_bytes();
        return Ok(Transformed {
            output,
            width,
            height,
            pages: n_pages,
            bytes,
        });
    }

    let img = img.line_cache(config.images.line_cache_height)?;
    setup_timeout_handler(&img, config.process_timeout);
    let bytes = img.write_to_buffer(output, config.quality().value())?;
    tracing::debug!(%output, width, height, page_height, bytes = bytes.len(), "Encoded");

    Ok(Transformed {
        output,
        width,
        height,
        pages: n_pages,
        bytes,
    })
}

/// Load `config.toml` from `config_dir`, decode `path` and transform it.
pub fn transform_file(
    path: &Path,
    request: &TransformRequest,
    config_dir: &Path,
) -> Result<Transformed, PipelineError> {
    let config = load_config(config_dir)?;
    let img = RasterImage::from_file(path)?;
    tracing::debug!(
        path = %path.display(),
        width = img.width(),
        height = img.height(),
        loader = img.loader().unwrap_or("none"),
        "Decoded"
    );
    transform(img, request, &config)
}
