//! Format capability resolution.
//!
//! Maps the loader name a backend reports for a decoded image onto an
//! [`ImageType`], the image type onto the [`Output`] it is re-encoded as by
//! default, and every output onto its file extension. The extension doubles
//! as the contract for which saver is allowed to run, so the table in
//! [`determine_image_extension`] must stay in lockstep with the encoder
//! dispatch in [`RasterImage::write_to_buffer`](crate::imaging::RasterImage).
//!
//! ## Saver mask
//!
//! Deployments advertise their enabled encoders as an integer bitmask where
//! every [`Output`] owns one bit:
//!
//! | Bit | Output |
//! |-----|--------|
//! | 0   | reserved, never mapped |
//! | 1   | Jpeg |
//! | 2   | Png |
//! | 3   | Avif |
//! | 4   | Webp |
//! | 5   | Tiff |
//! | 6   | Gif |
//! | 7   | Json |

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Recognised decoded-source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Jpeg,
    Png,
    Webp,
    Tiff,
    Gif,
    Svg,
    Pdf,
    Heif,
    Magick,
    Unknown,
}

/// Encodable target kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Output {
    Jpeg,
    Png,
    Webp,
    Avif,
    Tiff,
    Gif,
    Json,
}

#[cfg(feature = "legacy-gif-loader")]
const LOADER_GIF: &str = "VipsForeignLoadGif";
#[cfg(not(feature = "legacy-gif-loader"))]
const LOADER_GIF: &str = "VipsForeignLoadNsgif";

/// Loader-name prefixes, matched in order.
const LOADER_PREFIXES: &[(&str, ImageType)] = &[
    ("VipsForeignLoadJpeg", ImageType::Jpeg),
    ("VipsForeignLoadPng", ImageType::Png),
    ("VipsForeignLoadWebp", ImageType::Webp),
    ("VipsForeignLoadTiff", ImageType::Tiff),
    (LOADER_GIF, ImageType::Gif),
    ("VipsForeignLoadSvg", ImageType::Svg),
    ("VipsForeignLoadPdf", ImageType::Pdf),
    ("VipsForeignLoadHeif", ImageType::Heif),
    ("VipsForeignLoadMagick", ImageType::Magick),
];

/// Loader name a backend should report for sources of the given type.
///
/// Inverse of [`determine_image_type`] for every type except `Unknown`.
pub fn loader_name(image_type: ImageType) -> Option<&'static str> {
    LOADER_PREFIXES
        .iter()
        .find(|(_, t)| *t == image_type)
        .map(|(prefix, _)| *prefix)
}

/// Determine the image type from the name of the load operation.
///
/// Matching is by prefix, so `VipsForeignLoadJpegBuffer` and
/// `VipsForeignLoadJpegFile` both resolve to [`ImageType::Jpeg`].
pub fn determine_image_type(loader: &str) -> ImageType {
    LOADER_PREFIXES
        .iter()
        .find(|(prefix, _)| loader.starts_with(prefix))
        .map(|(_, image_type)| *image_type)
        .unwrap_or(ImageType::Unknown)
}

/// Default output for an image type.
pub fn to_output(image_type: ImageType) -> Output {
    match image_type {
        ImageType::Jpeg => Output::Jpeg,
        ImageType::Webp => Output::Webp,
        ImageType::Heif => Output::Avif,
        ImageType::Tiff => Output::Tiff,
        ImageType::Gif => Output::Gif,
        ImageType::Png
        | ImageType::Svg
        | ImageType::Pdf
        | ImageType::Magick
        | ImageType::Unknown => Output::Png,
    }
}

/// File extension (with leading dot) for an output.
pub fn determine_image_extension(output: Output) -> &'static str {
    match output {
        Output::Jpeg => ".jpg",
        Output::Png => ".png",
        Output::Webp => ".webp",
        Output::Avif => ".avif",
        Output::Tiff => ".tiff",
        Output::Gif => ".gif",
        Output::Json => ".json",
    }
}

/// Stable lowercase identifier used in the descriptive document.
pub fn image_type_id(image_type: ImageType) -> &'static str {
    match image_type {
        ImageType::Jpeg => "jpeg",
        ImageType::Png => "png",
        ImageType::Webp => "webp",
        ImageType::Tiff => "tiff",
        ImageType::Gif => "gif",
        ImageType::Svg => "svg",
        ImageType::Pdf => "pdf",
        ImageType::Heif => "heif",
        ImageType::Magick => "magick",
        ImageType::Unknown => "unknown",
    }
}

/// Can sources of this type carry more than one page?
pub fn support_multi_pages(image_type: ImageType) -> bool {
    match image_type {
        ImageType::Webp
        | ImageType::Tiff
        | ImageType::Gif
        | ImageType::Pdf
        | ImageType::Heif
        | ImageType::Magick => true,
        ImageType::Jpeg | ImageType::Png | ImageType::Svg | ImageType::Unknown => false,
    }
}

/// Can sources of this type carry an alpha channel?
pub fn support_alpha_channel(image_type: ImageType) -> bool {
    match image_type {
        ImageType::Png | ImageType::Webp | ImageType::Heif | ImageType::Tiff | ImageType::Gif => {
            true
        }
        ImageType::Jpeg
        | ImageType::Svg
        | ImageType::Pdf
        | ImageType::Magick
        | ImageType::Unknown => false,
    }
}

impl Output {
    /// Every output, in ascending bit order.
    pub const ALL: [Output; 7] = [
        Output::Jpeg,
        Output::Png,
        Output::Avif,
        Output::Webp,
        Output::Tiff,
        Output::Gif,
        Output::Json,
    ];

    /// The saver-mask bit owned by this output.
    pub fn bit(self) -> u32 {
        let index = match self {
            Output::Jpeg => 1,
            Output::Png => 2,
            Output::Avif => 3,
            Output::Webp => 4,
            Output::Tiff => 5,
            Output::Gif => 6,
            Output::Json => 7,
        };
        1 << index
    }

    /// Inverse of [`Output::bit`]. Bit 0 and anything above bit 7 is `None`.
    pub fn from_bit(bit: u32) -> Option<Output> {
        Output::ALL.into_iter().find(|o| o.bit() == bit)
    }

    /// Extension without the leading dot.
    pub fn extension(self) -> &'static str {
        &determine_image_extension(self)[1..]
    }

    /// Whether this output produces pixels (as opposed to a JSON description).
    pub fn is_image(self) -> bool {
        !matches!(self, Output::Json)
    }

    /// Whether the bundled encoders can write every page of a filmstrip.
    ///
    /// Only GIF is written as an animation; every other output keeps the
    /// first page.
    pub fn supports_multi_pages(self) -> bool {
        match self {
            Output::Gif => true,
            Output::Jpeg
            | Output::Png
            | Output::Webp
            | Output::Avif
            | Output::Tiff
            | Output::Json => false,
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown output format: {0}")]
pub struct UnknownOutput(pub String);

impl FromStr for Output {
    type Err = UnknownOutput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Output::Jpeg),
            "png" => Ok(Output::Png),
            "webp" => Ok(Output::Webp),
            "avif" => Ok(Output::Avif),
            "tif" | "tiff" => Ok(Output::Tiff),
            "gif" => Ok(Output::Gif),
            "json" => Ok(Output::Json),
            _ => Err(UnknownOutput(s.to_string())),
        }
    }
}

/// Get the supported savers as a comma-separated string.
///
/// Walks bits 1 through 7 in ascending order; bit 0 is never mapped.
pub fn supported_savers_string(mask: u32) -> String {
    (1..=7)
        .map(|i| 1u32 << i)
        .filter(|bit| mask & bit != 0)
        .filter_map(Output::from_bit)
        .map(Output::extension)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set of enabled savers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaverMask(pub u32);

impl SaverMask {
    pub fn all() -> Self {
        Self::from_outputs(Output::ALL)
    }

    pub fn from_outputs(outputs: impl IntoIterator<Item = Output>) -> Self {
        Self(outputs.into_iter().fold(0, |mask, o| mask | o.bit()))
    }

    pub fn contains(self, output: Output) -> bool {
        self.0 & output.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 & !1 == 0
    }
}

impl fmt::Display for SaverMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&supported_savers_string(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [ImageType; 10] = [
        ImageType::Jpeg,
        ImageType::Png,
        ImageType::Webp,
        ImageType::Tiff,
        ImageType::Gif,
        ImageType::Svg,
        ImageType::Pdf,
        ImageType::Heif,
        ImageType::Magick,
        ImageType::Unknown,
    ];

    // =========================================================================
    // determine_image_type
    // =========================================================================

    #[test]
    fn loader_prefix_matches_variants() {
        assert_eq!(determine_image_type("VipsForeignLoadJpegFile"), ImageType::Jpeg);
        assert_eq!(determine_image_type("VipsForeignLoadPngBuffer"), ImageType::Png);
        assert_eq!(determine_image_type("VipsForeignLoadWebpSource"), ImageType::Webp);
        assert_eq!(determine_image_type("VipsForeignLoadTiffFile"), ImageType::Tiff);
        assert_eq!(determine_image_type("VipsForeignLoadSvgBuffer"), ImageType::Svg);
        assert_eq!(determine_image_type("VipsForeignLoadPdfFile"), ImageType::Pdf);
        assert_eq!(determine_image_type("VipsForeignLoadHeifBuffer"), ImageType::Heif);
        assert_eq!(determine_image_type("VipsForeignLoadMagick7File"), ImageType::Magick);
    }

    #[test]
    fn unknown_loader_is_unknown() {
        assert_eq!(determine_image_type("VipsForeignLoadFoo"), ImageType::Unknown);
        assert_eq!(determine_image_type(""), ImageType::Unknown);
        // Prefix, not substring
        assert_eq!(determine_image_type("xVipsForeignLoadJpeg"), ImageType::Unknown);
    }

    #[cfg(not(feature = "legacy-gif-loader"))]
    #[test]
    fn only_nsgif_prefix_is_active() {
        assert_eq!(determine_image_type("VipsForeignLoadNsgifFile"), ImageType::Gif);
        assert_eq!(determine_image_type("VipsForeignLoadGifFile"), ImageType::Unknown);
    }

    #[cfg(feature = "legacy-gif-loader")]
    #[test]
    fn only_legacy_gif_prefix_is_active() {
        assert_eq!(determine_image_type("VipsForeignLoadGifFile"), ImageType::Gif);
        assert_eq!(determine_image_type("VipsForeignLoadNsgifFile"), ImageType::Unknown);
    }

    #[test]
    fn determine_image_type_is_idempotent() {
        for loader in ["VipsForeignLoadPngFile", "nonsense"] {
            assert_eq!(determine_image_type(loader), determine_image_type(loader));
        }
    }

    #[test]
    fn loader_name_round_trips_through_prefix_table() {
        for t in ALL_TYPES {
            match loader_name(t) {
                Some(name) => assert_eq!(determine_image_type(name), t),
                None => assert_eq!(t, ImageType::Unknown),
            }
        }
    }

    // =========================================================================
    // Output mapping and capabilities
    // =========================================================================

    #[test]
    fn heif_is_the_only_non_identity_output() {
        assert_eq!(to_output(ImageType::Heif), Output::Avif);
        assert_eq!(to_output(ImageType::Jpeg), Output::Jpeg);
        assert_eq!(to_output(ImageType::Gif), Output::Gif);
        for t in [
            ImageType::Png,
            ImageType::Svg,
            ImageType::Pdf,
            ImageType::Magick,
            ImageType::Unknown,
        ] {
            assert_eq!(to_output(t), Output::Png, "{t:?}");
        }
    }

    #[test]
    fn extensions() {
        assert_eq!(determine_image_extension(Output::Jpeg), ".jpg");
        assert_eq!(determine_image_extension(Output::Tiff), ".tiff");
        assert_eq!(determine_image_extension(Output::Json), ".json");
        assert_eq!(Output::Avif.extension(), "avif");
    }

    #[test]
    fn type_ids_are_lowercase() {
        assert_eq!(image_type_id(ImageType::Unknown), "unknown");
        assert_eq!(image_type_id(ImageType::Magick), "magick");
        for t in ALL_TYPES {
            let id = image_type_id(t);
            assert_eq!(id, id.to_lowercase());
        }
    }

    #[test]
    fn multi_page_and_alpha_sets() {
        let multi: Vec<_> = ALL_TYPES.into_iter().filter(|t| support_multi_pages(*t)).collect();
        assert_eq!(
            multi,
            vec![
                ImageType::Webp,
                ImageType::Tiff,
                ImageType::Gif,
                ImageType::Pdf,
                ImageType::Heif,
                ImageType::Magick
            ]
        );
        let alpha: Vec<_> = ALL_TYPES.into_iter().filter(|t| support_alpha_channel(*t)).collect();
        assert_eq!(
            alpha,
            vec![
                ImageType::Png,
                ImageType::Webp,
                ImageType::Tiff,
                ImageType::Gif,
                ImageType::Heif
            ]
        );
    }

    #[test]
    fn output_parses_extensions() {
        assert_eq!("jpeg".parse::<Output>(), Ok(Output::Jpeg));
        assert_eq!(".TIF".parse::<Output>(), Ok(Output::Tiff));
        assert!("bmp".parse::<Output>().is_err());
    }

    // =========================================================================
    // Saver mask
    // =========================================================================

    #[test]
    fn savers_string_follows_bit_order() {
        assert_eq!(supported_savers_string((1 << 1) | (1 << 3)), "jpg, avif");
        assert_eq!(supported_savers_string((1 << 3) | (1 << 1)), "jpg, avif");
    }

    #[test]
    fn savers_string_empty_and_bit_zero() {
        assert_eq!(supported_savers_string(0), "");
        assert_eq!(supported_savers_string(1), "");
        assert_eq!(supported_savers_string(1 << 8), "");
    }

    #[test]
    fn saver_mask_all_lists_every_output() {
        assert_eq!(
            SaverMask::all().to_string(),
            "jpg, png, avif, webp, tiff, gif, json"
        );
        assert_eq!(SaverMask::all().0, 0b1111_1110);
    }

    #[test]
    fn saver_mask_contains() {
        let mask = SaverMask::from_outputs([Output::Png, Output::Json]);
        assert!(mask.contains(Output::Png));
        assert!(mask.contains(Output::Json));
        assert!(!mask.contains(Output::Jpeg));
        assert!(!mask.is_empty());
        assert!(SaverMask(1).is_empty());
    }

    #[test]
    fn from_bit_rejects_reserved_bit() {
        assert_eq!(Output::from_bit(1), None);
        for o in Output::ALL {
            assert_eq!(Output::from_bit(o.bit()), Some(o));
        }
    }
}
