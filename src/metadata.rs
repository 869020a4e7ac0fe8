//! Image metadata introspection.
//!
//! Read-only queries over a [`BackendImage`]: colour profile, density,
//! orientation, page geometry, and the canonical descriptive document that a
//! `json` output returns instead of pixels.
//!
//! ## The descriptive document
//!
//! [`describe`] collects everything into an [`ImageDescription`];
//! [`image_to_json`] serialises it on a single line. Clients parse this
//! document by position as well as by name, so the key order is fixed:
//!
//! ```text
//! format, width, height, space, channels, depth,
//! density?, chromaSubsampling?, isProgressive, paletteBitDepth?,
//! pages?, pageHeight?, loop?, delay?, pagePrimary?,
//! hasProfile, hasAlpha, orientation
//! ```
//!
//! Keys marked `?` appear only when the backing tag is present on the image.
//! The order lives in the field declaration order of [`ImageDescription`];
//! `serde_json` emits fields in declaration order.

use crate::format::{ImageType, image_type_id};
use crate::imaging::backend::{Angle, BackendImage, Interpretation, TagValue, tags};
use serde::Serialize;

/// Does the image carry an embedded ICC profile?
pub fn has_profile<I: BackendImage>(img: &I) -> bool {
    img.tag(tags::ICC_PROFILE).is_some()
}

/// Density is meaningful only above 1 pixel per millimetre (about 25 DPI).
pub fn has_density<I: BackendImage>(img: &I) -> bool {
    img.xres() > 1.0
}

/// Horizontal density in pixels per inch, rounded.
pub fn get_density<I: BackendImage>(img: &I) -> i32 {
    (img.xres() * 25.4).round() as i32
}

pub fn get_page_height<I: BackendImage>(img: &I) -> u32 {
    img.page_height()
}

/// EXIF orientation (1-8), or 0 when the image has none.
pub fn exif_orientation<I: BackendImage>(img: &I) -> i32 {
    img.tag(tags::ORIENTATION)
        .and_then(|v| v.as_int())
        .unwrap_or(0)
}

pub fn is_16_bit(interpretation: Interpretation) -> bool {
    matches!(interpretation, Interpretation::Rgb16 | Interpretation::Grey16)
}

/// Map a rotation in degrees onto a right angle. Anything that is not
/// exactly 90, 180 or 270 means no rotation.
pub fn resolve_angle_rotation(angle: i32) -> Angle {
    match angle {
        90 => Angle::D90,
        180 => Angle::D180,
        270 => Angle::D270,
        _ => Angle::D0,
    }
}

fn int_tag<I: BackendImage>(img: &I, name: &str) -> Option<i32> {
    img.tag(name).and_then(|v| v.as_int())
}

/// Typed form of the descriptive document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescription {
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub space: &'static str,
    pub channels: u32,
    pub depth: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chroma_subsampling: Option<String>,
    pub is_progressive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub palette_bit_depth: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_height: Option<i32>,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<Vec<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_primary: Option<i32>,
    pub has_profile: bool,
    pub has_alpha: bool,
    pub orientation: i32,
}

/// Gather the descriptive document for `img`, decoded as `image_type`.
pub fn describe<I: BackendImage>(img: &I, image_type: ImageType) -> ImageDescription {
    ImageDescription {
        format: image_type_id(image_type),
        width: img.width(),
        height: img.height(),
        space: img.interpretation().nick(),
        channels: img.bands(),
        depth: img.band_format().nick(),
        density: has_density(img).then(|| get_density(img)),
        chroma_subsampling: img
            .tag(tags::CHROMA_SUBSAMPLE)
            .and_then(|v| v.as_str().map(String::from)),
        is_progressive: img.tag(tags::INTERLACED).is_some(),
        palette_bit_depth: int_tag(img, tags::PALETTE_BIT_DEPTH),
        pages: int_tag(img, tags::N_PAGES),
        page_height: int_tag(img, tags::PAGE_HEIGHT),
        loop_count: int_tag(img, tags::LOOP),
        delay: img.tag(tags::DELAY).and_then(|v| match v {
            TagValue::IntArray(delays) => Some(delays),
            _ => None,
        }),
        page_primary: int_tag(img, tags::HEIF_PRIMARY),
        has_profile: has_profile(img),
        has_alpha: img.has_alpha(),
        orientation: exif_orientation(img),
    }
}

/// Single-line JSON rendering of [`describe`].
pub fn image_to_json<I: BackendImage>(
    img: &I,
    image_type: ImageType,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&describe(img, image_type))
}

/// Minimal JSON string escaper.
///
/// Only NUL, 0x01, newline, 0x1F, double quote and backslash are escaped;
/// every other character passes through untouched.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\u{00}' => out.push_str("\\u0000"),
            '\u{01}' => out.push_str("\\u0001"),
            '\n' => out.push_str("\\n"),
            '\u{1f}' => out.push_str("\\u001f"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockImage;

    // =========================================================================
    // Single-value queries
    // =========================================================================

    #[test]
    fn profile_presence() {
        let img = MockImage::new(1, 1);
        assert!(!has_profile(&img));
        let img = img.with_tag(tags::ICC_PROFILE, TagValue::Blob(vec![0; 4]));
        assert!(has_profile(&img));
    }

    #[test]
    fn density_threshold_and_rounding() {
        let mut img = MockImage::new(1, 1);
        assert!(!has_density(&img));

        img.xres = 2.834_645_669; // 72 DPI
        assert!(has_density(&img));
        assert_eq!(get_density(&img), 72);

        img.xres = 11.811; // 300 DPI
        assert_eq!(get_density(&img), 300);
    }

    #[test]
    fn orientation_defaults_to_zero() {
        let img = MockImage::new(1, 1);
        assert_eq!(exif_orientation(&img), 0);
        let img = img.with_tag(tags::ORIENTATION, TagValue::Int(6));
        assert_eq!(exif_orientation(&img), 6);
    }

    #[test]
    fn page_height_is_forwarded() {
        let img = MockImage::paginated(10, 25, 4);
        assert_eq!(get_page_height(&img), 25);
    }

    #[test]
    fn sixteen_bit_interpretations() {
        assert!(is_16_bit(Interpretation::Rgb16));
        assert!(is_16_bit(Interpretation::Grey16));
        assert!(!is_16_bit(Interpretation::Srgb));
        assert!(!is_16_bit(Interpretation::BW));
    }

    #[test]
    fn angle_rotation_only_for_right_angles() {
        assert_eq!(resolve_angle_rotation(90), Angle::D90);
        assert_eq!(resolve_angle_rotation(180), Angle::D180);
        assert_eq!(resolve_angle_rotation(270), Angle::D270);
        assert_eq!(resolve_angle_rotation(0), Angle::D0);
        assert_eq!(resolve_angle_rotation(45), Angle::D0);
        assert_eq!(resolve_angle_rotation(-90), Angle::D0);
    }

    // =========================================================================
    // Descriptive document
    // =========================================================================

    #[test]
    fn json_minimal_document() {
        let img = MockImage::new(640, 480);
        assert_eq!(
            image_to_json(&img, ImageType::Png).unwrap(),
            r#"{"format":"png","width":640,"height":480,"space":"srgb","channels":3,"depth":"uchar","isProgressive":false,"hasProfile":false,"hasAlpha":false,"orientation":0}"#
        );
    }

    #[test]
    fn json_key_order_with_density_and_delay_only() {
        let mut img = MockImage::new(10, 20)
            .with_tag(tags::DELAY, TagValue::IntArray(vec![100, 50, 100]));
        img.xres = 2.834_645_669;

        assert_eq!(
            image_to_json(&img, ImageType::Gif).unwrap(),
            r#"{"format":"gif","width":10,"height":20,"space":"srgb","channels":3,"depth":"uchar","density":72,"isProgressive":false,"delay":[100,50,100],"hasProfile":false,"hasAlpha":false,"orientation":0}"#
        );
    }

    #[test]
    fn json_all_optional_keys() {
        let mut img = MockImage::paginated(8, 4, 2)
            .with_tag(tags::CHROMA_SUBSAMPLE, TagValue::Str("4:2:0".into()))
            .with_tag(tags::INTERLACED, TagValue::Int(1))
            .with_tag(tags::PALETTE_BIT_DEPTH, TagValue::Int(8))
            .with_tag(tags::LOOP, TagValue::Int(0))
            .with_tag(tags::DELAY, TagValue::IntArray(vec![40, 40]))
            .with_tag(tags::HEIF_PRIMARY, TagValue::Int(1))
            .with_tag(tags::ICC_PROFILE, TagValue::Blob(vec![1]))
            .with_tag(tags::ORIENTATION, TagValue::Int(3));
        img.alpha = true;
        img.xres = 11.811;

        assert_eq!(
            image_to_json(&img, ImageType::Webp).unwrap(),
            r#"{"format":"webp","width":8,"height":8,"space":"srgb","channels":4,"depth":"uchar","density":300,"chromaSubsampling":"4:2:0","isProgressive":true,"paletteBitDepth":8,"pages":2,"pageHeight":4,"loop":0,"delay":[40,40],"pagePrimary":1,"hasProfile":true,"hasAlpha":true,"orientation":3}"#
        );
    }

    #[test]
    fn describe_unknown_format() {
        let img = MockImage::new(1, 1);
        assert_eq!(describe(&img, ImageType::Unknown).format, "unknown");
    }

    // =========================================================================
    // escape_string
    // =========================================================================

    #[test]
    fn escapes_only_the_listed_characters() {
        assert_eq!(escape_string("a\"b\\c"), r#"a\"b\\c"#);
        assert_eq!(escape_string("line\nbreak"), r"line\nbreak");
        assert_eq!(escape_string("\u{0}\u{1}\u{1f}"), r"\u0000\u0001\u001f");
    }

    #[test]
    fn other_control_characters_pass_through() {
        assert_eq!(escape_string("tab\there\r"), "tab\there\r");
        assert_eq!(escape_string("\u{2}"), "\u{2}");
        assert_eq!(escape_string("héllo"), "héllo");
    }
}
