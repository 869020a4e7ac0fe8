//! CLI output formatting for all commands.
//!
//! Output is **information-centric, not file-centric**: each command leads
//! with what the image *is* (format, geometry, pages) and shows file paths as
//! secondary, indented `Source:` / `Written:` context lines.
//!
//! # Output Format
//!
//! ## Info
//!
//! ```text
//! gif 40x60 (3 pages of 20)
//!     Source: anim.gif
//!     Space: srgb, 4 channels, uchar
//!     Delay: 100, 100, 200
//!     Alpha: yes
//! ```
//!
//! ## Transform
//!
//! ```text
//! gif 20x15 (3 pages)
//!     Source: anim.gif
//!     Written: anim-20x5.gif (1834 bytes)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::format::SaverMask;
use crate::metadata::ImageDescription;
use crate::pipeline::Transformed;
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Geometry header shared by `info` and `transform`.
///
/// ```text
/// jpeg 640x480
/// gif 40x60 (3 pages of 20)
/// ```
fn geometry_header(format: &str, width: u32, height: u32, pages: Option<(u32, u32)>) -> String {
    match pages {
        Some((n, page_height)) if n > 1 => {
            format!("{format} {width}x{height} ({n} pages of {page_height})")
        }
        _ => format!("{format} {width}x{height}"),
    }
}

// ============================================================================
// info
// ============================================================================

pub fn format_info_output(desc: &ImageDescription, source: &Path) -> Vec<String> {
    let ctx = indent(1);
    let pages = desc.pages.zip(desc.page_height).map(|(n, h)| (n as u32, h as u32));
    let mut lines = vec![
        geometry_header(desc.format, desc.width, desc.height, pages),
        format!("{ctx}Source: {}", source.display()),
        format!(
            "{ctx}Space: {}, {} channels, {}",
            desc.space, desc.channels, desc.depth
        ),
    ];
    if let Some(density) = desc.density {
        lines.push(format!("{ctx}Density: {density} dpi"));
    }
    if let Some(chroma) = &desc.chroma_subsampling {
        lines.push(format!("{ctx}Chroma subsampling: {chroma}"));
    }
    if desc.is_progressive {
        lines.push(format!("{ctx}Progressive"));
    }
    if let Some(delay) = &desc.delay {
        let delays: Vec<String> = delay.iter().map(i32::to_string).collect();
        lines.push(format!("{ctx}Delay: {}", delays.join(", ")));
    }
    if let Some(n) = desc.loop_count {
        lines.push(format!("{ctx}Loop: {n}"));
    }
    if desc.orientation != 0 {
        lines.push(format!("{ctx}Orientation: {}", desc.orientation));
    }
    lines.push(format!("{ctx}Profile: {}", yes_no(desc.has_profile)));
    lines.push(format!("{ctx}Alpha: {}", yes_no(desc.has_alpha)));
    lines
}

pub fn print_info_output(desc: &ImageDescription, source: &Path) {
    for line in format_info_output(desc, source) {
        println!("{}", line);
    }
}

// ============================================================================
// transform
// ============================================================================

pub fn format_transform_output(result: &Transformed, source: &Path, dest: &Path) -> Vec<String> {
    let ctx = indent(1);
    let header = if result.pages > 1 {
        format!(
            "{} {}x{} ({} pages)",
            result.output, result.width, result.height, result.pages
        )
    } else {
        geometry_header(&result.output.to_string(), result.width, result.height, None)
    };
    vec![
        header,
        format!("{ctx}Source: {}", source.display()),
        format!(
            "{ctx}Written: {} ({} bytes)",
            dest.display(),
            result.bytes.len()
        ),
    ]
}

pub fn print_transform_output(result: &Transformed, source: &Path, dest: &Path) {
    for line in format_transform_output(result, source, dest) {
        println!("{}", line);
    }
}

// ============================================================================
// savers
// ============================================================================

pub fn format_savers_output(mask: SaverMask) -> Vec<String> {
    if mask.is_empty() {
        return vec!["No savers enabled".to_string()];
    }
    vec![format!("Savers: {mask}")]
}
