//! Multi-page crop reassembly.
//!
//! Multi-page images (animated GIFs, paginated TIFFs, ...) are handled as a
//! single tall "filmstrip": page `i` occupies rows
//! `[page_height * i, page_height * (i + 1))`. Cropping such an image with one
//! rectangle would cut across page boundaries, so each page is cropped on its
//! own and the cropped pages are stacked back into a new filmstrip whose page
//! height is the crop height.
//!
//! ```text
//!  source (3 pages, page_height 40)     result (page_height 30)
//!  ┌──────────┐  0                      ┌──────┐  0
//!  │  ┌────┐  │  top                    │ p0   │
//!  │  └────┘  │                         ├──────┤ 30
//!  ├──────────┤ 40                      │ p1   │
//!  │  ┌────┐  │                         ├──────┤ 60
//!  │  └────┘  │                         │ p2   │
//!  ├──────────┤ 80                      └──────┘ 90
//!  │  ┌────┐  │
//!  │  └────┘  │
//!  └──────────┘ 120
//! ```

use super::backend::{BackendError, BackendImage, TagValue, tags};
use super::params::Rect;

/// Split/crop each page and reassemble.
///
/// When the crop keeps the full page height (`top == 0` and
/// `height == page_height`) the page boundaries do not move and a single
/// extraction of `(left, 0, width, image.height())` suffices. Otherwise
/// every page is extracted separately into an ordered list and joined once,
/// top to bottom, in one column; the result is `n_pages * height` tall.
///
/// Page-height metadata is *not* touched; see [`crop_pages`].
pub fn crop_multi_page<I: BackendImage>(
    image: &I,
    rect: Rect,
    n_pages: u32,
    page_height: u32,
) -> Result<I, BackendError> {
    if n_pages == 0 || page_height == 0 {
        return Err(BackendError::InvalidGeometry(format!(
            "cannot crop {n_pages} pages of height {page_height}"
        )));
    }
    if rect.is_empty() || !rect.fits_within(image.width(), page_height) {
        return Err(BackendError::InvalidGeometry(format!(
            "crop {}x{}+{}+{} does not fit page {}x{}",
            rect.width,
            rect.height,
            rect.left,
            rect.top,
            image.width(),
            page_height
        )));
    }

    if rect.top == 0 && rect.height == page_height {
        tracing::debug!(n_pages, "Cropping multi-page image without reassembly");
        return image.extract_area(rect.left, 0, rect.width, image.height());
    }

    let pages = (0..n_pages)
        .map(|i| image.extract_area(rect.left, page_height * i + rect.top, rect.width, rect.height))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        n_pages,
        page_height = rect.height,
        "Reassembling cropped pages"
    );
    I::join_vertical(pages)
}

/// [`crop_multi_page`], then record the new page height on the result.
pub fn crop_pages<I: BackendImage>(
    image: &I,
    rect: Rect,
    n_pages: u32,
    page_height: u32,
) -> Result<I, BackendError> {
    let mut cropped = crop_multi_page(image, rect, n_pages, page_height)?;
    if n_pages > 1 {
        cropped.set_tag(tags::PAGE_HEIGHT, TagValue::Int(rect.height as i32));
    }
    Ok(cropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockImage, RecordedOp};

    #[test]
    fn fast_path_is_a_single_extract() {
        let img = MockImage::paginated(30, 40, 3);
        let out = crop_multi_page(&img, Rect::new(5, 0, 20, 40), 3, 40).unwrap();

        assert_eq!((out.width(), out.height()), (20, 120));
        assert_eq!(
            img.get_operations(),
            vec![RecordedOp::ExtractArea {
                left: 5,
                top: 0,
                width: 20,
                height: 120
            }]
        );
    }

    #[test]
    fn general_path_extracts_each_page_and_joins_once() {
        let img = MockImage::paginated(30, 40, 3);
        let out = crop_multi_page(&img, Rect::new(5, 5, 20, 30), 3, 40).unwrap();

        assert_eq!((out.width(), out.height()), (20, 90));
        let extract = |top| RecordedOp::ExtractArea {
            left: 5,
            top,
            width: 20,
            height: 30,
        };
        assert_eq!(
            img.get_operations(),
            vec![
                extract(5),
                extract(45),
                extract(85),
                RecordedOp::JoinVertical { pages: 3 }
            ]
        );
    }

    #[test]
    fn top_zero_but_shorter_takes_general_path() {
        let img = MockImage::paginated(30, 40, 2);
        let out = crop_multi_page(&img, Rect::new(0, 0, 30, 10), 2, 40).unwrap();
        assert_eq!(out.height(), 20);
        assert!(
            img.get_operations()
                .contains(&RecordedOp::JoinVertical { pages: 2 })
        );
    }

    #[test]
    fn crop_pages_updates_page_height() {
        let img = MockImage::paginated(30, 40, 3);
        let out = crop_pages(&img, Rect::new(0, 5, 30, 30), 3, 40).unwrap();
        assert_eq!(out.page_height(), 30);
        assert_eq!(out.tag(tags::PAGE_HEIGHT), Some(TagValue::Int(30)));
    }

    #[test]
    fn crop_exceeding_page_is_rejected() {
        let img = MockImage::paginated(30, 40, 3);
        assert!(matches!(
            crop_multi_page(&img, Rect::new(0, 20, 30, 30), 3, 40),
            Err(BackendError::InvalidGeometry(_))
        ));
        assert!(img.get_operations().is_empty());
    }

    #[test]
    fn empty_crop_is_rejected_up_front() {
        let img = MockImage::paginated(30, 40, 3);
        assert!(matches!(
            crop_multi_page(&img, Rect::new(5, 5, 0, 10), 3, 40),
            Err(BackendError::InvalidGeometry(_))
        ));
        assert!(img.get_operations().is_empty());
    }

    #[test]
    fn zero_pages_is_rejected() {
        let img = MockImage::new(10, 10);
        assert!(crop_multi_page(&img, Rect::new(0, 0, 5, 5), 0, 10).is_err());
    }
}
