//! In-memory image backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` + `ImageDecoder` (ICC, EXIF) |
//! | Decode (GIF, animated) | `image::codecs::gif::GifDecoder` frames → filmstrip |
//! | Extract / join | `DynamicImage::crop_imm`, row-buffer concatenation |
//! | Resize | separable `Lanczos3`: row bands, then each page's columns in bands |
//! | Rotate | `DynamicImage::rotate90` and friends, page by page |
//! | Evaluate | deferred operations run in batches on the `rayon` pool |
//! | Encode | `image::codecs::{jpeg, png, webp, avif, tiff, gif}` |
//!
//! Derive operations only record what to do. Geometry is known at once;
//! pixels are produced when a handle is evaluated, one band or one page per
//! unit of work. Handlers hear about progress after every batch of units and
//! the kill switch is checked before the next batch, so a deadline covers all
//! of the pixel work. A computed node keeps its result: pages cropped out of
//! one resized strip share a single resize.
//!
//! Every derived handle gets its own evaluation state: handlers registered on
//! one handle never fire for another.

use super::backend::{
    Angle, BackendError, BackendImage, BandFormat, EvalHandler, EvalSink, Interpretation,
    Progress, TagValue, tags,
};
use crate::format::{ImageType, Output, loader_name};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{
    AnimationDecoder, ColorType, Delay, DynamicImage, Frame, ImageBuffer, ImageDecoder,
    ImageFormat, ImageReader, Pixel, RgbaImage,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

/// Band height used when no line cache has been inserted.
const DEFAULT_TILE_HEIGHT: u32 = 64;

/// Per-handle evaluation state: kill switch, error channel and handlers.
#[derive(Default)]
struct EvalState {
    killed: AtomicBool,
    errors: Mutex<Vec<String>>,
    handlers: Mutex<Vec<EvalHandler>>,
}

impl EvalSink for EvalState {
    fn set_kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    fn report_error(&self, message: String) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

impl EvalState {
    fn notify(&self, progress: Progress) {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter_mut() {
            handler(&progress, self);
        }
    }

    fn killed_error(&self) -> BackendError {
        let errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if errors.is_empty() {
            BackendError::Killed("Image evaluation was killed".into())
        } else {
            BackendError::Killed(errors.join("\n"))
        }
    }
}

/// One step of deferred pixel work.
enum Op {
    Source(Arc<DynamicImage>),
    Extract { input: Arc<Node>, left: u32, top: u32 },
    /// Every page of `input` scaled to `node.height / pages` rows.
    Resize { input: Arc<Node>, pages: u32 },
    Rotate { input: Arc<Node>, pages: u32, angle: Angle },
    Join(Vec<Arc<Node>>),
}

/// A node of the operation graph with its output geometry.
struct Node {
    op: Op,
    width: u32,
    height: u32,
    color: ColorType,
    computed: OnceLock<Arc<DynamicImage>>,
}

impl Node {
    fn source(pixels: Arc<DynamicImage>) -> Arc<Self> {
        Arc::new(Self {
            width: pixels.width(),
            height: pixels.height(),
            color: pixels.color(),
            op: Op::Source(pixels),
            computed: OnceLock::new(),
        })
    }

    fn derived(op: Op, width: u32, height: u32, color: ColorType) -> Arc<Self> {
        Arc::new(Self {
            op,
            width,
            height,
            color,
            computed: OnceLock::new(),
        })
    }

    fn is_ready(&self) -> bool {
        matches!(self.op, Op::Source(_)) || self.computed.get().is_some()
    }

    fn inputs(&self) -> &[Arc<Node>] {
        match &self.op {
            Op::Source(_) => &[],
            Op::Extract { input, .. } | Op::Resize { input, .. } | Op::Rotate { input, .. } => {
                std::slice::from_ref(input)
            }
            Op::Join(parts) => parts,
        }
    }

    /// Units of work this node needs on its own, not counting its inputs.
    fn units(&self, tile: u32) -> u64 {
        match &self.op {
            Op::Source(_) => 0,
            Op::Extract { .. } | Op::Join(_) => 1,
            Op::Rotate { pages, .. } => u64::from(*pages),
            Op::Resize { input, pages } => {
                let rows = if self.width != input.width {
                    band_count(input.height, tile)
                } else {
                    0
                };
                let columns = if self.height != input.height {
                    u64::from(*pages) * band_count(self.width, tile)
                } else {
                    0
                };
                rows + columns
            }
        }
    }
}

/// Units still to compute below `root`. Shared nodes count once.
fn pending_units(root: &Node, tile: u32) -> u64 {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    let mut total = 0;
    while let Some(node) = stack.pop() {
        if node.is_ready() || !seen.insert(std::ptr::from_ref(node)) {
            continue;
        }
        total += node.units(tile);
        stack.extend(node.inputs().iter().map(Arc::as_ref));
    }
    total
}

fn band_count(len: u32, tile: u32) -> u64 {
    u64::from(len.div_ceil(tile.max(1)))
}

/// `(start, len)` bands of at most `tile` covering `0..len`.
fn bands(len: u32, tile: u32) -> Vec<(u32, u32)> {
    let tile = tile.max(1);
    (0..len)
        .step_by(tile as usize)
        .map(|start| (start, tile.min(len - start)))
        .collect()
}

/// One evaluation of a handle: runs the graph and reports progress.
struct Run<'a> {
    eval: &'a EvalState,
    start: Instant,
    tile: u32,
    batch: usize,
    done: u64,
    total: u64,
}

impl<'a> Run<'a> {
    fn new(eval: &'a EvalState, tile: u32, total: u64) -> Self {
        Self {
            eval,
            start: Instant::now(),
            tile,
            batch: rayon::current_num_threads().max(1),
            done: 0,
            total,
        }
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.eval.killed.load(Ordering::SeqCst) {
            return Err(self.eval.killed_error());
        }
        Ok(())
    }

    /// Count `units` as done, tell the handlers and stop if one of them
    /// killed the image.
    fn advance(&mut self, units: u64) -> Result<(), BackendError> {
        self.done += units;
        let percent = if self.total == 0 {
            100
        } else {
            (self.done * 100 / self.total).min(100)
        };
        self.eval.notify(Progress {
            run: self.start.elapsed().as_secs(),
            percent: percent as u32,
        });
        self.check()
    }

    /// Apply `f` to every item on the rayon pool, one batch per worker
    /// thread.
    fn batched<T: Sync>(
        &mut self,
        items: &[T],
        f: impl Fn(&T) -> DynamicImage + Sync,
    ) -> Result<Vec<DynamicImage>, BackendError> {
        let mut out = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.batch) {
            self.check()?;
            let part: Vec<DynamicImage> = chunk.par_iter().map(&f).collect();
            out.extend(part);
            self.advance(chunk.len() as u64)?;
        }
        Ok(out)
    }

    fn compute(&mut self, node: &Node) -> Result<Arc<DynamicImage>, BackendError> {
        if let Some(pixels) = node.computed.get() {
            return Ok(Arc::clone(pixels));
        }
        let pixels = match &node.op {
            Op::Source(pixels) => return Ok(Arc::clone(pixels)),
            Op::Extract { input, left, top } => {
                let input = self.compute(input)?;
                self.check()?;
                let out = input.crop_imm(*left, *top, node.width, node.height);
                self.advance(1)?;
                out
            }
            Op::Resize { input, pages } => {
                let input = self.compute(input)?;
                self.resize(&input, node.width, node.height / (*pages).max(1), *pages)?
            }
            Op::Rotate {
                input,
                pages,
                angle,
            } => {
                let input = self.compute(input)?;
                let page_height = input.height() / (*pages).max(1);
                let indices: Vec<u32> = (0..*pages).collect();
                let rotated = self.batched(&indices, |&i| {
                    let page = input.crop_imm(0, i * page_height, input.width(), page_height);
                    rotate_page(&page, *angle)
                })?;
                stack_owned(&rotated)?
            }
            Op::Join(parts) => {
                let computed = parts
                    .iter()
                    .map(|part| self.compute(part))
                    .collect::<Result<Vec<_>, _>>()?;
                self.check()?;
                let refs: Vec<&DynamicImage> = computed.iter().map(Arc::as_ref).collect();
                let out = stack_pages(&refs)
                    .ok_or_else(|| BackendError::InvalidGeometry("pages differ in width".into()))?;
                self.advance(1)?;
                out
            }
        };
        Ok(Arc::clone(node.computed.get_or_init(|| Arc::new(pixels))))
    }

    /// Separable Lanczos3. Rows are resized across the whole strip, then
    /// each page is transposed so its columns can be resized as rows.
    fn resize(
        &mut self,
        input: &Arc<DynamicImage>,
        width: u32,
        page_height: u32,
        pages: u32,
    ) -> Result<DynamicImage, BackendError> {
        let wide = if width == input.width() {
            Arc::clone(input)
        } else {
            Arc::new(self.resize_rows(input, width)?)
        };
        let source_page_height = wide.height() / pages.max(1);
        if source_page_height == page_height {
            return Ok(Arc::unwrap_or_clone(wide));
        }

        let mut resized = Vec::with_capacity(pages as usize);
        for i in 0..pages {
            let page = wide
                .crop_imm(0, i * source_page_height, width, source_page_height)
                .rotate90();
            resized.push(self.resize_rows(&page, page_height)?.rotate270());
        }
        stack_owned(&resized)
    }

    /// Resize every row of `img` to `width`, one band of rows per unit.
    fn resize_rows(&mut self, img: &DynamicImage, width: u32) -> Result<DynamicImage, BackendError> {
        let rows = bands(img.height(), self.tile);
        let parts = self.batched(&rows, |&(y, h)| {
            img.crop_imm(0, y, img.width(), h)
                .resize_exact(width, h, FilterType::Lanczos3)
        })?;
        stack_owned(&parts)
    }
}

fn rotate_page(page: &DynamicImage, angle: Angle) -> DynamicImage {
    match angle {
        Angle::D0 => page.clone(),
        Angle::D90 => page.rotate90(),
        Angle::D180 => page.rotate180(),
        Angle::D270 => page.rotate270(),
    }
}

/// An image held in memory, with any pending derive operations.
pub struct RasterImage {
    node: Arc<Node>,
    page_height: u32,
    xres: f64,
    loader: Option<String>,
    tags: BTreeMap<String, TagValue>,
    tile_height: u32,
    eval: Arc<EvalState>,
}

impl fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.node.width)
            .field("height", &self.node.height)
            .field("page_height", &self.page_height)
            .field("color", &self.node.color)
            .field("ready", &self.node.is_ready())
            .field("loader", &self.loader)
            .field("tile_height", &self.tile_height)
            .finish_non_exhaustive()
    }
}

impl RasterImage {
    /// Wrap already-decoded pixels as a single-page image.
    pub fn from_dynamic(pixels: DynamicImage) -> Self {
        let page_height = pixels.height();
        Self {
            node: Node::source(Arc::new(pixels)),
            page_height,
            xres: 1.0,
            loader: None,
            tags: BTreeMap::new(),
            tile_height: DEFAULT_TILE_HEIGHT,
            eval: Arc::new(EvalState::default()),
        }
    }

    /// Decode an encoded image, sniffing the format from its magic bytes.
    pub fn from_buffer(bytes: &[u8]) -> Result<Self, BackendError> {
        let format = image::guess_format(bytes).map_err(|e| BackendError::Decode(e.to_string()))?;
        let mut img = match format {
            ImageFormat::Gif => decode_gif(bytes)?,
            other => decode_still(bytes, other)?,
        };
        img.loader = source_type(format)
            .and_then(loader_name)
            .map(|name| format!("{name}Buffer"));
        Ok(img)
    }

    pub fn from_file(path: &Path) -> Result<Self, BackendError> {
        let bytes = std::fs::read(path)?;
        Self::from_buffer(&bytes)
    }

    /// Set the horizontal resolution in pixels per millimetre.
    pub fn with_xres(mut self, xres: f64) -> Self {
        self.xres = xres;
        self
    }

    pub fn with_tag(mut self, name: &str, value: TagValue) -> Self {
        self.set_tag(name, value);
        self
    }

    /// Compute the pixels. Runs any pending operations under this handle's
    /// evaluation handlers.
    pub fn pixels(&self) -> Result<Arc<DynamicImage>, BackendError> {
        self.render()
    }

    pub fn n_pages(&self) -> u32 {
        self.height() / self.page_height.max(1)
    }

    fn render(&self) -> Result<Arc<DynamicImage>, BackendError> {
        let tile = self.tile_height.max(1);
        let mut run = Run::new(&self.eval, tile, pending_units(&self.node, tile));
        run.check()?;
        let pixels = run.compute(&self.node)?;
        if run.total == 0 {
            run.advance(0)?;
        }
        Ok(pixels)
    }

    /// New handle over `node` carrying this handle's metadata.
    fn derive(&self, node: Arc<Node>, page_height: u32) -> Self {
        let mut tags = self.tags.clone();
        if tags.contains_key(tags::PAGE_HEIGHT) {
            tags.insert(
                tags::PAGE_HEIGHT.to_string(),
                TagValue::Int(page_height as i32),
            );
        }
        Self {
            node,
            page_height,
            xres: self.xres,
            loader: self.loader.clone(),
            tags,
            tile_height: self.tile_height,
            eval: Arc::new(EvalState::default()),
        }
    }

    /// Same operations and metadata, fresh evaluation state.
    fn derive_shared(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            page_height: self.page_height,
            xres: self.xres,
            loader: self.loader.clone(),
            tags: self.tags.clone(),
            tile_height: self.tile_height,
            eval: Arc::new(EvalState::default()),
        }
    }

    fn encode_gif(&self, pixels: &DynamicImage, buf: &mut Vec<u8>) -> Result<(), BackendError> {
        let mut encoder = GifEncoder::new(buf);
        let n_pages = self.n_pages();
        if n_pages <= 1 {
            return encoder
                .encode_frame(Frame::new(pixels.to_rgba8()))
                .map_err(encode_error);
        }

        let repeat = match self.tag(tags::LOOP).and_then(|v| v.as_int()) {
            Some(n) if n > 0 => Repeat::Finite(u16::try_from(n).unwrap_or(u16::MAX)),
            _ => Repeat::Infinite,
        };
        encoder.set_repeat(repeat).map_err(encode_error)?;

        let delays = self
            .tag(tags::DELAY)
            .and_then(|v| v.as_int_array().map(<[i32]>::to_vec))
            .unwrap_or_default();
        let (width, page_height) = (pixels.width(), self.page_height);
        let frames = (0..n_pages).map(|i| {
            let ms = delays.get(i as usize).copied().unwrap_or(0).max(0) as u32;
            let page: RgbaImage = pixels
                .crop_imm(0, i * page_height, width, page_height)
                .to_rgba8();
            Frame::from_parts(page, 0, 0, Delay::from_numer_denom_ms(ms, 1))
        });
        encoder.encode_frames(frames).map_err(encode_error)
    }
}

fn encode_error(e: image::ImageError) -> BackendError {
    BackendError::Encode(e.to_string())
}

fn decode_error(e: image::ImageError) -> BackendError {
    BackendError::Decode(e.to_string())
}

fn source_type(format: ImageFormat) -> Option<ImageType> {
    match format {
        ImageFormat::Jpeg => Some(ImageType::Jpeg),
        ImageFormat::Png => Some(ImageType::Png),
        ImageFormat::WebP => Some(ImageType::Webp),
        ImageFormat::Tiff => Some(ImageType::Tiff),
        ImageFormat::Gif => Some(ImageType::Gif),
        ImageFormat::Avif => Some(ImageType::Heif),
        _ => None,
    }
}

/// Decode a single-frame image, keeping its ICC profile and EXIF orientation.
fn decode_still(bytes: &[u8], format: ImageFormat) -> Result<RasterImage, BackendError> {
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format)
        .into_decoder()
        .map_err(decode_error)?;
    let icc = decoder.icc_profile().ok().flatten();
    let orientation = decoder
        .exif_metadata()
        .ok()
        .flatten()
        .and_then(|exif| Orientation::from_exif_chunk(&exif));
    let pixels = DynamicImage::from_decoder(decoder).map_err(decode_error)?;

    let mut img = RasterImage::from_dynamic(pixels);
    if let Some(icc) = icc {
        img.set_tag(tags::ICC_PROFILE, TagValue::Blob(icc));
    }
    if let Some(orientation) = orientation {
        img.set_tag(
            tags::ORIENTATION,
            TagValue::Int(i32::from(orientation.to_exif())),
        );
    }
    Ok(img)
}

/// Decode every GIF frame into a filmstrip, one page per frame.
fn decode_gif(bytes: &[u8]) -> Result<RasterImage, BackendError> {
    let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(decode_error)?;
    let frames = decoder.into_frames().collect_frames().map_err(decode_error)?;
    let first = frames
        .first()
        .ok_or_else(|| BackendError::Decode("GIF has no frames".into()))?;
    let (width, page_height) = first.buffer().dimensions();

    let pages: Vec<DynamicImage> = frames
        .iter()
        .map(|f| DynamicImage::ImageRgba8(f.buffer().clone()))
        .collect();
    let refs: Vec<&DynamicImage> = pages.iter().collect();
    let strip = stack_pages(&refs)
        .ok_or_else(|| BackendError::Decode("GIF frames differ in width".into()))?;

    let delays: Vec<i32> = frames
        .iter()
        .map(|f| {
            let (numer, denom) = f.delay().numer_denom_ms();
            (numer / denom.max(1)) as i32
        })
        .collect();

    let mut img = RasterImage::from_dynamic(strip);
    img.page_height = page_height;
    img.set_tag(tags::N_PAGES, TagValue::Int(frames.len() as i32));
    if frames.len() > 1 {
        img.set_tag(tags::PAGE_HEIGHT, TagValue::Int(page_height as i32));
        img.set_tag(tags::DELAY, TagValue::IntArray(delays));
    }
    tracing::debug!(width, page_height, pages = frames.len(), "Decoded GIF filmstrip");
    Ok(img)
}

/// Concatenate same-width row-major buffers, which stacks them vertically.
fn stack<P: Pixel>(
    parts: impl Iterator<Item = ImageBuffer<P, Vec<P::Subpixel>>>,
    width: u32,
) -> Option<ImageBuffer<P, Vec<P::Subpixel>>> {
    let mut raw = Vec::new();
    let mut height = 0;
    for part in parts {
        height += part.height();
        raw.extend_from_slice(part.as_raw());
    }
    ImageBuffer::from_raw(width, height, raw)
}

/// Stack images top to bottom in the pixel layout of the first one.
fn stack_pages(parts: &[&DynamicImage]) -> Option<DynamicImage> {
    let first = parts.first()?;
    let width = first.width();
    if parts.iter().any(|p| p.width() != width) {
        return None;
    }
    let parts = parts.iter();
    Some(match first {
        DynamicImage::ImageLuma8(_) => {
            DynamicImage::ImageLuma8(stack(parts.map(|p| p.to_luma8()), width)?)
        }
        DynamicImage::ImageLumaA8(_) => {
            DynamicImage::ImageLumaA8(stack(parts.map(|p| p.to_luma_alpha8()), width)?)
        }
        DynamicImage::ImageRgb8(_) => {
            DynamicImage::ImageRgb8(stack(parts.map(|p| p.to_rgb8()), width)?)
        }
        DynamicImage::ImageLuma16(_) => {
            DynamicImage::ImageLuma16(stack(parts.map(|p| p.to_luma16()), width)?)
        }
        DynamicImage::ImageLumaA16(_) => {
            DynamicImage::ImageLumaA16(stack(parts.map(|p| p.to_luma_alpha16()), width)?)
        }
        DynamicImage::ImageRgb16(_) => {
            DynamicImage::ImageRgb16(stack(parts.map(|p| p.to_rgb16()), width)?)
        }
        DynamicImage::ImageRgba16(_) => {
            DynamicImage::ImageRgba16(stack(parts.map(|p| p.to_rgba16()), width)?)
        }
        DynamicImage::ImageRgb32F(_) => {
            DynamicImage::ImageRgb32F(stack(parts.map(|p| p.to_rgb32f()), width)?)
        }
        DynamicImage::ImageRgba32F(_) => {
            DynamicImage::ImageRgba32F(stack(parts.map(|p| p.to_rgba32f()), width)?)
        }
        _ => DynamicImage::ImageRgba8(stack(parts.map(|p| p.to_rgba8()), width)?),
    })
}

fn stack_owned(parts: &[DynamicImage]) -> Result<DynamicImage, BackendError> {
    let refs: Vec<&DynamicImage> = parts.iter().collect();
    stack_pages(&refs).ok_or_else(|| BackendError::InvalidGeometry("nothing to stack".into()))
}

impl BackendImage for RasterImage {
    fn width(&self) -> u32 {
        self.node.width
    }

    fn height(&self) -> u32 {
        self.node.height
    }

    fn bands(&self) -> u32 {
        u32::from(self.node.color.channel_count())
    }

    fn interpretation(&self) -> Interpretation {
        match self.node.color {
            ColorType::L8 | ColorType::La8 => Interpretation::BW,
            ColorType::L16 | ColorType::La16 => Interpretation::Grey16,
            ColorType::Rgb16 | ColorType::Rgba16 => Interpretation::Rgb16,
            _ => Interpretation::Srgb,
        }
    }

    fn band_format(&self) -> BandFormat {
        match self.node.color.bytes_per_pixel() / self.node.color.channel_count() {
            1 => BandFormat::Uchar,
            2 => BandFormat::Ushort,
            _ => BandFormat::Float,
        }
    }

    fn xres(&self) -> f64 {
        self.xres
    }

    fn has_alpha(&self) -> bool {
        self.node.color.has_alpha()
    }

    fn loader(&self) -> Option<&str> {
        self.loader.as_deref()
    }

    fn tag(&self, name: &str) -> Option<TagValue> {
        self.tags.get(name).cloned()
    }

    fn set_tag(&mut self, name: &str, value: TagValue) {
        if name == tags::PAGE_HEIGHT {
            // Only page heights that evenly divide the image are honoured.
            if let Some(h) = value.as_int().and_then(|h| u32::try_from(h).ok()) {
                if h > 0 && self.height() % h == 0 {
                    self.page_height = h;
                }
            }
        }
        self.tags.insert(name.to_string(), value);
    }

    fn page_height(&self) -> u32 {
        self.page_height
    }

    fn extract_area(
        &self,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, BackendError> {
        let fits = left.checked_add(width).is_some_and(|r| r <= self.width())
            && top.checked_add(height).is_some_and(|b| b <= self.height());
        if !fits || width == 0 || height == 0 {
            return Err(BackendError::InvalidGeometry(format!(
                "extract {width}x{height}+{left}+{top} outside {}x{}",
                self.width(),
                self.height()
            )));
        }
        let page_height = if height == self.height() {
            self.page_height
        } else {
            height
        };
        let op = Op::Extract {
            input: Arc::clone(&self.node),
            left,
            top,
        };
        Ok(self.derive(Node::derived(op, width, height, self.node.color), page_height))
    }

    fn join_vertical(pages: Vec<Self>) -> Result<Self, BackendError> {
        let first = pages
            .first()
            .ok_or_else(|| BackendError::InvalidGeometry("nothing to join".into()))?;
        if pages.iter().any(|p| p.width() != first.width()) {
            return Err(BackendError::InvalidGeometry("pages differ in width".into()));
        }
        let height = pages
            .iter()
            .try_fold(0u32, |sum, p| sum.checked_add(p.height()))
            .ok_or_else(|| BackendError::InvalidGeometry("joined image too tall".into()))?;
        let parts = pages.iter().map(|p| Arc::clone(&p.node)).collect();
        let node = Node::derived(Op::Join(parts), first.width(), height, first.node.color);
        Ok(first.derive(node, first.height()))
    }

    fn line_cache(&self, tile_height: u32) -> Result<Self, BackendError> {
        if tile_height == 0 {
            return Err(BackendError::InvalidGeometry(
                "line cache needs a tile height".into(),
            ));
        }
        let mut img = self.derive_shared();
        img.tile_height = tile_height;
        Ok(img)
    }

    fn resize(&self, width: u32, height: u32) -> Result<Self, BackendError> {
        let pages = self.n_pages();
        if width == 0 || height == 0 || pages == 0 || height % pages != 0 {
            return Err(BackendError::InvalidGeometry(format!(
                "cannot resize {pages} pages to {width}x{height}"
            )));
        }
        let op = Op::Resize {
            input: Arc::clone(&self.node),
            pages,
        };
        let node = Node::derived(op, width, height, self.node.color);
        Ok(self.derive(node, height / pages))
    }

    fn rotate(&self, angle: Angle) -> Result<Self, BackendError> {
        let pages = self.n_pages().max(1);
        let (width, page_height) = match angle {
            Angle::D0 => return Ok(self.derive_shared()),
            Angle::D180 => (self.width(), self.page_height),
            Angle::D90 | Angle::D270 => (self.page_height, self.width()),
        };
        let op = Op::Rotate {
            input: Arc::clone(&self.node),
            pages,
            angle,
        };
        let node = Node::derived(op, width, page_height * pages, self.node.color);
        Ok(self.derive(node, page_height))
    }

    fn on_eval(&self, handler: EvalHandler) {
        self.eval
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn is_killed(&self) -> bool {
        self.eval.killed.load(Ordering::SeqCst)
    }

    /// Run every pending operation and return a handle over the result.
    ///
    /// Work is split into bands of `tile_height` rows (or one page for
    /// rotations) and run on the rayon pool, one batch per worker thread.
    /// Handlers are notified after every batch and the kill switch is
    /// checked before the next one.
    fn evaluate(&self) -> Result<Self, BackendError> {
        let pixels = self.render()?;
        Ok(self.derive(Node::source(pixels), self.page_height))
    }

    fn write_to_buffer(&self, output: Output, quality: u8) -> Result<Vec<u8>, BackendError> {
        use image::codecs::{
            avif::AvifEncoder, jpeg::JpegEncoder, png::PngEncoder, tiff::TiffEncoder,
            webp::WebPEncoder,
        };

        if output == Output::Json {
            return Err(json_is_not_pixels());
        }
        let pixels = self.render()?;
        let pixels = pixels.as_ref();
        let mut buf = Vec::new();
        match output {
            Output::Jpeg => DynamicImage::ImageRgb8(pixels.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
                .map_err(encode_error)?,
            Output::Png => pixels
                .write_with_encoder(PngEncoder::new(&mut buf))
                .map_err(encode_error)?,
            // Lossless only; quality does not apply.
            Output::Webp => eight_bit(pixels)
                .write_with_encoder(WebPEncoder::new_lossless(&mut buf))
                .map_err(encode_error)?,
            Output::Avif => eight_bit(pixels)
                .write_with_encoder(AvifEncoder::new_with_speed_quality(&mut buf, 6, quality))
                .map_err(encode_error)?,
            Output::Tiff => pixels
                .write_with_encoder(TiffEncoder::new(Cursor::new(&mut buf)))
                .map_err(encode_error)?,
            Output::Gif => self.encode_gif(pixels, &mut buf)?,
            Output::Json => return Err(json_is_not_pixels()),
        }
        Ok(buf)
    }
}

fn json_is_not_pixels() -> BackendError {
    BackendError::Unsupported("json is a description, not a pixel format".into())
}

/// 8-bit RGB(A) view for encoders that accept nothing else.
fn eight_bit(pixels: &DynamicImage) -> DynamicImage {
    if pixels.color().has_alpha() {
        DynamicImage::ImageRgba8(pixels.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(pixels.to_rgb8())
    }
}
