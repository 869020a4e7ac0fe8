//! Image geometry and the pixel backend.
//!
//! | Operation | Where |
//! |---|---|
//! | **Anchor / focal placement** | [`position`], pure arithmetic |
//! | **Multi-page crop** | [`crop`], per-page extract + one vertical join |
//! | **Deadline** | [`deadline`], evaluation progress handler |
//! | **Decode / resize / encode** | [`raster`], the `image` crate |
//!
//! The module is split into:
//! - **Position**: Pure functions for placement math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`BackendImage`] trait + [`RasterImage`]
//! - **Crop / Deadline**: Operations generic over any backend

pub mod backend;
pub mod crop;
pub mod deadline;
mod params;
pub mod position;
pub mod raster;

pub use backend::{
    Angle, BackendError, BackendImage, BandFormat, EvalHandler, EvalSink, Interpretation,
    Progress, TagValue, tags,
};
pub use crop::{crop_multi_page, crop_pages};
pub use deadline::{DeadlineGovernor, setup_timeout_handler};
pub use params::{Quality, Rect};
pub use position::{
    CropGeometry, Gravity, InvalidGravity, Position, calculate_focal_point, calculate_position,
};
pub use raster::RasterImage;
