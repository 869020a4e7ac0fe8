//! # pixelsmith
//!
//! The geometry and metadata layer of an on-the-fly image transformation
//! service. Given a decoded image and a requested output box, it works out
//! where to crop, keeps multi-page (animated) images intact while cropping
//! them, decides which formats can be read and written, describes images as
//! JSON, and cancels pixel work that runs past a deadline.
//!
//! # Architecture
//!
//! ```text
//! format      loader name → ImageType → Output, saver mask
//! metadata    profile, density, orientation, JSON description
//! imaging     position math, multi-page crop, deadline, backend
//! pipeline    all of the above, in order, over one image
//! ```
//!
//! The pixel engine is consumed through one trait,
//! [`imaging::BackendImage`]. Everything above it is generic, so the control
//! flow is unit tested against a recording mock while
//! [`imaging::RasterImage`] runs it for real on the `image` crate.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`format`] | Loader id ↔ image type ↔ output format ↔ extension; capability tables; saver bitmask |
//! | [`metadata`] | Read-only image queries and the fixed-order descriptive JSON document |
//! | [`imaging`] | Anchor/focal placement, multi-page crop reassembly, evaluation deadline, backends |
//! | [`pipeline`] | Type/output resolution, cover resize, gravity crop, encode or describe |
//! | [`config`] | `config.toml` loading, validation and merging over stock defaults |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Filmstrips
//!
//! A multi-page image is one tall image with pages stacked top to bottom and
//! a `page-height` tag. Every derive operation works on the whole strip, so a
//! crop has to be applied per page and the pages stacked again
//! ([`imaging::crop_multi_page`]); a resize has to scale each page so page
//! boundaries stay on whole rows.
//!
//! ## Deferred Pixel Work
//!
//! Derive operations on [`imaging::RasterImage`] record what to do and report
//! the resulting geometry at once. Pixels are computed on evaluation, in
//! bands or pages, with evaluation handlers told about progress between
//! units. A deadline installed just before encoding therefore covers the
//! resize, rotation and crop work as well.
//!
//! ## Deadline Owned by Its Handler
//!
//! The evaluation budget lives inside the progress-handler closure registered
//! on one image handle ([`imaging::setup_timeout_handler`]). There is no side
//! table and no global state: when the handle goes, the budget goes with it.
//!
//! ## Exhaustive Format Tables
//!
//! Every mapping in [`format`] is a `match` with no wildcard arm. Adding an
//! image type or output is a compile error until every table knows about it.

pub mod config;
pub mod format;
pub mod imaging;
pub mod metadata;
pub mod output;
pub mod pipeline;
