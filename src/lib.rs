//! svgsnap renders arbitrary SVG markup to PNG by driving a pool of
//! headless Chrome instances over the DevTools protocol instead of
//! reimplementing an SVG rasterizer.
//!
//! An upload is staged in an in-memory store, a minimal bridge document
//! embedding it is served back to Chrome, and an element-scoped screenshot
//! of the rendered image is returned to the caller.

pub mod application;
pub mod config;
pub mod infra;
