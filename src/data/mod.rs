//! Multi-band image buffers and the loaders that produce them.
//!
//! - `MultiImage`: one representation of (part of) the image, `(row, col, band)`
//! - `SharedImage`: replaceable buffer shared with the worker thread
//! - `LoaderRegistry`: extensible file format detection
//!
//! ## Adding New Formats
//!
//! 1. Create a new loader in `loaders/` implementing `SpectralLoader`
//! 2. Register it in `LoaderRegistry::new()`

mod loader;
pub mod loaders;
mod multi_image;

pub use loader::{LoadError, LoaderRegistry, SpectralLoader};
pub use multi_image::{MultiImage, SharedImage, linspace};
