//! Built-in multi-band image loaders.
//!
//! This module contains implementations of the `SpectralLoader` trait
//! for various file formats.

mod npy_loader;
mod raster_loader;

pub use npy_loader::NpyLoader;
pub use raster_loader::RasterLoader;
