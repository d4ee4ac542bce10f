//! Trait-based multi-band image loading.
//!
//! New formats are added by implementing [`SpectralLoader`] and registering
//! the loader in [`LoaderRegistry::new`].
//!
//! ## Supported Formats
//!
//! - **Standard Images**: PNG, JPEG, BMP, TIFF, WebP (3-band RGB)
//! - **NumPy Arrays**: `.npy` files with 2D `(H, W)` or 3D `(B, H, W)` / `(H, W, B)` arrays

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::data::MultiImage;

/// Errors that can occur while loading an image.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A loader accepted the data but failed to decode it
    #[error("[{loader}] {message}")]
    Decode {
        loader: &'static str,
        message: String,
    },

    /// No loader could handle the data
    #[error("No loader could handle the data (file: {filename:?})")]
    Unsupported { filename: Option<String> },

    /// The image has no pixels or no bands
    #[error("Degenerate image: {width}x{height} with {bands} band(s)")]
    Degenerate {
        width: usize,
        height: usize,
        bands: usize,
    },
}

impl LoadError {
    /// Create a decode error for the given loader.
    pub fn decode(loader: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            loader,
            message: message.into(),
        }
    }
}

/// A file format loader producing a full-size [`MultiImage`].
pub trait SpectralLoader: Send + Sync {
    /// Unique identifier for this loader (e.g., "image", "npy").
    fn id(&self) -> &'static str;

    /// File extensions this loader handles (lowercase, without dots).
    fn extensions(&self) -> &'static [&'static str];

    /// Check magic bytes to decide whether this loader can likely handle `data`.
    fn can_load(&self, data: &[u8]) -> bool;

    /// Decode raw file bytes.
    fn load(&self, data: &[u8]) -> Result<MultiImage, LoadError>;

    /// Priority for format detection (higher = checked first).
    fn priority(&self) -> i32 {
        0
    }
}

/// Registry of available loaders.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn SpectralLoader>>,
}

impl LoaderRegistry {
    /// Create a new registry with all built-in loaders.
    pub fn new() -> Self {
        let mut registry = Self {
            loaders: Vec::new(),
        };
        registry.register(Box::new(super::loaders::RasterLoader));
        registry.register(Box::new(super::loaders::NpyLoader));
        registry
    }

    /// Register a new loader.
    pub fn register(&mut self, loader: Box<dyn SpectralLoader>) {
        self.loaders.push(loader);
        self.loaders.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// All supported file extensions, sorted and deduplicated.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .loaders
            .iter()
            .flat_map(|l| l.extensions().iter().copied())
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    /// Load data, auto-detecting the format.
    ///
    /// Tries loaders by file extension first, then by magic bytes.
    pub fn load(&self, data: &[u8], filename: Option<&str>) -> Result<MultiImage, LoadError> {
        let extension = filename
            .and_then(|f| f.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase());

        let mut last_error = None;

        if let Some(ref ext) = extension {
            for loader in self
                .loaders
                .iter()
                .filter(|l| l.extensions().iter().any(|e| *e == ext.as_str()))
            {
                match loader.load(data) {
                    Ok(image) => {
                        log::debug!("Loaded with {} loader (by extension)", loader.id());
                        return Ok(image);
                    }
                    Err(e) => {
                        log::trace!("Loader {} failed: {}", loader.id(), e);
                        last_error = Some(e);
                    }
                }
            }
        }

        if let Some(loader) = self.loaders.iter().find(|l| l.can_load(data)) {
            match loader.load(data) {
                Ok(image) => {
                    log::debug!("Loaded with {} loader (by detection)", loader.id());
                    return Ok(image);
                }
                Err(e) => {
                    log::trace!("Detected loader {} failed: {}", loader.id(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LoadError::Unsupported {
            filename: filename.map(str::to_string),
        }))
    }

    /// Read and decode a file, rejecting images without pixels or bands.
    pub fn load_file(&self, path: &Path) -> Result<MultiImage, LoadError> {
        let data = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let image = self.load(&data, filename.as_deref())?;

        if image.is_empty() {
            return Err(LoadError::Degenerate {
                width: image.width(),
                height: image.height(),
                bands: image.num_bands(),
            });
        }
        log::info!(
            "Loaded {:?}: {}x{} with {} bands",
            path,
            image.width(),
            image.height(),
            image.num_bands()
        );
        Ok(image)
    }

    /// Check if a filename has a supported extension.
    pub fn is_supported_file(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.supported_extensions()
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        let registry = LoaderRegistry::new();
        let extensions = registry.supported_extensions();
        assert!(extensions.contains(&"png"));
        assert!(extensions.contains(&"npy"));
    }

    #[test]
    fn test_is_supported_file() {
        let registry = LoaderRegistry::new();
        assert!(registry.is_supported_file("scene.npy"));
        assert!(registry.is_supported_file("SCENE.PNG"));
        assert!(!registry.is_supported_file("notes.txt"));
    }

    #[test]
    fn test_unknown_data_is_unsupported() {
        let registry = LoaderRegistry::new();
        let err = registry.load(&[0u8; 16], Some("blob.bin")).unwrap_err();
        assert!(matches!(err, LoadError::Unsupported { .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let registry = LoaderRegistry::new();
        let err = registry
            .load_file(Path::new("/nonexistent/specula/scene.png"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
