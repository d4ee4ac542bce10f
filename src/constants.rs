//! Global constants for the Specula core

/// Images with more pixels than this start with a capped ROI
pub const INITIAL_ROI_AREA_LIMIT: i64 = 262_144;

/// Maximum side length of the capped initial ROI
pub const INITIAL_ROI_MAX_SIDE: i32 = 512;

/// Incremental ROI updates are used while `sub + add <= threshold * new area`
pub const DEFAULT_INCREMENTAL_THRESHOLD: f64 = 1.0;

/// Name of the background worker thread
pub const WORKER_THREAD_NAME: &str = "specula-tasks";

/// Quantization levels per band in distribution view bin sets
pub const DEFAULT_DIST_VIEW_BINS: u32 = 64;

/// Wavelength range assigned to images that carry no band metadata (nm)
pub const DEFAULT_SPECTRUM_START_NM: f32 = 400.0;
pub const DEFAULT_SPECTRUM_END_NM: f32 = 700.0;

/// Default k-means parameters
pub const DEFAULT_CLUSTERS: usize = 4;
pub const DEFAULT_CLUSTER_ITERATIONS: usize = 10;

/// Default spectral distance for seeded region growing
pub const DEFAULT_SEGMENTATION_THRESHOLD: f32 = 0.1;

/// Number of principal components kept by the PCA representations
pub const PCA_COMPONENTS: usize = 10;

/// Exit status used when the image cannot be loaded
pub const EXIT_LOAD_FAILURE: i32 = 4;
