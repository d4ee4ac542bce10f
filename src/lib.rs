//! Specula - Spectral image analysis core
//!
//! The controller mediating between interactive views and the models that
//! compute image representations, distribution views and false colorings
//! of a multispectral image on a background worker.

pub mod config;
pub mod constants;
pub mod controller;
pub mod data;
pub mod geometry;
pub mod model;
pub mod models;
pub mod notify;
pub mod subscription;

pub use config::{AppConfig, ConfigError};
pub use controller::{Collaborators, Controller, RoiUpdate, StartupError, Tools, initial_roi};
pub use geometry::{Rect, RectDiff, rect_transform};
pub use model::{FalseColoring, Representation};
pub use notify::{Mailbox, Notification, Request, RequestSink};
pub use subscription::{ImageBandId, SubscriberId};
