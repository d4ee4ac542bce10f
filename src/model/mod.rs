//! Data models shared by the controller and its collaborators.

mod false_coloring;
mod label;
mod representation;

pub use false_coloring::FalseColoring;
pub use label::{Label, LabelId, default_label_color};
pub use representation::Representation;
