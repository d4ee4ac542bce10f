//! Label data model for pixel labelings.

/// Label index stored in label masks. 0 is "unlabeled".
pub type LabelId = i16;

/// A label with a display color.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// Index used in the label mask
    pub id: LabelId,
    /// RGB color for the label
    pub color: [u8; 3],
}

impl Label {
    /// Create a new label with the given index and color.
    pub fn new(id: LabelId, color: [u8; 3]) -> Self {
        Self { id, color }
    }
}

/// Colors handed out to new labels, cycling when exhausted.
const PALETTE: [[u8; 3]; 8] = [
    [0, 0, 0],
    [255, 80, 80],
    [80, 200, 80],
    [80, 120, 255],
    [255, 200, 0],
    [200, 80, 255],
    [0, 200, 200],
    [255, 140, 60],
];

/// Color for the label with the given index.
pub fn default_label_color(id: LabelId) -> [u8; 3] {
    PALETTE[id.unsigned_abs() as usize % PALETTE.len()]
}
