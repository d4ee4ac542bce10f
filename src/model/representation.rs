//! Image representations and their dependency order.

use std::fmt;

/// A derived view of the image.
///
/// Variants are declared in dependency order: every representation comes after
/// the one it is computed from. [`Representation::all`] returns them in that
/// order and the ROI update walks it front to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Representation {
    /// The raw (possibly spectrum-rescaled) image
    Img,
    /// Per-pixel L2-normalized spectra
    Nrm,
    /// Spectral gradient (log-ratio of adjacent bands)
    Grad,
    /// Principal components of `Img`
    ImgPca,
    /// Principal components of `Grad`
    GradPca,
}

const ALL: [Representation; 5] = [
    Representation::Img,
    Representation::Nrm,
    Representation::Grad,
    Representation::ImgPca,
    Representation::GradPca,
];

impl Representation {
    /// All representations, base before derived.
    pub fn all() -> &'static [Representation] {
        &ALL
    }

    /// The representation this one is computed from, `None` for `Img`.
    pub fn basis(self) -> Option<Representation> {
        match self {
            Representation::Img => None,
            Representation::Nrm | Representation::Grad | Representation::ImgPca => {
                Some(Representation::Img)
            }
            Representation::GradPca => Some(Representation::Grad),
        }
    }

    /// Position in the update order.
    pub fn order(self) -> usize {
        ALL.iter().position(|r| *r == self).unwrap_or(ALL.len())
    }

    pub fn name(self) -> &'static str {
        match self {
            Representation::Img => "IMG",
            Representation::Nrm => "NRM",
            Representation::Grad => "GRAD",
            Representation::ImgPca => "IMGPCA",
            Representation::GradPca => "GRADPCA",
        }
    }

    /// True when every basis precedes its dependants in [`Representation::all`].
    pub fn dependency_order_is_valid() -> bool {
        ALL.iter().all(|repr| match repr.basis() {
            Some(basis) => basis.order() < repr.order(),
            None => true,
        })
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
