//! False-color rendering variants.

use std::fmt;

use super::Representation;

/// A mapping from multi-band data to displayable RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FalseColoring {
    /// CIE color matching functions applied to the spectrum
    Cmf,
    /// First three principal components of the image
    Pca,
    /// First three principal components of the gradient
    PcaGrad,
    /// Spectral angle to three reference spectra of the image
    Som,
    /// Spectral angle to three reference spectra of the gradient
    SomGrad,
}

impl FalseColoring {
    pub fn all() -> &'static [FalseColoring] {
        &[
            FalseColoring::Cmf,
            FalseColoring::Pca,
            FalseColoring::PcaGrad,
            FalseColoring::Som,
            FalseColoring::SomGrad,
        ]
    }

    /// Representation the rendering is computed from.
    pub fn basis(self) -> Representation {
        match self {
            FalseColoring::Cmf | FalseColoring::Pca | FalseColoring::Som => Representation::Img,
            FalseColoring::PcaGrad | FalseColoring::SomGrad => Representation::Grad,
        }
    }

    pub fn is_based_on(self, repr: Representation) -> bool {
        self.basis() == repr
    }

    pub fn name(self) -> &'static str {
        match self {
            FalseColoring::Cmf => "True Color (CIE)",
            FalseColoring::Pca => "Spectral PCA",
            FalseColoring::PcaGrad => "Spectral-gradient PCA",
            FalseColoring::Som => "Spectral angle",
            FalseColoring::SomGrad => "Spectral-gradient angle",
        }
    }
}

impl fmt::Display for FalseColoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis() {
        assert!(FalseColoring::Cmf.is_based_on(Representation::Img));
        assert!(FalseColoring::PcaGrad.is_based_on(Representation::Grad));
        assert!(!FalseColoring::SomGrad.is_based_on(Representation::Img));
    }
}
