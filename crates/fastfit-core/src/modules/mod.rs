pub mod background;
pub mod concentrations;
pub mod fastfit;
pub mod peaks;

mod traits;

pub use background::{AnchorList, BackgroundEstimator};
pub use concentrations::TabulatedConverter;
pub use fastfit::{BatchLinearFitter, FastFitRequest, FitterOptions};
pub use peaks::GaussianPeakModel;
pub use traits::{
    ConcentrationsConverter, ConcentrationsOutcome, FitModel, FitParameter, GroupArea,
    LayerMassFractions, ReferenceLine,
};
