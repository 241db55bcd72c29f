pub mod config;
pub mod constants;

pub use config::{
    ConcentrationsSection, ConfigLoadError, FitConfiguration, FitSection, LayerSensitivities,
    PeakDefinition, PeakModelSection, StripAlgorithm, load_fit_configuration,
};
