use crate::common::{ConcentrationsSection, FitConfiguration};
use crate::domain::FastFitResult;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitParameter {
    pub name: String,
    pub free: bool,
    /// Continuum parameters are never checked for negative values.
    pub background: bool,
}

impl FitParameter {
    pub fn new(name: impl Into<String>, free: bool, background: bool) -> Self {
        Self {
            name: name.into(),
            free,
            background,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupArea {
    pub group: String,
    pub area: f64,
}

impl GroupArea {
    pub fn new(group: impl Into<String>, area: f64) -> Self {
        Self {
            group: group.into(),
            area,
        }
    }
}

/// Spectrum model that supplies the linearised basis for the batch fit.
pub trait FitModel {
    fn configuration(&self) -> &FitConfiguration;

    fn configure(&mut self, configuration: FitConfiguration) -> FastFitResult<()>;

    /// Load the representative spectrum and restrict it to `[xmin, xmax]`.
    fn set_data(
        &mut self,
        x: Option<&[f64]>,
        y: &[f64],
        xmin: Option<f64>,
        xmax: Option<f64>,
    ) -> FastFitResult<()>;

    fn estimate(&mut self) -> FastFitResult<()>;

    fn parameters(&self) -> &[FitParameter];

    /// x values of the fit window, one per basis row.
    fn xdata(&self) -> &[f64];

    /// Partial derivative of the model with respect to parameter
    /// `parameter_index` (an index into [`FitModel::parameters`]) over `xdata`.
    fn linear_derivative(&self, parameter_index: usize) -> FastFitResult<Vec<f64>>;

    /// Linear fit of the loaded spectrum reported as areas of the free
    /// non-background groups.
    fn linear_group_areas(&mut self) -> FastFitResult<Vec<GroupArea>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLine {
    pub element: String,
    pub transitions: String,
}

impl ReferenceLine {
    pub fn is_unset(&self) -> bool {
        let element = self.element.trim();
        element.is_empty() || element.eq_ignore_ascii_case("none")
    }

    /// Group label `"<element> <first transition>"` the reference refers to.
    pub fn group_label(&self) -> Option<String> {
        let transition = self.transitions.split_whitespace().next()?;
        Some(format!("{} {}", self.element.trim(), transition))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerMassFractions {
    pub name: String,
    pub mass_fractions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConcentrationsOutcome {
    pub mass_fractions: BTreeMap<String, f64>,
    pub layers: Vec<LayerMassFractions>,
    pub reference: Option<ReferenceLine>,
}

/// Converts fitted group areas into mass fractions.
pub trait ConcentrationsConverter {
    fn process_fit_areas(
        &self,
        section: &ConcentrationsSection,
        areas: &[GroupArea],
    ) -> FastFitResult<ConcentrationsOutcome>;
}
