//! Linear reference model: polynomial continuum plus fixed-shape Gaussian
//! peaks whose amplitudes are the fitted parameters.

mod model;

use crate::common::FitConfiguration;
use crate::domain::{FastFitError, FastFitResult, WeightPolicy};
use crate::modules::background::{AnchorList, BackgroundEstimator};
use crate::modules::traits::{FitModel, FitParameter, GroupArea};
use crate::numerics::{WeightedLstsqInput, solve_weighted_lstsq};
use faer::Mat;

use model::{
    FitWindow, background_derivative, build_parameters, gaussian_area, gaussian_profile,
    select_window, validate_peak_section,
};

#[derive(Debug, Clone, Default)]
pub struct GaussianPeakModel {
    configuration: FitConfiguration,
    parameters: Vec<FitParameter>,
    window: Option<FitWindow>,
    derivatives: Option<Vec<Vec<f64>>>,
}

impl GaussianPeakModel {
    pub fn new(configuration: FitConfiguration) -> FastFitResult<Self> {
        let mut model = Self::default();
        model.configure(configuration)?;
        Ok(model)
    }

    fn peak_sigma(&self, parameter_index: usize) -> Option<f64> {
        let section = &self.configuration.peaks;
        parameter_index
            .checked_sub(section.background_terms)
            .and_then(|peak_index| section.peaks.get(peak_index))
            .map(|peak| peak.sigma)
    }

    fn estimated(&self) -> FastFitResult<(&FitWindow, &[Vec<f64>])> {
        match (&self.window, &self.derivatives) {
            (Some(window), Some(derivatives)) => Ok((window, derivatives.as_slice())),
            _ => Err(FastFitError::missing_input(
                "RUN.MODEL_NOT_ESTIMATED",
                "model derivatives are only available after set_data and estimate",
            )),
        }
    }

    /// Representative spectrum over the window with the continuum removed when
    /// background stripping is configured.
    fn stripped_window(&self, window: &FitWindow) -> Vec<f64> {
        let fit = &self.configuration.fit;
        let mut ydata = window.ydata.clone();
        if fit.stripflag {
            let anchors = fit
                .active_anchors()
                .map(|values| AnchorList::from_calibration(values, &window.xdata))
                .unwrap_or_default();
            BackgroundEstimator::from_fit_section(fit).subtract_in_place(&mut ydata, &anchors);
        }
        ydata
    }
}

impl FitModel for GaussianPeakModel {
    fn configuration(&self) -> &FitConfiguration {
        &self.configuration
    }

    fn configure(&mut self, configuration: FitConfiguration) -> FastFitResult<()> {
        validate_peak_section(&configuration.peaks)?;
        self.parameters = build_parameters(&configuration.peaks);
        self.configuration = configuration;
        self.derivatives = None;
        Ok(())
    }

    fn set_data(
        &mut self,
        x: Option<&[f64]>,
        y: &[f64],
        xmin: Option<f64>,
        xmax: Option<f64>,
    ) -> FastFitResult<()> {
        self.window = Some(select_window(x, y, xmin, xmax)?);
        self.derivatives = None;
        Ok(())
    }

    fn estimate(&mut self) -> FastFitResult<()> {
        let window = self.window.as_ref().ok_or_else(|| {
            FastFitError::missing_input("RUN.MODEL_NO_DATA", "set_data must precede estimate")
        })?;
        if self.parameters.is_empty() {
            return Err(FastFitError::configuration(
                "CONFIG.NO_PARAMETERS",
                "model defines neither continuum terms nor peaks",
            ));
        }

        let section = &self.configuration.peaks;
        let mut derivatives = Vec::with_capacity(self.parameters.len());
        for order in 0..section.background_terms {
            derivatives.push(background_derivative(order, &window.xdata));
        }
        for peak in &section.peaks {
            derivatives.push(gaussian_profile(peak.center, peak.sigma, &window.xdata));
        }
        self.derivatives = Some(derivatives);
        Ok(())
    }

    fn parameters(&self) -> &[FitParameter] {
        &self.parameters
    }

    fn xdata(&self) -> &[f64] {
        match &self.window {
            Some(window) => &window.xdata,
            None => &[],
        }
    }

    fn linear_derivative(&self, parameter_index: usize) -> FastFitResult<Vec<f64>> {
        let (_, derivatives) = self.estimated()?;
        derivatives.get(parameter_index).cloned().ok_or_else(|| {
            FastFitError::configuration(
                "CONFIG.PARAMETER_INDEX",
                format!(
                    "parameter index {parameter_index} is out of range for {} parameters",
                    derivatives.len()
                ),
            )
        })
    }

    fn linear_group_areas(&mut self) -> FastFitResult<Vec<GroupArea>> {
        let (window, derivatives) = self.estimated()?;
        let free: Vec<usize> = self
            .parameters
            .iter()
            .enumerate()
            .filter(|(_, parameter)| parameter.free)
            .map(|(index, _)| index)
            .collect();
        if free.is_empty() {
            return Ok(Vec::new());
        }

        let ydata = self.stripped_window(window);
        let basis = Mat::from_fn(ydata.len(), free.len(), |row, col| derivatives[free[col]][row]);
        let observations = Mat::from_fn(ydata.len(), 1, |row, _| ydata[row]);
        let solution = solve_weighted_lstsq(WeightedLstsqInput::new(
            basis.as_ref(),
            observations.as_ref(),
            WeightPolicy::None,
        ))?;

        let mut areas = Vec::new();
        for (column, &parameter_index) in free.iter().enumerate() {
            let parameter = &self.parameters[parameter_index];
            if parameter.background {
                continue;
            }
            if let Some(sigma) = self.peak_sigma(parameter_index) {
                let amplitude = solution.coefficients[(column, 0)];
                areas.push(GroupArea::new(
                    parameter.name.clone(),
                    gaussian_area(amplitude, sigma),
                ));
            }
        }
        Ok(areas)
    }
}
