//! Batched linear fit of a whole spectral volume against one shared basis.
//!
//! The model is set up once on a representative spectrum; its linear
//! derivatives form the basis every pixel is solved against. Pixels are
//! processed row by row in bounded column chunks, after which negative peak
//! intensities are repaired by re-solving the affected pixels with reduced
//! bases.

mod chunk;
mod concentrations;
mod refine;
mod representative;

use crate::common::constants::{
    DEFAULT_CHUNK_WIDTH, DEFAULT_MIN_REFIT_FRACTION, DEFAULT_SUM_CHUNK_WIDTH,
    REFIT_PASSES_PER_PARAMETER,
};
use crate::common::{FitConfiguration, StripAlgorithm, load_fit_configuration};
use crate::domain::{
    FastFitError, FastFitOutput, FastFitResult, FitSessionState, ParameterMap, VolumeInput,
    WeightPolicy,
};
use crate::modules::background::{AnchorList, BackgroundEstimator};
use crate::modules::traits::{ConcentrationsConverter, FitModel};
use faer::Mat;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use chunk::{BackgroundRemoval, FitSession};
use concentrations::{concentration_maps, resolve_areas};
use refine::{NegativeRefiner, RefinementOutcome};
use representative::{average_sigma, channel_window, representative_spectrum};

/// Runtime knobs of the batch fitter. Only the refinement limits can change
/// fitted values; chunk widths never do.
#[derive(Debug, Clone, PartialEq)]
pub struct FitterOptions {
    pub chunk_width: usize,
    pub sum_chunk_width: usize,
    pub min_refit_fraction: f64,
    /// Defaults to twice the number of free non-background parameters.
    pub max_refit_passes: Option<usize>,
    /// Report phase timings at info level instead of debug.
    pub verbose: bool,
}

impl Default for FitterOptions {
    fn default() -> Self {
        Self {
            chunk_width: DEFAULT_CHUNK_WIDTH,
            sum_chunk_width: DEFAULT_SUM_CHUNK_WIDTH,
            min_refit_fraction: DEFAULT_MIN_REFIT_FRACTION,
            max_refit_passes: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FastFitRequest<'a> {
    pub x: Option<&'a [f64]>,
    pub y: Option<VolumeInput<'a>>,
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
    pub configuration: Option<FitConfiguration>,
    /// `None` follows the configured `fit.fitweight` flag.
    pub weight: Option<WeightPolicy>,
    pub concentrations: bool,
    pub ysum: Option<&'a [f64]>,
    pub refit: bool,
}

impl Default for FastFitRequest<'_> {
    fn default() -> Self {
        Self {
            x: None,
            y: None,
            xmin: None,
            xmax: None,
            configuration: None,
            weight: None,
            concentrations: false,
            ysum: None,
            refit: true,
        }
    }
}

impl<'a> FastFitRequest<'a> {
    pub fn new(y: VolumeInput<'a>) -> Self {
        Self {
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn with_x(mut self, x: &'a [f64]) -> Self {
        self.x = Some(x);
        self
    }

    pub fn with_window(mut self, xmin: Option<f64>, xmax: Option<f64>) -> Self {
        self.xmin = xmin;
        self.xmax = xmax;
        self
    }

    pub fn with_weight(mut self, weight: WeightPolicy) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_concentrations(mut self, concentrations: bool) -> Self {
        self.concentrations = concentrations;
        self
    }

    pub fn with_ysum(mut self, ysum: &'a [f64]) -> Self {
        self.ysum = Some(ysum);
        self
    }

    pub fn with_refit(mut self, refit: bool) -> Self {
        self.refit = refit;
        self
    }

    pub fn with_configuration(mut self, configuration: FitConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }
}

/// Free parameters in model order, i.e. the basis columns.
#[derive(Debug, Clone)]
struct FreeParameters {
    model_indices: Vec<usize>,
    names: Vec<String>,
    background: Vec<bool>,
}

impl FreeParameters {
    fn from_model<M: FitModel>(model: &M) -> Self {
        let mut free = Self {
            model_indices: Vec::new(),
            names: Vec::new(),
            background: Vec::new(),
        };
        for (index, parameter) in model.parameters().iter().enumerate() {
            if parameter.free {
                free.model_indices.push(index);
                free.names.push(parameter.name.clone());
                free.background.push(parameter.background);
            }
        }
        free
    }

    fn len(&self) -> usize {
        self.model_indices.len()
    }

    /// Free-list indices checked for negative values.
    fn peak_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|index| !self.background[*index]).collect()
    }

    fn peak_names(&self) -> Vec<String> {
        self.peak_indices()
            .into_iter()
            .map(|index| self.names[index].clone())
            .collect()
    }
}

pub struct BatchLinearFitter<M: FitModel> {
    model: M,
    options: FitterOptions,
    state: FitSessionState,
    converter: Option<Box<dyn ConcentrationsConverter>>,
}

impl<M: FitModel> BatchLinearFitter<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            options: FitterOptions::default(),
            state: FitSessionState::Configuring,
            converter: None,
        }
    }

    pub fn with_options(mut self, options: FitterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_converter(mut self, converter: impl ConcentrationsConverter + 'static) -> Self {
        self.converter = Some(Box::new(converter));
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn options(&self) -> &FitterOptions {
        &self.options
    }

    pub fn state(&self) -> FitSessionState {
        self.state
    }

    pub fn set_fit_configuration(&mut self, configuration: FitConfiguration) -> FastFitResult<()> {
        self.model.configure(configuration)
    }

    pub fn set_fit_configuration_file(&mut self, path: impl AsRef<Path>) -> FastFitResult<()> {
        let configuration = load_fit_configuration(path)?;
        self.set_fit_configuration(configuration)
    }

    pub fn fit_multiple_spectra(
        &mut self,
        request: FastFitRequest<'_>,
    ) -> FastFitResult<FastFitOutput> {
        let started = Instant::now();
        self.transition(FitSessionState::Configuring);

        let FastFitRequest {
            x,
            y,
            xmin,
            xmax,
            configuration,
            weight,
            concentrations,
            ysum,
            refit,
        } = request;
        let input = y.ok_or_else(|| {
            FastFitError::missing_input("INPUT.VOLUME", "an observation volume is required")
        })?;
        if let Some(configuration) = configuration {
            self.model.configure(configuration)?;
        }
        check_background_algorithm(self.model.configuration())?;
        let policy = self.resolve_weight_policy(weight)?;

        let volume = input.resolve()?;
        if let Some(x) = x
            && x.len() != volume.channels()
        {
            return Err(FastFitError::dimension(
                "RUN.X_LENGTH",
                format!(
                    "x axis length ({}) does not match channel count ({})",
                    x.len(),
                    volume.channels()
                ),
            ));
        }
        let representative = representative_spectrum(
            volume,
            policy,
            concentrations,
            ysum,
            self.options.sum_chunk_width,
        )?;
        self.log_phase("configuration", started);

        let phase = Instant::now();
        self.transition(FitSessionState::BuildingBasis);
        self.model.set_data(x, &representative, xmin, xmax)?;
        self.model.estimate()?;
        let free = FreeParameters::from_model(&self.model);
        if free.model_indices.is_empty() {
            return Err(FastFitError::configuration(
                "CONFIG.NO_FREE_PARAMETERS",
                "the fit model has no free parameters",
            ));
        }
        let window = channel_window(x, self.model.xdata(), volume.channels())?;
        let basis = self.build_basis(&free, window.len())?;

        let fit = &self.model.configuration().fit;
        let background = fit.stripflag.then(|| BackgroundRemoval {
            estimator: BackgroundEstimator::from_fit_section(fit),
            anchors: fit
                .active_anchors()
                .map(|values| AnchorList::from_calibration(values, self.model.xdata()))
                .unwrap_or_default(),
        });
        let session = FitSession {
            volume,
            window,
            basis,
            policy,
            sigma: (policy == WeightPolicy::Average)
                .then(|| average_sigma(&representative[window.range()], volume.pixel_count())),
            background,
            chunk_width: self.options.chunk_width.max(1),
        };
        debug!(
            free = free.len(),
            channels = window.len(),
            first_channel = window.first,
            policy = ?policy,
            "basis ready"
        );
        self.log_phase("basis", phase);

        let phase = Instant::now();
        self.transition(FitSessionState::InitialPass);
        let mut parameters = ParameterMap::zeros(free.len(), volume.rows(), volume.columns());
        let mut uncertainties = ParameterMap::zeros(free.len(), volume.rows(), volume.columns());
        let reused = session.initial_pass(&mut parameters, &mut uncertainties)?;
        debug!(reused, "initial pass decomposition reuse");
        self.log_phase("initial pass", phase);

        let mut refinement = RefinementOutcome::default();
        if refit {
            let phase = Instant::now();
            let candidates = free.peak_indices();
            let refiner = NegativeRefiner {
                candidates: &candidates,
                names: &free.names,
                min_refit_fraction: self.options.min_refit_fraction,
                max_passes: self
                    .options
                    .max_refit_passes
                    .unwrap_or(REFIT_PASSES_PER_PARAMETER * candidates.len()),
            };
            refinement =
                refiner.run(&session, &mut parameters, &mut uncertainties, &mut self.state)?;
            self.log_phase("refinement", phase);
        }

        let mut names = free.names.clone();
        let concentration_planes = if concentrations {
            let phase = Instant::now();
            let converter = self.converter.as_deref().ok_or_else(|| {
                FastFitError::configuration(
                    "CONFIG.NO_CONVERTER",
                    "concentrations were requested but no converter is attached",
                )
            })?;
            let section = self.model.configuration().concentrations.clone();
            let resolved =
                resolve_areas(&mut self.model, converter, &section, &free.peak_names())?;
            let maps = concentration_maps(&resolved, &free.names, &parameters, &mut names)?;
            self.log_phase("concentrations", phase);
            Some(maps)
        } else {
            None
        };

        self.transition(FitSessionState::Done);
        self.log_phase("fit", started);
        Ok(FastFitOutput {
            parameters,
            uncertainties,
            names,
            concentrations: concentration_planes,
            forced_zero: refinement.forced_zero,
            refit_passes: refinement.passes,
        })
    }

    /// An explicit policy overrides `fit.fitweight`; the model is always run in
    /// linear mode. The model is reconfigured only when a flag changed.
    fn resolve_weight_policy(
        &mut self,
        requested: Option<WeightPolicy>,
    ) -> FastFitResult<WeightPolicy> {
        let mut configuration = self.model.configuration().clone();
        let policy = match requested {
            None if configuration.fit.fitweight => WeightPolicy::Individual,
            None => WeightPolicy::None,
            Some(policy) => {
                configuration.fit.fitweight = policy.is_weighted();
                policy
            }
        };
        configuration.fit.linearfitflag = true;

        if &configuration != self.model.configuration() {
            debug!(policy = ?policy, "reconfiguring model for linear fit");
            self.model.configure(configuration)?;
        }
        Ok(policy)
    }

    fn build_basis(&self, free: &FreeParameters, rows: usize) -> FastFitResult<Mat<f64>> {
        let mut basis = Mat::<f64>::zeros(rows, free.len());
        for (column, &parameter_index) in free.model_indices.iter().enumerate() {
            let derivative = self.model.linear_derivative(parameter_index)?;
            if derivative.len() != rows {
                return Err(FastFitError::dimension(
                    "RUN.DERIVATIVE_LENGTH",
                    format!(
                        "derivative of '{}' has {} points, the fit window has {rows}",
                        free.names[column],
                        derivative.len()
                    ),
                ));
            }
            for (row, value) in derivative.iter().enumerate() {
                basis[(row, column)] = *value;
            }
        }
        Ok(basis)
    }

    fn transition(&mut self, state: FitSessionState) {
        debug!(from = %self.state, to = %state, "fast fit state");
        self.state = state;
    }

    fn log_phase(&self, phase: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1.0e3;
        if self.options.verbose {
            info!(phase, elapsed_ms, "fast fit phase finished");
        } else {
            debug!(phase, elapsed_ms, "fast fit phase finished");
        }
    }
}

fn check_background_algorithm(configuration: &FitConfiguration) -> FastFitResult<()> {
    let fit = &configuration.fit;
    if fit.stripflag && fit.strip_algorithm()? != StripAlgorithm::Snip {
        return Err(FastFitError::configuration(
            "CONFIG.STRIP_ALGORITHM",
            "the fast linear fit only supports the SNIP background",
        ));
    }
    Ok(())
}
