pub mod lstsq;
pub mod smoothing;
pub mod snip;

pub use lstsq::{
    DecompositionCache, LstsqError, LstsqSolution, WeightedLinearSolveApi, WeightedLinearSolver,
    WeightedLstsqInput, decomposition_fingerprint, individual_sigma, solve_weighted_lstsq,
};
pub use smoothing::{effective_window, savitzky_golay, savitzky_golay_coefficients};
pub use snip::{snip1d, snip_iterations};

/// Per-channel compensated (Kahan) accumulator for summing many spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumAccumulator {
    sum: Vec<f64>,
    correction: Vec<f64>,
}

impl SpectrumAccumulator {
    pub fn new(channels: usize) -> Self {
        Self {
            sum: vec![0.0; channels],
            correction: vec![0.0; channels],
        }
    }

    pub fn add(&mut self, spectrum: &[f64]) {
        for ((sum, correction), value) in self
            .sum
            .iter_mut()
            .zip(self.correction.iter_mut())
            .zip(spectrum)
        {
            kahan_add(sum, correction, *value);
        }
    }

    pub fn into_sum(self) -> Vec<f64> {
        self.sum
    }
}

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}
