use super::representative::ChannelWindow;
use crate::domain::{FastFitResult, ParameterMap, SpectralVolume, WeightPolicy};
use crate::modules::background::{AnchorList, BackgroundEstimator};
use crate::numerics::{
    DecompositionCache, LstsqSolution, WeightedLinearSolveApi, WeightedLinearSolver,
    WeightedLstsqInput, decomposition_fingerprint,
};
use faer::{Mat, MatRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Pixel {
    pub(super) row: usize,
    pub(super) column: usize,
}

#[derive(Debug, Clone)]
pub(super) struct BackgroundRemoval {
    pub(super) estimator: BackgroundEstimator,
    pub(super) anchors: AnchorList,
}

/// Everything fixed once the basis is built; shared read-only by the initial
/// pass and every refinement re-solve.
#[derive(Debug)]
pub(super) struct FitSession<'a> {
    pub(super) volume: &'a SpectralVolume,
    pub(super) window: ChannelWindow,
    pub(super) basis: Mat<f64>,
    pub(super) policy: WeightPolicy,
    pub(super) sigma: Option<Vec<f64>>,
    pub(super) background: Option<BackgroundRemoval>,
    pub(super) chunk_width: usize,
}

impl FitSession<'_> {
    /// Solve every pixel row by row in column chunks of at most `chunk_width`
    /// spectra. Returns how many chunks reused the previous decomposition.
    pub(super) fn initial_pass(
        &self,
        parameters: &mut ParameterMap,
        uncertainties: &mut ParameterMap,
    ) -> FastFitResult<usize> {
        let mut cache = None;
        let mut reused = 0;
        let fingerprint = self.fingerprint(self.basis.as_ref());
        for row in 0..self.volume.rows() {
            let pixels: Vec<Pixel> = (0..self.volume.columns())
                .map(|column| Pixel { row, column })
                .collect();
            reused += self.solve_blocks(
                self.basis.as_ref(),
                fingerprint,
                &pixels,
                &mut cache,
                |pixel, column, solution| {
                    for parameter in 0..solution.coefficients.nrows() {
                        parameters.set(
                            parameter,
                            pixel.row,
                            pixel.column,
                            solution.coefficients[(parameter, column)],
                        );
                        uncertainties.set(
                            parameter,
                            pixel.row,
                            pixel.column,
                            solution.uncertainties[(parameter, column)],
                        );
                    }
                },
            )?;
        }
        Ok(reused)
    }

    /// Cache key of `basis` under the session weights; `None` when every
    /// pixel gets its own decomposition anyway.
    pub(super) fn fingerprint(&self, basis: MatRef<'_, f64>) -> Option<u64> {
        (self.policy != WeightPolicy::Individual)
            .then(|| decomposition_fingerprint(basis, self.policy, self.sigma.as_deref()))
    }

    /// Solve `pixels` against `basis` in blocks of `chunk_width`, handing each
    /// solved column to `store`. `cache` carries the decomposition between
    /// blocks and calls and is only replaced when a block had to decompose
    /// afresh; `fingerprint` must come from [`Self::fingerprint`] on `basis`.
    pub(super) fn solve_blocks(
        &self,
        basis: MatRef<'_, f64>,
        fingerprint: Option<u64>,
        pixels: &[Pixel],
        cache: &mut Option<DecompositionCache>,
        mut store: impl FnMut(Pixel, usize, &LstsqSolution),
    ) -> FastFitResult<usize> {
        let mut reused = 0;
        for block in pixels.chunks(self.chunk_width.max(1)) {
            let observations = self.observation_block(block);
            let mut input = WeightedLstsqInput::new(basis, observations.as_ref(), self.policy)
                .with_reuse(cache.as_ref());
            if let Some(sigma) = &self.sigma {
                input = input.with_sigma(sigma);
            }
            if let Some(fingerprint) = fingerprint {
                input = input.with_fingerprint(fingerprint);
            }
            let solution = WeightedLinearSolver.solve(input)?;
            if solution.reused {
                reused += 1;
            }

            for (column, pixel) in block.iter().enumerate() {
                store(*pixel, column, &solution);
            }
            if let Some(fresh) = solution.decomposition {
                *cache = Some(fresh);
            }
        }
        Ok(reused)
    }

    /// Owned `channels x pixels` buffer of windowed, background-free spectra.
    fn observation_block(&self, block: &[Pixel]) -> Mat<f64> {
        let mut observations = Mat::<f64>::zeros(self.window.len(), block.len());
        let mut spectrum = vec![0.0; self.window.len()];
        for (column, pixel) in block.iter().enumerate() {
            spectrum.copy_from_slice(
                &self.volume.spectrum(pixel.row, pixel.column)[self.window.range()],
            );
            if let Some(background) = &self.background {
                background
                    .estimator
                    .subtract_in_place(&mut spectrum, &background.anchors);
            }
            for (channel, value) in spectrum.iter().enumerate() {
                observations[(channel, column)] = *value;
            }
        }
        observations
    }
}
