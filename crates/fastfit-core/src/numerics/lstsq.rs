//! Batched weighted linear least squares over a shared basis matrix.
//!
//! Every observation column `y` is solved for coefficients `c` minimising
//! `|| diag(1/sigma) (y - A c) ||^2` through a thin SVD of the row-scaled basis.
//! The decomposition depends only on the basis and the weight vector, so for
//! the `None` and `Average` policies it is computed once and handed back to the
//! caller for reuse on the next batch.

use crate::domain::{FastFitError, WeightPolicy};
use faer::{Mat, MatRef};
use std::borrow::Cow;

const FINGERPRINT_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FINGERPRINT_PRIME: u64 = 0x00000100000001B3;
/// Lower bound of the Poisson variance used for individual weights.
const INDIVIDUAL_VARIANCE_FLOOR: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LstsqError {
    #[error("basis matrix must be non-empty, got {rows}x{cols}")]
    EmptyBasis { rows: usize, cols: usize },
    #[error("observation rows ({observations}) do not match basis rows ({basis})")]
    DimensionMismatch { basis: usize, observations: usize },
    #[error("sigma length ({actual}) does not match basis rows ({expected})")]
    SigmaLengthMismatch { expected: usize, actual: usize },
    #[error("average weighting requires a sigma vector")]
    MissingAverageSigma,
    #[error("sigma[{index}] must be finite and > 0, got {value}")]
    InvalidSigma { index: usize, value: f64 },
    #[error("singular value decomposition failed: {reason}")]
    Decomposition { reason: String },
}

impl From<LstsqError> for FastFitError {
    fn from(error: LstsqError) -> Self {
        match &error {
            LstsqError::EmptyBasis { .. }
            | LstsqError::DimensionMismatch { .. }
            | LstsqError::SigmaLengthMismatch { .. } => {
                FastFitError::dimension("RUN.LSTSQ_SHAPE", error.to_string())
            }
            LstsqError::MissingAverageSigma | LstsqError::InvalidSigma { .. } => {
                FastFitError::configuration("CONFIG.LSTSQ_WEIGHT", error.to_string())
            }
            LstsqError::Decomposition { .. } => {
                FastFitError::computation("RUN.LSTSQ_SVD", error.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WeightedLstsqInput<'a> {
    pub basis: MatRef<'a, f64>,
    pub observations: MatRef<'a, f64>,
    pub policy: WeightPolicy,
    pub sigma: Option<&'a [f64]>,
    pub reuse: Option<&'a DecompositionCache>,
    /// Precomputed [`decomposition_fingerprint`] of this basis, policy and
    /// sigma; computed on demand when absent.
    pub fingerprint: Option<u64>,
}

impl<'a> WeightedLstsqInput<'a> {
    pub fn new(
        basis: MatRef<'a, f64>,
        observations: MatRef<'a, f64>,
        policy: WeightPolicy,
    ) -> Self {
        Self {
            basis,
            observations,
            policy,
            sigma: None,
            reuse: None,
            fingerprint: None,
        }
    }

    pub fn with_sigma(mut self, sigma: &'a [f64]) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn with_reuse(mut self, reuse: Option<&'a DecompositionCache>) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LstsqSolution {
    /// `n_parameters x n_observations`
    pub coefficients: Mat<f64>,
    /// Standard errors, same shape as `coefficients`.
    pub uncertainties: Mat<f64>,
    /// Freshly computed decomposition; `None` for individual weighting and
    /// when the supplied cache was reused.
    pub decomposition: Option<DecompositionCache>,
    pub reused: bool,
}

/// Thin SVD `diag(1/sigma) A = U S V^T` of one basis/weight combination.
#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionCache {
    policy: WeightPolicy,
    rows: usize,
    cols: usize,
    fingerprint: u64,
    sigma: Option<Vec<f64>>,
    u: Mat<f64>,
    inverse_singular_values: Vec<f64>,
    v: Mat<f64>,
}

impl DecompositionCache {
    fn compute(
        basis: MatRef<'_, f64>,
        policy: WeightPolicy,
        sigma: Option<&[f64]>,
        fingerprint: u64,
    ) -> Result<Self, LstsqError> {
        let rows = basis.nrows();
        let cols = basis.ncols();
        let scaled = Mat::from_fn(rows, cols, |row, col| {
            basis[(row, col)] / sigma.map_or(1.0, |sigma| sigma[row])
        });

        let svd = scaled
            .as_ref()
            .thin_svd()
            .map_err(|error| LstsqError::Decomposition {
                reason: format!("{error:?}"),
            })?;
        let singular_values = svd.S().column_vector();
        let rank_limit = singular_values.nrows();

        let mut largest: f64 = 0.0;
        for index in 0..rank_limit {
            largest = largest.max(singular_values[index]);
        }
        let cutoff = f64::EPSILON * rows.max(cols) as f64 * largest;
        let inverse_singular_values = (0..rank_limit)
            .map(|index| {
                let value = singular_values[index];
                if value > cutoff { 1.0 / value } else { 0.0 }
            })
            .collect();

        let u_ref = svd.U();
        let v_ref = svd.V();
        Ok(Self {
            policy,
            rows,
            cols,
            fingerprint,
            sigma: sigma.map(<[f64]>::to_vec),
            u: Mat::from_fn(rows, rank_limit, |row, k| u_ref[(row, k)]),
            inverse_singular_values,
            v: Mat::from_fn(cols, rank_limit, |col, k| v_ref[(col, k)]),
        })
    }

    /// Number of singular values kept above the pseudo-inverse cutoff.
    pub fn rank(&self) -> usize {
        self.inverse_singular_values
            .iter()
            .filter(|inverse| **inverse > 0.0)
            .count()
    }

    pub fn is_valid_for(
        &self,
        basis: MatRef<'_, f64>,
        policy: WeightPolicy,
        sigma: Option<&[f64]>,
    ) -> bool {
        self.matches(
            basis,
            policy,
            sigma,
            decomposition_fingerprint(basis, policy, sigma),
        )
    }

    fn matches(
        &self,
        basis: MatRef<'_, f64>,
        policy: WeightPolicy,
        sigma: Option<&[f64]>,
        fingerprint: u64,
    ) -> bool {
        policy != WeightPolicy::Individual
            && self.policy == policy
            && self.rows == basis.nrows()
            && self.cols == basis.ncols()
            && self.fingerprint == fingerprint
            && self.sigma.as_deref() == sigma
    }

    /// Coefficients for one observation column, scaling by `sigma` on the fly.
    fn solve_into(&self, observation: impl Fn(usize) -> f64, coefficients: &mut [f64]) {
        let rank_limit = self.inverse_singular_values.len();
        let mut projected = vec![0.0; rank_limit];
        for (k, projection) in projected.iter_mut().enumerate() {
            let inverse = self.inverse_singular_values[k];
            if inverse == 0.0 {
                continue;
            }
            let mut sum = 0.0;
            for row in 0..self.rows {
                let weight = self.sigma.as_ref().map_or(1.0, |sigma| sigma[row]);
                sum += self.u[(row, k)] * observation(row) / weight;
            }
            *projection = sum * inverse;
        }

        for (col, coefficient) in coefficients.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (k, projection) in projected.iter().enumerate() {
                sum += self.v[(col, k)] * projection;
            }
            *coefficient = sum;
        }
    }

    /// Square roots of the diagonal of `V S^-2 V^T`.
    fn standard_errors(&self) -> Vec<f64> {
        (0..self.cols)
            .map(|col| {
                let mut variance = 0.0;
                for (k, inverse) in self.inverse_singular_values.iter().enumerate() {
                    let term = self.v[(col, k)] * inverse;
                    variance += term * term;
                }
                variance.sqrt()
            })
            .collect()
    }
}

pub trait WeightedLinearSolveApi {
    fn solve(&self, input: WeightedLstsqInput<'_>) -> Result<LstsqSolution, LstsqError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightedLinearSolver;

impl WeightedLinearSolveApi for WeightedLinearSolver {
    fn solve(&self, input: WeightedLstsqInput<'_>) -> Result<LstsqSolution, LstsqError> {
        solve_weighted_lstsq(input)
    }
}

pub fn solve_weighted_lstsq(input: WeightedLstsqInput<'_>) -> Result<LstsqSolution, LstsqError> {
    let basis = input.basis;
    let observations = input.observations;
    let rows = basis.nrows();
    let cols = basis.ncols();
    if rows == 0 || cols == 0 {
        return Err(LstsqError::EmptyBasis { rows, cols });
    }
    if observations.nrows() != rows {
        return Err(LstsqError::DimensionMismatch {
            basis: rows,
            observations: observations.nrows(),
        });
    }

    match input.policy {
        WeightPolicy::Individual => solve_individually(basis, observations),
        WeightPolicy::None => solve_shared(&input, None),
        WeightPolicy::Average => {
            let sigma = input.sigma.ok_or(LstsqError::MissingAverageSigma)?;
            validate_sigma(sigma, rows)?;
            solve_shared(&input, Some(sigma))
        }
    }
}

/// Poisson-like sigma derived from one observation column.
pub fn individual_sigma(observation: impl Iterator<Item = f64>) -> Vec<f64> {
    observation
        .map(|value| value.abs().max(INDIVIDUAL_VARIANCE_FLOOR).sqrt())
        .collect()
}

fn solve_shared(
    input: &WeightedLstsqInput<'_>,
    sigma: Option<&[f64]>,
) -> Result<LstsqSolution, LstsqError> {
    let WeightedLstsqInput {
        basis,
        observations,
        policy,
        reuse,
        ..
    } = *input;
    let fingerprint = input
        .fingerprint
        .unwrap_or_else(|| decomposition_fingerprint(basis, policy, sigma));
    let decomposition = match reuse {
        Some(cache) if cache.matches(basis, policy, sigma, fingerprint) => Cow::Borrowed(cache),
        _ => Cow::Owned(DecompositionCache::compute(basis, policy, sigma, fingerprint)?),
    };

    let cols = basis.ncols();
    let n_observations = observations.ncols();
    let mut coefficients = Mat::<f64>::zeros(cols, n_observations);
    let mut uncertainties = Mat::<f64>::zeros(cols, n_observations);
    let standard_errors = decomposition.standard_errors();
    let mut column = vec![0.0; cols];

    for observation in 0..n_observations {
        decomposition.solve_into(|row| observations[(row, observation)], &mut column);
        for (parameter, value) in column.iter().enumerate() {
            coefficients[(parameter, observation)] = *value;
            uncertainties[(parameter, observation)] = standard_errors[parameter];
        }
    }

    let (decomposition, reused) = match decomposition {
        Cow::Borrowed(_) => (None, true),
        Cow::Owned(fresh) => (Some(fresh), false),
    };
    Ok(LstsqSolution {
        coefficients,
        uncertainties,
        decomposition,
        reused,
    })
}

fn solve_individually(
    basis: MatRef<'_, f64>,
    observations: MatRef<'_, f64>,
) -> Result<LstsqSolution, LstsqError> {
    let rows = basis.nrows();
    let cols = basis.ncols();
    let n_observations = observations.ncols();
    let mut coefficients = Mat::<f64>::zeros(cols, n_observations);
    let mut uncertainties = Mat::<f64>::zeros(cols, n_observations);
    let mut column = vec![0.0; cols];

    for observation in 0..n_observations {
        let sigma = individual_sigma((0..rows).map(|row| observations[(row, observation)]));
        let decomposition = DecompositionCache::compute(
            basis,
            WeightPolicy::Individual,
            Some(&sigma),
            0,
        )?;
        decomposition.solve_into(|row| observations[(row, observation)], &mut column);
        let standard_errors = decomposition.standard_errors();
        for parameter in 0..cols {
            coefficients[(parameter, observation)] = column[parameter];
            uncertainties[(parameter, observation)] = standard_errors[parameter];
        }
    }

    Ok(LstsqSolution {
        coefficients,
        uncertainties,
        decomposition: None,
        reused: false,
    })
}

fn validate_sigma(sigma: &[f64], rows: usize) -> Result<(), LstsqError> {
    if sigma.len() != rows {
        return Err(LstsqError::SigmaLengthMismatch {
            expected: rows,
            actual: sigma.len(),
        });
    }
    for (index, value) in sigma.iter().copied().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            return Err(LstsqError::InvalidSigma { index, value });
        }
    }
    Ok(())
}

/// FNV-1a hash of the policy, shape, basis entries and sigma a decomposition
/// was computed for. Callers solving many batches against one basis compute it
/// once and hand it over with [`WeightedLstsqInput::with_fingerprint`].
pub fn decomposition_fingerprint(
    basis: MatRef<'_, f64>,
    policy: WeightPolicy,
    sigma: Option<&[f64]>,
) -> u64 {
    let mut hash = FINGERPRINT_OFFSET_BASIS;
    let mut mix = |word: u64| {
        for byte in word.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FINGERPRINT_PRIME);
        }
    };

    mix(policy.selector() as u64);
    mix(basis.nrows() as u64);
    mix(basis.ncols() as u64);
    for col in 0..basis.ncols() {
        for row in 0..basis.nrows() {
            mix(basis[(row, col)].to_bits());
        }
    }
    if let Some(sigma) = sigma {
        for value in sigma {
            mix(value.to_bits());
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::{
        LstsqError, WeightedLstsqInput, decomposition_fingerprint, individual_sigma,
        solve_weighted_lstsq,
    };
    use crate::domain::{FastFitError, FastFitErrorKind, WeightPolicy};
    use faer::Mat;

    fn orthogonal_basis() -> Mat<f64> {
        let columns = [[1.0, 1.0, 1.0, 1.0], [1.0, -1.0, 1.0, -1.0]];
        Mat::from_fn(4, 2, |row, col| columns[col][row])
    }

    #[test]
    fn orthogonal_basis_yields_projection_coefficients() {
        let basis = orthogonal_basis();
        let observations = Mat::from_fn(4, 1, |row, _| [3.0, 1.0, 5.0, -1.0][row]);

        let solution = solve_weighted_lstsq(WeightedLstsqInput::new(
            basis.as_ref(),
            observations.as_ref(),
            WeightPolicy::None,
        ))
        .expect("solve");

        assert_close("c0", 2.0, solution.coefficients[(0, 0)], 1.0e-12);
        assert_close("c1", 2.0, solution.coefficients[(1, 0)], 1.0e-12);
        assert_close("s0", 0.5, solution.uncertainties[(0, 0)], 1.0e-12);
        assert_close("s1", 0.5, solution.uncertainties[(1, 0)], 1.0e-12);
        assert!(solution.decomposition.is_some());
        assert!(!solution.reused);
    }

    #[test]
    fn mismatched_observation_rows_are_dimension_errors() {
        let basis = orthogonal_basis();
        let observations = Mat::<f64>::zeros(3, 2);
        let error = solve_weighted_lstsq(WeightedLstsqInput::new(
            basis.as_ref(),
            observations.as_ref(),
            WeightPolicy::None,
        ))
        .expect_err("row mismatch");
        assert_eq!(
            error,
            LstsqError::DimensionMismatch {
                basis: 4,
                observations: 3
            }
        );
        assert_eq!(FastFitError::from(error).kind(), FastFitErrorKind::Dimension);
    }

    #[test]
    fn average_policy_requires_valid_sigma() {
        let basis = orthogonal_basis();
        let observations = Mat::<f64>::zeros(4, 1);
        let input =
            WeightedLstsqInput::new(basis.as_ref(), observations.as_ref(), WeightPolicy::Average);
        assert_eq!(
            solve_weighted_lstsq(input).expect_err("no sigma"),
            LstsqError::MissingAverageSigma
        );

        let sigma = [1.0, 1.0, 0.0, 1.0];
        assert_eq!(
            solve_weighted_lstsq(input.with_sigma(&sigma)).expect_err("zero sigma"),
            LstsqError::InvalidSigma {
                index: 2,
                value: 0.0
            }
        );
    }

    #[test]
    fn uniform_sigma_scales_uncertainties_only() {
        let basis = orthogonal_basis();
        let observations = Mat::from_fn(4, 1, |row, _| [3.0, 1.0, 5.0, -1.0][row]);
        let sigma = [2.0; 4];
        let solution = solve_weighted_lstsq(
            WeightedLstsqInput::new(basis.as_ref(), observations.as_ref(), WeightPolicy::Average)
                .with_sigma(&sigma),
        )
        .expect("solve");

        assert_close("c0", 2.0, solution.coefficients[(0, 0)], 1.0e-12);
        assert_close("s0", 1.0, solution.uncertainties[(0, 0)], 1.0e-12);
    }

    #[test]
    fn cache_is_reused_only_for_matching_basis_and_weights() {
        let basis = orthogonal_basis();
        let first = Mat::from_fn(4, 2, |row, col| (row + col) as f64);
        let second = Mat::from_fn(4, 3, |row, col| (row * col) as f64 - 1.0);

        let initial = solve_weighted_lstsq(WeightedLstsqInput::new(
            basis.as_ref(),
            first.as_ref(),
            WeightPolicy::None,
        ))
        .expect("first batch");
        let cache = initial.decomposition.expect("shared policy keeps a cache");
        assert_eq!(cache.rank(), 2);

        let reused = solve_weighted_lstsq(
            WeightedLstsqInput::new(basis.as_ref(), second.as_ref(), WeightPolicy::None)
                .with_reuse(Some(&cache)),
        )
        .expect("second batch");
        assert!(reused.reused);
        assert!(reused.decomposition.is_none());

        let mut other_basis = orthogonal_basis();
        other_basis[(0, 1)] = 2.0;
        assert!(!cache.is_valid_for(other_basis.as_ref(), WeightPolicy::None, None));
        let sigma = [1.0; 4];
        assert!(!cache.is_valid_for(basis.as_ref(), WeightPolicy::Average, Some(&sigma)));
    }

    #[test]
    fn precomputed_fingerprint_selects_the_cache() {
        let basis = orthogonal_basis();
        let observations = Mat::from_fn(4, 2, |row, col| (row + 2 * col) as f64);
        let sigma = [1.0, 2.0, 1.0, 2.0];
        let key = decomposition_fingerprint(basis.as_ref(), WeightPolicy::Average, Some(&sigma));
        let input =
            WeightedLstsqInput::new(basis.as_ref(), observations.as_ref(), WeightPolicy::Average)
                .with_sigma(&sigma)
                .with_fingerprint(key);

        let first = solve_weighted_lstsq(input).expect("first");
        let cache = first.decomposition.expect("fresh decomposition");
        let reused = solve_weighted_lstsq(input.with_reuse(Some(&cache))).expect("reused");
        assert!(reused.reused);
        assert_eq!(reused.coefficients, first.coefficients);

        let stale = solve_weighted_lstsq(input.with_reuse(Some(&cache)).with_fingerprint(key ^ 1))
            .expect("recomputed");
        assert!(!stale.reused);
        assert!(stale.decomposition.is_some());
        assert_eq!(stale.coefficients, first.coefficients);
    }

    #[test]
    fn individual_policy_weights_each_observation_separately() {
        let basis = orthogonal_basis();
        let observations = Mat::from_fn(4, 2, |row, col| {
            let exact = [[4.0, 4.0, 4.0, 4.0], [30.0, 10.0, 30.0, 10.0]];
            exact[col][row]
        });
        let solution = solve_weighted_lstsq(WeightedLstsqInput::new(
            basis.as_ref(),
            observations.as_ref(),
            WeightPolicy::Individual,
        ))
        .expect("solve");

        assert!(solution.decomposition.is_none());
        assert_close("c0 pixel0", 4.0, solution.coefficients[(0, 0)], 1.0e-10);
        assert_close("c1 pixel0", 0.0, solution.coefficients[(1, 0)], 1.0e-10);
        assert_close("c0 pixel1", 20.0, solution.coefficients[(0, 1)], 1.0e-10);
        assert_close("c1 pixel1", 10.0, solution.coefficients[(1, 1)], 1.0e-10);
        // sigma = 2 everywhere for the flat pixel
        assert_close("s0 pixel0", 1.0, solution.uncertainties[(0, 0)], 1.0e-10);
    }

    #[test]
    fn individual_sigma_is_floored_at_unit_variance() {
        let sigma = individual_sigma([0.0, 0.25, -9.0, 16.0].into_iter());
        assert_eq!(sigma, vec![1.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn rank_deficient_basis_uses_pseudo_inverse() {
        let basis = Mat::from_fn(3, 2, |row, _| [1.0, 2.0, 3.0][row]);
        let observations = Mat::from_fn(3, 1, |row, _| [2.0, 4.0, 6.0][row]);
        let solution = solve_weighted_lstsq(WeightedLstsqInput::new(
            basis.as_ref(),
            observations.as_ref(),
            WeightPolicy::None,
        ))
        .expect("solve");

        assert_eq!(solution.decomposition.as_ref().map(|cache| cache.rank()), Some(1));
        assert_close("c0", 1.0, solution.coefficients[(0, 0)], 1.0e-10);
        assert_close("c1", 1.0, solution.coefficients[(1, 0)], 1.0e-10);
    }

    fn assert_close(label: &str, expected: f64, actual: f64, tol: f64) {
        assert!(
            (expected - actual).abs() <= tol,
            "{label}: expected={expected:.15e} actual={actual:.15e} tol={tol:.3e}"
        );
    }
}
