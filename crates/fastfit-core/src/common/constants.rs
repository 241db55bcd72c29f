//! Defaults shared by the batch fitter, its configuration and the CLI.

/// Maximum number of pixels solved together in one chunk of the initial pass.
pub const DEFAULT_CHUNK_WIDTH: usize = 100;
/// Column chunk used while accumulating the sum spectrum.
pub const DEFAULT_SUM_CHUNK_WIDTH: usize = 5000;
/// Below this fraction of all pixels a negative mask is zeroed instead of re-fitted.
pub const DEFAULT_MIN_REFIT_FRACTION: f64 = 0.0025;
/// Refinement passes allowed per free non-background parameter.
pub const REFIT_PASSES_PER_PARAMETER: usize = 2;

pub const DEFAULT_STRIP_FILTER_WIDTH: usize = 1;
pub const DEFAULT_SNIP_WIDTH: f64 = 30.0;

/// Area given to non-positive groups before resolving an automatic reference.
pub const MIN_REFERENCE_AREA: f64 = 1.0e-6;
