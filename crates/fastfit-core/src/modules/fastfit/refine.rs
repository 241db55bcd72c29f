use super::chunk::{FitSession, Pixel};
use crate::domain::{FastFitResult, FitSessionState, ForcedZeroReport, ParameterMap};
use faer::Mat;
use tracing::{debug, warn};

/// Negative pixels of one non-background parameter.
#[derive(Debug, Clone)]
struct NegativeMask {
    parameter: usize,
    count: usize,
    mask: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct RefinementOutcome {
    pub(super) passes: usize,
    pub(super) forced_zero: Vec<ForcedZeroReport>,
}

/// Removes negative values of non-background parameters by re-solving the
/// affected pixels without the offending parameters.
#[derive(Debug)]
pub(super) struct NegativeRefiner<'a> {
    /// Indices (into the free parameter list) eligible for the negativity check.
    pub(super) candidates: &'a [usize],
    pub(super) names: &'a [String],
    pub(super) min_refit_fraction: f64,
    pub(super) max_passes: usize,
}

impl NegativeRefiner<'_> {
    pub(super) fn run(
        &self,
        session: &FitSession<'_>,
        parameters: &mut ParameterMap,
        uncertainties: &mut ParameterMap,
        state: &mut FitSessionState,
    ) -> FastFitResult<RefinementOutcome> {
        let columns = parameters.columns();
        let pixel_count = parameters.rows() * columns;
        let min_pixels = self.min_refit_fraction * pixel_count as f64;
        let mut outcome = RefinementOutcome::default();

        loop {
            let mut negatives = self.negative_masks(parameters);
            if negatives.is_empty() {
                break;
            }
            *state = FitSessionState::Refining {
                pass: outcome.passes,
            };

            if outcome.passes >= self.max_passes {
                for negative in &negatives {
                    zero_masked(parameters.plane_mut(negative.parameter), &negative.mask);
                    let name = &self.names[negative.parameter];
                    warn!(
                        parameter = %name,
                        pixels = negative.count,
                        passes = outcome.passes,
                        "refinement limit reached, negative pixels forced to zero"
                    );
                    outcome.forced_zero.push(ForcedZeroReport {
                        parameter: name.clone(),
                        pixels: negative.count,
                    });
                }
                break;
            }

            negatives.sort_by(|left, right| {
                right
                    .count
                    .cmp(&left.count)
                    .then(right.parameter.cmp(&left.parameter))
            });
            let (implicated, mask) = absorb_overlapping(&negatives);
            let pixels: Vec<Pixel> = mask
                .iter()
                .enumerate()
                .filter(|(_, negative)| **negative)
                .map(|(offset, _)| Pixel {
                    row: offset / columns,
                    column: offset % columns,
                })
                .collect();

            if (pixels.len() as f64) < min_pixels {
                for &parameter in &implicated {
                    zero_masked(parameters.plane_mut(parameter), &mask);
                    zero_masked(uncertainties.plane_mut(parameter), &mask);
                    warn!(
                        parameter = %self.names[parameter],
                        pixels = pixels.len(),
                        "too few negative pixels to re-fit, set to zero"
                    );
                }
                continue;
            }

            outcome.passes += 1;
            *state = FitSessionState::Refining {
                pass: outcome.passes,
            };
            debug!(
                pass = outcome.passes,
                pixels = pixels.len(),
                dropped = implicated.len(),
                "re-fitting negative pixels"
            );
            self.refit(session, &implicated, &pixels, parameters, uncertainties)?;
        }
        Ok(outcome)
    }

    fn negative_masks(&self, parameters: &ParameterMap) -> Vec<NegativeMask> {
        self.candidates
            .iter()
            .filter_map(|&parameter| {
                let mask: Vec<bool> = parameters
                    .plane(parameter)
                    .iter()
                    .map(|value| *value < 0.0)
                    .collect();
                let count = mask.iter().filter(|negative| **negative).count();
                (count > 0).then_some(NegativeMask {
                    parameter,
                    count,
                    mask,
                })
            })
            .collect()
    }

    fn refit(
        &self,
        session: &FitSession<'_>,
        implicated: &[usize],
        pixels: &[Pixel],
        parameters: &mut ParameterMap,
        uncertainties: &mut ParameterMap,
    ) -> FastFitResult<()> {
        let kept: Vec<usize> = (0..parameters.n_parameters())
            .filter(|parameter| !implicated.contains(parameter))
            .collect();
        for pixel in pixels {
            for &parameter in implicated {
                parameters.set(parameter, pixel.row, pixel.column, 0.0);
                uncertainties.set(parameter, pixel.row, pixel.column, 0.0);
            }
        }
        if kept.is_empty() {
            return Ok(());
        }

        let basis = &session.basis;
        let reduced = Mat::from_fn(basis.nrows(), kept.len(), |row, col| basis[(row, kept[col])]);
        let fingerprint = session.fingerprint(reduced.as_ref());
        let mut cache = None;
        session.solve_blocks(
            reduced.as_ref(),
            fingerprint,
            pixels,
            &mut cache,
            |pixel, column, solution| {
                for (reduced_index, &parameter) in kept.iter().enumerate() {
                    parameters.set(
                        parameter,
                        pixel.row,
                        pixel.column,
                        solution.coefficients[(reduced_index, column)],
                    );
                    uncertainties.set(
                        parameter,
                        pixel.row,
                        pixel.column,
                        solution.uncertainties[(reduced_index, column)],
                    );
                }
            },
        )?;
        Ok(())
    }
}

/// Start from the worst parameter and pull in every other parameter that is
/// negative on some of the same pixels, narrowing the mask to the overlap.
fn absorb_overlapping(sorted: &[NegativeMask]) -> (Vec<usize>, Vec<bool>) {
    let mut implicated = vec![sorted[0].parameter];
    let mut mask = sorted[0].mask.clone();
    for other in &sorted[1..] {
        let overlap: Vec<bool> = mask
            .iter()
            .zip(&other.mask)
            .map(|(left, right)| *left && *right)
            .collect();
        if overlap.iter().any(|negative| *negative) {
            implicated.push(other.parameter);
            mask = overlap;
        }
    }
    (implicated, mask)
}

fn zero_masked(plane: &mut [f64], mask: &[bool]) {
    for (value, masked) in plane.iter_mut().zip(mask) {
        if *masked {
            *value = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NegativeMask, absorb_overlapping, zero_masked};

    fn mask(parameter: usize, mask: &[bool]) -> NegativeMask {
        NegativeMask {
            parameter,
            count: mask.iter().filter(|negative| **negative).count(),
            mask: mask.to_vec(),
        }
    }

    #[test]
    fn overlapping_parameters_narrow_the_mask() {
        let sorted = [
            mask(3, &[true, true, true, false]),
            mask(2, &[false, true, true, false]),
            mask(4, &[false, false, false, true]),
        ];
        let (implicated, narrowed) = absorb_overlapping(&sorted);
        assert_eq!(implicated, vec![3, 2]);
        assert_eq!(narrowed, vec![false, true, true, false]);
    }

    #[test]
    fn disjoint_parameters_are_left_for_later_passes() {
        let sorted = [mask(1, &[true, false]), mask(2, &[false, true])];
        let (implicated, narrowed) = absorb_overlapping(&sorted);
        assert_eq!(implicated, vec![1]);
        assert_eq!(narrowed, vec![true, false]);
    }

    #[test]
    fn zeroing_only_touches_masked_pixels() {
        let mut plane = vec![-1.0, 2.0, -3.0];
        zero_masked(&mut plane, &[true, false, false]);
        assert_eq!(plane, vec![0.0, 2.0, -3.0]);
    }
}
