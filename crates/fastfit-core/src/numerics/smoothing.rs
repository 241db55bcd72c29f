//! Quadratic Savitzky-Golay smoothing used ahead of the SNIP envelope pass.

const MIN_WINDOW: usize = 3;

/// Normalized quadratic/cubic Savitzky-Golay smoothing weights for a window of
/// `2 * half_width + 1` samples.
pub fn savitzky_golay_coefficients(half_width: usize) -> Vec<f64> {
    let m = half_width as f64;
    let norm = (2.0 * m - 1.0) * (2.0 * m + 1.0) * (2.0 * m + 3.0);
    let base = 3.0 * (3.0 * m * m + 3.0 * m - 1.0);

    (0..=2 * half_width)
        .map(|index| {
            let offset = index as f64 - m;
            (base - 15.0 * offset * offset) / norm
        })
        .collect()
}

/// Effective odd window for `requested` samples on a spectrum of `len` channels,
/// or `None` when no smoothing applies.
pub fn effective_window(requested: usize, len: usize) -> Option<usize> {
    let mut window = if requested % 2 == 0 {
        requested + 1
    } else {
        requested
    };
    if window > len {
        window = if len % 2 == 0 { len.saturating_sub(1) } else { len };
    }
    (window >= MIN_WINDOW).then_some(window)
}

/// Smooth `spectrum` with a window of `width` channels.
///
/// Samples closer than half a window to either end keep their input value.
pub fn savitzky_golay(spectrum: &[f64], width: usize) -> Vec<f64> {
    let mut output = spectrum.to_vec();
    let Some(window) = effective_window(width, spectrum.len()) else {
        return output;
    };

    let half_width = window / 2;
    let coefficients = savitzky_golay_coefficients(half_width);
    for center in half_width..spectrum.len() - half_width {
        let neighbourhood = &spectrum[center - half_width..=center + half_width];
        output[center] = neighbourhood
            .iter()
            .zip(&coefficients)
            .map(|(value, weight)| value * weight)
            .sum();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{effective_window, savitzky_golay, savitzky_golay_coefficients};

    #[test]
    fn coefficients_match_tabulated_five_point_filter() {
        let coefficients = savitzky_golay_coefficients(2);
        let expected = [-3.0, 12.0, 17.0, 12.0, -3.0].map(|value| value / 35.0);
        for (index, (actual, expected)) in coefficients.iter().zip(expected).enumerate() {
            assert!(
                (actual - expected).abs() < 1.0e-15,
                "coefficient {index}: expected {expected}, got {actual}"
            );
        }
        let sum: f64 = savitzky_golay_coefficients(7).iter().sum();
        assert!((sum - 1.0).abs() < 1.0e-12);
    }

    #[test]
    fn window_is_forced_odd_and_bounded_by_spectrum_length() {
        assert_eq!(effective_window(1, 100), None);
        assert_eq!(effective_window(2, 100), Some(3));
        assert_eq!(effective_window(7, 100), Some(7));
        assert_eq!(effective_window(11, 6), Some(5));
        assert_eq!(effective_window(11, 2), None);
    }

    #[test]
    fn quadratic_signals_pass_through_unchanged() {
        let spectrum: Vec<f64> = (0..40)
            .map(|channel| {
                let x = channel as f64;
                3.0 + 0.5 * x - 0.02 * x * x
            })
            .collect();
        let smoothed = savitzky_golay(&spectrum, 7);
        for (channel, (raw, smooth)) in spectrum.iter().zip(&smoothed).enumerate() {
            assert!(
                (raw - smooth).abs() < 1.0e-10,
                "channel {channel}: raw={raw} smoothed={smooth}"
            );
        }
    }

    #[test]
    fn narrow_width_is_identity_and_edges_are_preserved() {
        let spectrum = [5.0, 1.0, 9.0, 2.0, 8.0, 3.0];
        assert_eq!(savitzky_golay(&spectrum, 1), spectrum.to_vec());

        let smoothed = savitzky_golay(&spectrum, 5);
        assert_eq!(smoothed[0], 5.0);
        assert_eq!(smoothed[1], 1.0);
        assert_eq!(smoothed[5], 3.0);
        assert_ne!(smoothed[2], 9.0);
    }
}
