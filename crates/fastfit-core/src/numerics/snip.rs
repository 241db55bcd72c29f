//! SNIP (statistics-sensitive non-linear iterative peak clipping) envelope.

/// Number of clipping passes for a configured SNIP half-width.
pub fn snip_iterations(snip_width: f64) -> usize {
    if !snip_width.is_finite() || snip_width <= 0.0 {
        return 0;
    }
    snip_width.round() as usize
}

/// Clip `values` in place towards the continuum underneath its peaks.
///
/// Pass `p` (for `p = 1..=iterations`) replaces every sample `i` in `[p, n - p)`
/// with `min(y[i], (y[i - p] + y[i + p]) / 2)`, reading the values left by the
/// previous pass. Samples are therefore never raised.
pub fn snip1d(values: &mut [f64], iterations: usize) {
    let len = values.len();
    let mut previous = values.to_vec();
    for offset in 1..=iterations {
        if 2 * offset >= len {
            break;
        }
        for index in offset..len - offset {
            let neighbour_mean = 0.5 * (previous[index - offset] + previous[index + offset]);
            values[index] = previous[index].min(neighbour_mean);
        }
        previous[offset..len - offset].copy_from_slice(&values[offset..len - offset]);
    }
}
