use crate::domain::{FastFitError, FastFitResult, SpectralVolume, WeightPolicy};
use crate::numerics::SpectrumAccumulator;
use std::ops::Range;

/// Inclusive channel range of the volume covered by the model's fit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ChannelWindow {
    pub(super) first: usize,
    pub(super) last: usize,
}

impl ChannelWindow {
    pub(super) fn len(self) -> usize {
        self.last - self.first + 1
    }

    pub(super) fn range(self) -> Range<usize> {
        self.first..self.last + 1
    }
}

/// Spectrum the model is set up on: the caller's sum, the full sum when
/// average weights need it, pixel `(0, 0)` when nothing else needs a sum, or
/// the sum of the first row when concentrations are requested.
pub(super) fn representative_spectrum(
    volume: &SpectralVolume,
    policy: WeightPolicy,
    concentrations: bool,
    ysum: Option<&[f64]>,
    sum_chunk_width: usize,
) -> FastFitResult<Vec<f64>> {
    if let Some(ysum) = ysum {
        if ysum.len() != volume.channels() {
            return Err(FastFitError::dimension(
                "RUN.YSUM_LENGTH",
                format!(
                    "sum spectrum length ({}) does not match channel count ({})",
                    ysum.len(),
                    volume.channels()
                ),
            ));
        }
        return Ok(ysum.to_vec());
    }

    if policy == WeightPolicy::Average {
        return Ok(sum_rows(volume, 0..volume.rows(), sum_chunk_width));
    }
    if !concentrations {
        return Ok(volume.spectrum(0, 0).to_vec());
    }
    Ok(sum_rows(volume, 0..1, sum_chunk_width))
}

/// Sum over `rows`, adding one column chunk at a time to the running total.
fn sum_rows(volume: &SpectralVolume, rows: Range<usize>, sum_chunk_width: usize) -> Vec<f64> {
    let channels = volume.channels();
    let step = sum_chunk_width.clamp(1, volume.columns());
    let mut total = SpectrumAccumulator::new(channels);
    for row in rows {
        let spectra: Vec<&[f64]> = volume.row_spectra(row).collect();
        for chunk in spectra.chunks(step) {
            let mut partial = SpectrumAccumulator::new(channels);
            for spectrum in chunk {
                partial.add(spectrum);
            }
            total.add(&partial.into_sum());
        }
    }
    total.into_sum()
}

/// Map the model's window axis back onto volume channels.
///
/// Without an explicit axis the model works on channel indices, so the window
/// bounds are read directly; otherwise the first index is the last channel at
/// or below `xdata[0]` and the last index the first channel at or above
/// `xdata[last]`.
pub(super) fn channel_window(
    x: Option<&[f64]>,
    xdata: &[f64],
    channels: usize,
) -> FastFitResult<ChannelWindow> {
    let (Some(&lower), Some(&upper)) = (xdata.first(), xdata.last()) else {
        return Err(FastFitError::dimension(
            "RUN.EMPTY_WINDOW",
            "model reported an empty fit window",
        ));
    };

    let window = match x {
        None => ChannelWindow {
            first: channel_index(lower, channels)?,
            last: channel_index(upper, channels)?,
        },
        Some(x) => {
            let first = x.iter().rposition(|value| *value <= lower);
            let last = x.iter().position(|value| *value >= upper);
            match (first, last) {
                (Some(first), Some(last)) => ChannelWindow { first, last },
                _ => {
                    return Err(FastFitError::dimension(
                        "RUN.WINDOW_AXIS",
                        format!("fit window [{lower}, {upper}] is not covered by the x axis"),
                    ));
                }
            }
        }
    };

    if window.first > window.last || window.len() != xdata.len() {
        return Err(FastFitError::dimension(
            "RUN.WINDOW_LENGTH",
            format!(
                "channels {}..={} do not line up with the {} model window points",
                window.first,
                window.last,
                xdata.len()
            ),
        ));
    }
    Ok(window)
}

fn channel_index(value: f64, channels: usize) -> FastFitResult<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && (value as usize) < channels {
        Ok(value as usize)
    } else {
        Err(FastFitError::dimension(
            "RUN.WINDOW_CHANNEL",
            format!("window bound {value} is not a channel index below {channels}"),
        ))
    }
}

/// Per-channel sigma shared by every pixel under average weighting.
pub(super) fn average_sigma(sum_window: &[f64], pixel_count: usize) -> Vec<f64> {
    let pixels = pixel_count.max(1) as f64;
    sum_window
        .iter()
        .map(|value| 1.0 + value.max(0.0).sqrt() / pixels)
        .collect()
}
