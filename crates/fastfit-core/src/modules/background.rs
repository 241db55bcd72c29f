//! Continuum estimation: Savitzky-Golay smoothing followed by a SNIP envelope
//! pass on every anchor-delimited segment.

use crate::common::FitSection;
use crate::numerics::{savitzky_golay, snip1d, snip_iterations};
use std::ops::Range;

/// Sorted, de-duplicated channel indices splitting the spectrum into
/// independently baselined segments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnchorList {
    indices: Vec<usize>,
}

impl AnchorList {
    pub fn new(candidates: impl IntoIterator<Item = usize>) -> Self {
        let mut indices: Vec<usize> = candidates.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        Self { indices }
    }

    /// Translate anchor positions given in x-axis units onto window-relative
    /// channel indices of `xdata`.
    pub fn from_calibration(anchor_values: &[f64], xdata: &[f64]) -> Self {
        let Some(&first) = xdata.first() else {
            return Self::default();
        };

        Self::new(anchor_values.iter().filter_map(|&anchor| {
            if anchor <= first {
                return None;
            }
            xdata
                .iter()
                .position(|&x| x >= anchor)
                .filter(|&index| index > 0)
        }))
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Segments covering `[0, len)`; anchors outside `[1, len - 1)` are ignored.
    pub fn segments(&self, len: usize) -> Vec<Range<usize>> {
        let mut segments = Vec::with_capacity(self.indices.len() + 1);
        let mut start = 0;
        for &anchor in &self.indices {
            if anchor >= 1 && anchor + 1 < len && anchor > start {
                segments.push(start..anchor);
                start = anchor;
            }
        }
        if start < len {
            segments.push(start..len);
        }
        segments
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundEstimator {
    filter_width: usize,
    snip_iterations: usize,
}

impl BackgroundEstimator {
    pub fn new(filter_width: usize, snip_width: f64) -> Self {
        Self {
            filter_width,
            snip_iterations: snip_iterations(snip_width),
        }
    }

    pub fn from_fit_section(section: &FitSection) -> Self {
        Self::new(section.stripfilterwidth, section.snipwidth)
    }

    pub fn filter_width(&self) -> usize {
        self.filter_width
    }

    pub fn snip_iterations(&self) -> usize {
        self.snip_iterations
    }

    pub fn estimate(&self, spectrum: &[f64], anchors: &AnchorList) -> Vec<f64> {
        let mut baseline = savitzky_golay(spectrum, self.filter_width);
        for segment in anchors.segments(baseline.len()) {
            snip1d(&mut baseline[segment], self.snip_iterations);
        }
        baseline
    }

    pub fn subtract_in_place(&self, spectrum: &mut [f64], anchors: &AnchorList) {
        let baseline = self.estimate(spectrum, anchors);
        for (value, background) in spectrum.iter_mut().zip(baseline) {
            *value -= background;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnchorList, BackgroundEstimator};
    use crate::numerics::savitzky_golay;

    fn peaked_spectrum(len: usize) -> Vec<f64> {
        (0..len)
            .map(|channel| {
                let x = channel as f64;
                let continuum = 50.0 * (-x / 300.0).exp() + 5.0;
                let peak = |center: f64, height: f64| {
                    height * (-0.5 * ((x - center) / 3.0).powi(2)).exp()
                };
                continuum + peak(60.0, 400.0) + peak(250.0, 150.0) + peak(430.0, 80.0)
            })
            .collect()
    }

    #[test]
    fn anchors_are_sorted_and_out_of_range_entries_dropped() {
        let anchors = AnchorList::new([400, 100, 100, 0, 499, 700]);
        assert_eq!(anchors.indices(), &[0, 100, 400, 499, 700]);
        assert_eq!(anchors.segments(500), vec![0..100, 100..400, 400..500]);
    }

    #[test]
    fn discarded_anchors_fall_back_to_whole_spectrum() {
        let anchors = AnchorList::new([0, 9, 42]);
        assert_eq!(anchors.segments(10), vec![0..10]);
        assert_eq!(AnchorList::default().segments(10), vec![0..10]);
    }

    #[test]
    fn calibration_anchors_map_onto_window_indices() {
        let xdata: Vec<f64> = (0..50).map(|index| 100.0 + 2.0 * index as f64).collect();
        let anchors = AnchorList::from_calibration(&[90.0, 100.0, 121.0, 150.0, 500.0], &xdata);
        assert_eq!(anchors.indices(), &[11, 25]);
    }

    #[test]
    fn baseline_never_exceeds_smoothed_input() {
        let spectrum = peaked_spectrum(500);
        let estimator = BackgroundEstimator::new(5, 25.0);
        let anchors = AnchorList::new([100, 400]);
        let smoothed = savitzky_golay(&spectrum, 5);
        let baseline = estimator.estimate(&spectrum, &anchors);

        assert_eq!(baseline.len(), spectrum.len());
        for (channel, (base, smooth)) in baseline.iter().zip(&smoothed).enumerate() {
            assert!(base <= smooth, "channel {channel}: {base} > {smooth}");
        }
        assert!(baseline[60] < 60.0, "peak must be clipped, got {}", baseline[60]);
    }

    #[test]
    fn perturbing_one_segment_leaves_the_others_untouched() {
        let spectrum = peaked_spectrum(500);
        let estimator = BackgroundEstimator::new(5, 25.0);
        let anchors = AnchorList::new([100, 400]);
        let reference = estimator.estimate(&spectrum, &anchors);

        let mut perturbed = spectrum.clone();
        for value in &mut perturbed[200..300] {
            *value += 1000.0;
        }
        let baseline = estimator.estimate(&perturbed, &anchors);

        assert_eq!(&baseline[..100], &reference[..100]);
        assert_eq!(&baseline[400..], &reference[400..]);
        assert_ne!(&baseline[100..400], &reference[100..400]);
    }

    #[test]
    fn subtraction_removes_the_estimated_baseline() {
        let spectrum = peaked_spectrum(200);
        let estimator = BackgroundEstimator::new(1, 20.0);
        let anchors = AnchorList::default();
        let baseline = estimator.estimate(&spectrum, &anchors);
        let mut net = spectrum.clone();
        estimator.subtract_in_place(&mut net, &anchors);

        for channel in 0..spectrum.len() {
            assert_eq!(net[channel], spectrum[channel] - baseline[channel]);
            assert!(net[channel] >= 0.0);
        }
    }
}
