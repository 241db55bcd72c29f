use crate::common::PeakModelSection;
use crate::domain::{FastFitError, FastFitResult};
use crate::modules::traits::FitParameter;
use std::collections::BTreeSet;
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct FitWindow {
    pub(super) xdata: Vec<f64>,
    pub(super) ydata: Vec<f64>,
}

pub(super) fn background_term_name(order: usize) -> String {
    match order {
        0 => "Constant".to_string(),
        1 => "1st Order".to_string(),
        2 => "2nd Order".to_string(),
        3 => "3rd Order".to_string(),
        order => format!("{order}th Order"),
    }
}

pub(super) fn validate_peak_section(section: &PeakModelSection) -> FastFitResult<()> {
    let mut seen: BTreeSet<String> = (0..section.background_terms)
        .map(background_term_name)
        .collect();

    for peak in &section.peaks {
        let name = peak.name.trim();
        if name.is_empty() {
            return Err(FastFitError::configuration(
                "CONFIG.PEAK_NAME",
                "peak names must be non-empty",
            ));
        }
        if !seen.insert(name.to_string()) {
            return Err(FastFitError::configuration(
                "CONFIG.PEAK_NAME",
                format!("peak name '{name}' is used more than once"),
            ));
        }
        if !peak.center.is_finite() {
            return Err(FastFitError::configuration(
                "CONFIG.PEAK_CENTER",
                format!("peak '{name}' center must be finite, got {}", peak.center),
            ));
        }
        if !peak.sigma.is_finite() || peak.sigma <= 0.0 {
            return Err(FastFitError::configuration(
                "CONFIG.PEAK_SIGMA",
                format!("peak '{name}' sigma must be finite and > 0, got {}", peak.sigma),
            ));
        }
    }
    Ok(())
}

/// Continuum terms first, then peaks in configuration order.
pub(super) fn build_parameters(section: &PeakModelSection) -> Vec<FitParameter> {
    let background = (0..section.background_terms)
        .map(|order| FitParameter::new(background_term_name(order), !section.fix_background, true));
    let peaks = section
        .peaks
        .iter()
        .map(|peak| FitParameter::new(peak.name.trim(), peak.free, false));
    background.chain(peaks).collect()
}

/// Contiguous sub-range of `y` whose axis values lie within `[xmin, xmax]`.
/// The axis defaults to channel indices when `x` is absent.
pub(super) fn select_window(
    x: Option<&[f64]>,
    y: &[f64],
    xmin: Option<f64>,
    xmax: Option<f64>,
) -> FastFitResult<FitWindow> {
    if let Some(x) = x
        && x.len() != y.len()
    {
        return Err(FastFitError::dimension(
            "RUN.MODEL_AXIS",
            format!(
                "x axis length ({}) does not match spectrum length ({})",
                x.len(),
                y.len()
            ),
        ));
    }

    let axis = |index: usize| x.map_or(index as f64, |x| x[index]);
    let lower = xmin.unwrap_or(f64::NEG_INFINITY);
    let upper = xmax.unwrap_or(f64::INFINITY);
    let first = (0..y.len()).find(|&index| axis(index) >= lower);
    let last = (0..y.len()).rev().find(|&index| axis(index) <= upper);

    match (first, last) {
        (Some(first), Some(last)) if first <= last => Ok(FitWindow {
            xdata: (first..=last).map(axis).collect(),
            ydata: y[first..=last].to_vec(),
        }),
        _ => Err(FastFitError::configuration(
            "CONFIG.FIT_WINDOW",
            format!("fit window [{lower}, {upper}] selects no channels"),
        )),
    }
}

/// `((x - center) / half_span)^order` over the window.
pub(super) fn background_derivative(order: usize, xdata: &[f64]) -> Vec<f64> {
    let (first, last) = match (xdata.first(), xdata.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Vec::new(),
    };
    let center = 0.5 * (first + last);
    let half_span = 0.5 * (last - first).abs();
    let scale = if half_span > 0.0 { half_span } else { 1.0 };
    xdata
        .iter()
        .map(|x| ((x - center) / scale).powi(order as i32))
        .collect()
}

/// Unit-height Gaussian profile; the derivative with respect to its amplitude.
pub(super) fn gaussian_profile(center: f64, sigma: f64, xdata: &[f64]) -> Vec<f64> {
    xdata
        .iter()
        .map(|x| {
            let z = (x - center) / sigma;
            (-0.5 * z * z).exp()
        })
        .collect()
}

pub(super) fn gaussian_area(amplitude: f64, sigma: f64) -> f64 {
    amplitude * sigma * (2.0 * PI).sqrt()
}
