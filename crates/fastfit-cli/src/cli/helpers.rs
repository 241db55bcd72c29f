use super::CliError;
use anyhow::Context;
use fastfit_core::domain::{FastFitError, FastFitOutput, SpectralVolume, VolumeInput};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Stack file layout: samples in row-major `(row, column, channel)` order.
#[derive(Debug, Deserialize)]
pub(super) struct StackFile {
    pub(super) shape: Vec<usize>,
    pub(super) data: Vec<f64>,
    #[serde(rename = "mcaIndex", default)]
    pub(super) mca_index: Option<isize>,
}

pub(super) struct LoadedStack {
    pub(super) volume: SpectralVolume,
    pub(super) mca_index: Option<isize>,
}

impl LoadedStack {
    pub(super) fn input(&self) -> VolumeInput<'_> {
        match self.mca_index {
            Some(mca_index) => VolumeInput::Annotated {
                volume: &self.volume,
                mca_index,
            },
            None => VolumeInput::Plain(&self.volume),
        }
    }
}

pub(super) fn load_stack(path: &Path) -> Result<LoadedStack, CliError> {
    let stack: StackFile = read_json(path, "stack")?;
    let volume = SpectralVolume::from_shape(&stack.shape, stack.data)?;
    Ok(LoadedStack {
        volume,
        mca_index: stack.mca_index,
    })
}

pub(super) fn load_axis(path: &Path) -> Result<Vec<f64>, CliError> {
    read_json(path, "x axis")
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T, CliError> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} file '{}'", path.display()))?;
    serde_json::from_str(&source).map_err(|error| {
        CliError::Compute(FastFitError::configuration(
            "INPUT.JSON",
            format!("failed to parse {what} file '{}': {error}", path.display()),
        ))
    })
}

pub(super) fn write_output(path: &Path, output: &FastFitOutput) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create output directory '{}'", parent.display())
        })?;
    }
    let rendered = serde_json::to_string_pretty(output).context("failed to render fit output")?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write fit output '{}'", path.display()))?;
    Ok(())
}

pub(super) fn render_human_summary(output: &FastFitOutput, destination: Option<&PathBuf>) -> String {
    let mut lines = vec![
        format!(
            "Fitted {} parameters over {}x{} pixels",
            output.parameters.n_parameters(),
            output.parameters.rows(),
            output.parameters.columns()
        ),
        format!("Refinement passes: {}", output.refit_passes),
    ];
    for report in &output.forced_zero {
        lines.push(format!(
            "Forced to zero: {} ({} pixels)",
            report.parameter, report.pixels
        ));
    }
    if let Some(maps) = &output.concentrations {
        lines.push(format!("Concentration maps: {}", maps.n_parameters()));
    }
    if let Some(path) = destination {
        lines.push(format!("Output: {}", path.display()));
    }
    lines.join("\n")
}
