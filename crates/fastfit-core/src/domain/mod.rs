pub mod errors;

pub use errors::{FastFitError, FastFitErrorKind, FastFitResult};

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Channel axis marker accepted for annotated volumes: `-1` and `2` both name
/// the last axis of a `(rows, columns, channels)` volume.
pub const SUPPORTED_MCA_INDICES: [isize; 2] = [-1, 2];

/// Stack of spectra laid out as `(row, column, channel)` with the channel axis
/// fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralVolume {
    rows: usize,
    columns: usize,
    channels: usize,
    data: Vec<f64>,
}

impl SpectralVolume {
    pub fn new(
        rows: usize,
        columns: usize,
        channels: usize,
        data: Vec<f64>,
    ) -> FastFitResult<Self> {
        Self::from_shape(&[rows, columns, channels], data)
    }

    pub fn from_shape(shape: &[usize], data: Vec<f64>) -> FastFitResult<Self> {
        if shape.len() != 3 {
            return Err(FastFitError::unsupported_shape(
                "SHAPE.DIMENSIONS",
                format!(
                    "only three dimensional (rows, columns, channels) volumes are supported, got {} dimensions",
                    shape.len()
                ),
            ));
        }

        let [rows, columns, channels] = [shape[0], shape[1], shape[2]];
        if rows == 0 || columns == 0 || channels == 0 {
            return Err(FastFitError::unsupported_shape(
                "SHAPE.EMPTY_AXIS",
                format!("volume axes must be non-empty, got {rows}x{columns}x{channels}"),
            ));
        }

        let expected = sample_count(rows, columns, channels)?;
        if data.len() != expected {
            return Err(FastFitError::unsupported_shape(
                "SHAPE.DATA_LENGTH",
                format!(
                    "volume shape {rows}x{columns}x{channels} needs {expected} samples, got {}",
                    data.len()
                ),
            ));
        }

        Ok(Self {
            rows,
            columns,
            channels,
            data,
        })
    }

    pub fn from_fn(
        rows: usize,
        columns: usize,
        channels: usize,
        mut sample: impl FnMut(usize, usize, usize) -> f64,
    ) -> FastFitResult<Self> {
        let mut data = Vec::with_capacity(sample_count(rows, columns, channels)?);
        for row in 0..rows {
            for column in 0..columns {
                for channel in 0..channels {
                    data.push(sample(row, column, channel));
                }
            }
        }
        Self::new(rows, columns, channels, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.columns
    }

    pub fn spectrum(&self, row: usize, column: usize) -> &[f64] {
        let start = (row * self.columns + column) * self.channels;
        &self.data[start..start + self.channels]
    }

    pub fn row_spectra(&self, row: usize) -> impl Iterator<Item = &[f64]> {
        let start = row * self.columns * self.channels;
        self.data[start..start + self.columns * self.channels].chunks_exact(self.channels)
    }
}

fn sample_count(rows: usize, columns: usize, channels: usize) -> FastFitResult<usize> {
    rows.checked_mul(columns)
        .and_then(|pixels| pixels.checked_mul(channels))
        .ok_or_else(|| {
            FastFitError::unsupported_shape(
                "SHAPE.DATA_LENGTH",
                format!("volume shape {rows}x{columns}x{channels} overflows the addressable size"),
            )
        })
}

/// Observation volume handed to the fitter, decided once at the boundary.
#[derive(Debug, Clone, Copy)]
pub enum VolumeInput<'a> {
    Plain(&'a SpectralVolume),
    Annotated {
        volume: &'a SpectralVolume,
        mca_index: isize,
    },
}

impl<'a> VolumeInput<'a> {
    pub fn resolve(self) -> FastFitResult<&'a SpectralVolume> {
        match self {
            Self::Plain(volume) => Ok(volume),
            Self::Annotated { volume, mca_index } => {
                if SUPPORTED_MCA_INDICES.contains(&mca_index) {
                    Ok(volume)
                } else {
                    Err(FastFitError::unsupported_shape(
                        "SHAPE.MCA_INDEX",
                        format!(
                            "only volumes with the channel axis last are supported, got mca index {mca_index}"
                        ),
                    ))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum WeightPolicy {
    #[default]
    None,
    Average,
    Individual,
}

impl WeightPolicy {
    pub fn from_selector(selector: i64) -> FastFitResult<Self> {
        match selector {
            0 => Ok(Self::None),
            1 => Ok(Self::Average),
            2 => Ok(Self::Individual),
            other => Err(FastFitError::configuration(
                "CONFIG.WEIGHT_POLICY",
                format!("weight selector must be 0, 1 or 2, got {other}"),
            )),
        }
    }

    pub const fn selector(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Average => 1,
            Self::Individual => 2,
        }
    }

    pub const fn is_weighted(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Per-pixel result planes indexed `(parameter, row, column)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterMap {
    n_parameters: usize,
    rows: usize,
    columns: usize,
    values: Vec<f64>,
}

impl ParameterMap {
    pub fn zeros(n_parameters: usize, rows: usize, columns: usize) -> Self {
        Self {
            n_parameters,
            rows,
            columns,
            values: vec![0.0; n_parameters * rows * columns],
        }
    }

    pub fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn get(&self, parameter: usize, row: usize, column: usize) -> f64 {
        self.values[self.offset(parameter, row, column)]
    }

    pub fn set(&mut self, parameter: usize, row: usize, column: usize, value: f64) {
        let offset = self.offset(parameter, row, column);
        self.values[offset] = value;
    }

    /// Row-major `(row, column)` plane of one parameter.
    pub fn plane(&self, parameter: usize) -> &[f64] {
        let size = self.rows * self.columns;
        &self.values[parameter * size..(parameter + 1) * size]
    }

    pub fn plane_mut(&mut self, parameter: usize) -> &mut [f64] {
        let size = self.rows * self.columns;
        &mut self.values[parameter * size..(parameter + 1) * size]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn offset(&self, parameter: usize, row: usize, column: usize) -> usize {
        (parameter * self.rows + row) * self.columns + column
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitSessionState {
    Configuring,
    BuildingBasis,
    InitialPass,
    Refining { pass: usize },
    Done,
}

impl Display for FitSessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuring => f.write_str("Configuring"),
            Self::BuildingBasis => f.write_str("BuildingBasis"),
            Self::InitialPass => f.write_str("InitialPass"),
            Self::Refining { pass } => write!(f, "Refining({pass})"),
            Self::Done => f.write_str("Done"),
        }
    }
}

/// Pixels of one parameter that were forced to zero when the refinement pass
/// budget ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcedZeroReport {
    pub parameter: String,
    pub pixels: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FastFitOutput {
    pub parameters: ParameterMap,
    pub uncertainties: ParameterMap,
    pub names: Vec<String>,
    pub concentrations: Option<ParameterMap>,
    pub forced_zero: Vec<ForcedZeroReport>,
    pub refit_passes: usize,
}

impl FastFitOutput {
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn forced_zero_pixels(&self) -> usize {
        self.forced_zero.iter().map(|report| report.pixels).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FastFitErrorKind, ParameterMap, SpectralVolume, VolumeInput, WeightPolicy,
    };

    #[test]
    fn volume_rejects_non_three_dimensional_shapes() {
        let error = SpectralVolume::from_shape(&[4, 8], vec![0.0; 32])
            .expect_err("2D shape should be rejected");
        assert_eq!(error.kind(), FastFitErrorKind::UnsupportedShape);
        assert_eq!(error.placeholder(), "SHAPE.DIMENSIONS");

        let error = SpectralVolume::from_shape(&[2, 2, 3], vec![0.0; 11])
            .expect_err("size mismatch should be rejected");
        assert_eq!(error.placeholder(), "SHAPE.DATA_LENGTH");
    }

    #[test]
    fn volume_rejects_shapes_whose_size_overflows() {
        let error = SpectralVolume::from_shape(&[1usize << 63, 2, 1], Vec::new())
            .expect_err("overflowing shape should be rejected");
        assert_eq!(error.kind(), FastFitErrorKind::UnsupportedShape);
        assert_eq!(error.placeholder(), "SHAPE.DATA_LENGTH");

        let error = SpectralVolume::from_fn(usize::MAX, 2, 2, |_, _, _| 0.0)
            .expect_err("overflowing generator shape should be rejected");
        assert_eq!(error.placeholder(), "SHAPE.DATA_LENGTH");
    }

    #[test]
    fn volume_spectrum_slices_follow_channel_fastest_layout() {
        let volume = SpectralVolume::from_fn(2, 3, 4, |row, column, channel| {
            (row * 100 + column * 10 + channel) as f64
        })
        .expect("volume");

        assert_eq!(volume.spectrum(1, 2), &[120.0, 121.0, 122.0, 123.0]);
        let row: Vec<&[f64]> = volume.row_spectra(0).collect();
        assert_eq!(row.len(), 3);
        assert_eq!(row[1][0], 10.0);
    }

    #[test]
    fn annotated_input_only_accepts_last_channel_axis() {
        let volume = SpectralVolume::from_fn(1, 1, 2, |_, _, _| 1.0).expect("volume");
        assert!(VolumeInput::Plain(&volume).resolve().is_ok());
        assert!(
            VolumeInput::Annotated {
                volume: &volume,
                mca_index: 2
            }
            .resolve()
            .is_ok()
        );

        let error = VolumeInput::Annotated {
            volume: &volume,
            mca_index: 0,
        }
        .resolve()
        .expect_err("leading channel axis is unsupported");
        assert_eq!(error.kind(), FastFitErrorKind::UnsupportedShape);
    }

    #[test]
    fn weight_selector_maps_onto_policies() {
        assert_eq!(WeightPolicy::from_selector(0), Ok(WeightPolicy::None));
        assert_eq!(WeightPolicy::from_selector(1), Ok(WeightPolicy::Average));
        assert_eq!(WeightPolicy::from_selector(2), Ok(WeightPolicy::Individual));
        let error = WeightPolicy::from_selector(3).expect_err("unknown selector");
        assert_eq!(error.kind(), FastFitErrorKind::Configuration);
    }

    #[test]
    fn parameter_map_planes_are_row_major() {
        let mut map = ParameterMap::zeros(2, 2, 3);
        map.set(1, 1, 2, 7.5);
        assert_eq!(map.get(1, 1, 2), 7.5);
        assert_eq!(map.plane(1)[5], 7.5);
        assert!(map.plane(0).iter().all(|value| *value == 0.0));
    }
}
