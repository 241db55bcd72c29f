//! Fit configuration consumed by the batch fitter.
//!
//! Only the keys the fast linear fit reads are modelled; everything else in a
//! configuration document is ignored. Flags accept either JSON booleans or the
//! `0`/`1` integers written by older configuration files.

use super::constants::{DEFAULT_SNIP_WIDTH, DEFAULT_STRIP_FILTER_WIDTH};
use crate::domain::{FastFitError, FastFitResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct FitConfiguration {
    #[serde(default)]
    pub fit: FitSection,
    #[serde(default)]
    pub concentrations: ConcentrationsSection,
    #[serde(default)]
    pub peaks: PeakModelSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FitSection {
    #[serde(default, deserialize_with = "flag")]
    pub stripflag: bool,
    #[serde(default = "default_strip_algorithm")]
    pub stripalgorithm: i64,
    #[serde(default = "default_strip_filter_width")]
    pub stripfilterwidth: usize,
    #[serde(default = "default_snip_width")]
    pub snipwidth: f64,
    #[serde(default, deserialize_with = "flag")]
    pub stripanchorsflag: bool,
    #[serde(default)]
    pub stripanchorslist: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "flag")]
    pub fitweight: bool,
    #[serde(default, deserialize_with = "flag")]
    pub linearfitflag: bool,
}

impl Default for FitSection {
    fn default() -> Self {
        Self {
            stripflag: false,
            stripalgorithm: default_strip_algorithm(),
            stripfilterwidth: DEFAULT_STRIP_FILTER_WIDTH,
            snipwidth: DEFAULT_SNIP_WIDTH,
            stripanchorsflag: false,
            stripanchorslist: None,
            fitweight: false,
            linearfitflag: false,
        }
    }
}

impl FitSection {
    pub fn strip_algorithm(&self) -> FastFitResult<StripAlgorithm> {
        StripAlgorithm::from_code(self.stripalgorithm)
    }

    /// Anchor positions in x-axis units, present only when anchors are enabled.
    pub fn active_anchors(&self) -> Option<&[f64]> {
        if !self.stripanchorsflag {
            return None;
        }
        self.stripanchorslist.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StripAlgorithm {
    Strip,
    Snip,
}

impl StripAlgorithm {
    pub fn from_code(code: i64) -> FastFitResult<Self> {
        match code {
            0 => Ok(Self::Strip),
            1 => Ok(Self::Snip),
            other => Err(FastFitError::configuration(
                "CONFIG.STRIP_ALGORITHM",
                format!("unknown background algorithm code {other}"),
            )),
        }
    }

    pub const fn code(self) -> i64 {
        match self {
            Self::Strip => 0,
            Self::Snip => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ConcentrationsSection {
    #[serde(default, deserialize_with = "flag")]
    pub usematrix: bool,
    #[serde(default)]
    pub reference: String,
    /// Mass fraction produced by one unit of fitted area, per group.
    #[serde(default)]
    pub sensitivities: BTreeMap<String, f64>,
    #[serde(default)]
    pub layers: Vec<LayerSensitivities>,
}

impl ConcentrationsSection {
    pub fn wants_automatic_reference(&self) -> bool {
        self.usematrix && self.reference.trim().eq_ignore_ascii_case("auto")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LayerSensitivities {
    pub name: String,
    #[serde(default)]
    pub sensitivities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PeakModelSection {
    /// Number of polynomial continuum terms (constant, linear, ...).
    #[serde(default = "default_background_terms")]
    pub background_terms: usize,
    #[serde(default, deserialize_with = "flag")]
    pub fix_background: bool,
    #[serde(default)]
    pub peaks: Vec<PeakDefinition>,
}

impl Default for PeakModelSection {
    fn default() -> Self {
        Self {
            background_terms: default_background_terms(),
            fix_background: false,
            peaks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PeakDefinition {
    pub name: String,
    pub center: f64,
    pub sigma: f64,
    #[serde(default = "default_free")]
    pub free: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read fit configuration '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse fit configuration '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<ConfigLoadError> for FastFitError {
    fn from(error: ConfigLoadError) -> Self {
        match error {
            ConfigLoadError::Read { .. } => {
                FastFitError::io_system("IO.CONFIG_READ", error.to_string())
            }
            ConfigLoadError::Parse { .. } => {
                FastFitError::configuration("CONFIG.PARSE", error.to_string())
            }
        }
    }
}

pub fn load_fit_configuration(
    config_path: impl AsRef<Path>,
) -> Result<FitConfiguration, ConfigLoadError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| ConfigLoadError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| ConfigLoadError::Parse {
        path: config_path.to_path_buf(),
        source,
    })
}

const fn default_strip_algorithm() -> i64 {
    StripAlgorithm::Snip.code()
}

const fn default_strip_filter_width() -> usize {
    DEFAULT_STRIP_FILTER_WIDTH
}

const fn default_snip_width() -> f64 {
    DEFAULT_SNIP_WIDTH
}

const fn default_background_terms() -> usize {
    2
}

const fn default_free() -> bool {
    true
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFlag {
        Bool(bool),
        Int(i64),
    }

    Ok(match RawFlag::deserialize(deserializer)? {
        RawFlag::Bool(value) => value,
        RawFlag::Int(value) => value != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::{ConfigLoadError, FitConfiguration, StripAlgorithm, load_fit_configuration};
    use crate::domain::{FastFitError, FastFitErrorKind};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: FitConfiguration = serde_json::from_str("{}").expect("empty config parses");
        assert!(!config.fit.stripflag);
        assert_eq!(config.fit.strip_algorithm(), Ok(StripAlgorithm::Snip));
        assert_eq!(config.fit.stripfilterwidth, 1);
        assert_eq!(config.fit.snipwidth, 30.0);
        assert_eq!(config.peaks.background_terms, 2);
        assert!(config.fit.active_anchors().is_none());
    }

    #[test]
    fn integer_flags_and_unknown_keys_are_accepted() {
        let config: FitConfiguration = serde_json::from_str(
            r#"
            {
              "fit": {
                "stripflag": 1,
                "stripalgorithm": 1,
                "stripfilterwidth": 5,
                "snipwidth": 12.5,
                "stripanchorsflag": 1,
                "stripanchorslist": [120.0, 480.0],
                "fitweight": 0,
                "linearfitflag": true,
                "maxiter": 10
              },
              "concentrations": { "usematrix": 1, "reference": "Auto" }
            }
            "#,
        )
        .expect("config parses");

        assert!(config.fit.stripflag);
        assert_eq!(config.fit.stripfilterwidth, 5);
        assert_eq!(config.fit.active_anchors(), Some(&[120.0, 480.0][..]));
        assert!(!config.fit.fitweight);
        assert!(config.fit.linearfitflag);
        assert!(config.concentrations.wants_automatic_reference());
    }

    #[test]
    fn unknown_strip_algorithm_codes_are_configuration_errors() {
        let error = StripAlgorithm::from_code(7).expect_err("code 7 is unknown");
        assert_eq!(error.kind(), FastFitErrorKind::Configuration);
    }

    #[test]
    fn loader_reports_read_and_parse_failures() {
        let temp = TempDir::new().expect("tempdir should be created");
        let missing = temp.path().join("missing.json");
        let error = load_fit_configuration(&missing).expect_err("missing file");
        assert!(matches!(error, ConfigLoadError::Read { .. }));
        assert_eq!(
            FastFitError::from(error).kind(),
            FastFitErrorKind::IoSystem
        );

        let broken = temp.path().join("broken.json");
        fs::write(&broken, "{ not json").expect("write broken config");
        let error = load_fit_configuration(&broken).expect_err("broken json");
        assert!(matches!(error, ConfigLoadError::Parse { .. }));

        let valid = temp.path().join("valid.json");
        fs::write(&valid, r#"{ "fit": { "snipwidth": 8 } }"#).expect("write config");
        let config = load_fit_configuration(&valid).expect("valid config loads");
        assert_eq!(config.fit.snipwidth, 8.0);
    }
}
