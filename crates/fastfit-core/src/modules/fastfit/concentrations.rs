use crate::common::ConcentrationsSection;
use crate::common::constants::MIN_REFERENCE_AREA;
use crate::domain::{FastFitError, FastFitResult, ParameterMap};
use crate::modules::concentrations::is_scatter_group;
use crate::modules::traits::{
    ConcentrationsConverter, ConcentrationsOutcome, FitModel, GroupArea,
};
use tracing::debug;

/// Fitted areas fed to the converter together with its outcome.
pub(super) struct ResolvedAreas {
    pub(super) areas: Vec<GroupArea>,
    pub(super) outcome: ConcentrationsOutcome,
}

/// With an automatic matrix reference the representative spectrum is fitted
/// once to pick the reference; otherwise every free peak gets unit area so the
/// converter only reports the area-to-mass-fraction factor.
pub(super) fn resolve_areas<M: FitModel>(
    model: &mut M,
    converter: &dyn ConcentrationsConverter,
    section: &ConcentrationsSection,
    peak_names: &[String],
) -> FastFitResult<ResolvedAreas> {
    if !section.wants_automatic_reference() {
        let areas: Vec<GroupArea> = peak_names
            .iter()
            .map(|name| GroupArea::new(name.clone(), 1.0))
            .collect();
        let outcome = converter.process_fit_areas(section, &areas)?;
        return Ok(ResolvedAreas { areas, outcome });
    }

    let fitted = model.linear_group_areas()?;
    let automatic = converter.process_fit_areas(section, &fitted)?;
    let areas: Vec<GroupArea> = fitted
        .into_iter()
        .map(|area| {
            if area.area <= 0.0 {
                GroupArea::new(area.group, MIN_REFERENCE_AREA)
            } else {
                area
            }
        })
        .collect();

    let mut resolved = section.clone();
    resolved.reference = automatic
        .reference
        .map(|line| format!("{} {}", line.element, line.transitions).trim().to_string())
        .unwrap_or_default();
    debug!(reference = %resolved.reference, "automatic concentration reference");
    let outcome = converter.process_fit_areas(&resolved, &areas)?;
    Ok(ResolvedAreas { areas, outcome })
}

/// Mass-fraction planes in group order (`C(group)` followed by one
/// `C(group)-layer` plane per layer when more than one layer is reported).
pub(super) fn concentration_maps(
    resolved: &ResolvedAreas,
    free_names: &[String],
    parameters: &ParameterMap,
    names: &mut Vec<String>,
) -> FastFitResult<ParameterMap> {
    let parameter_of = |group: &str| {
        free_names
            .iter()
            .position(|name| name == group)
            .ok_or_else(|| {
                FastFitError::computation(
                    "RUN.GROUP_PARAMETER",
                    format!("fitted group '{group}' has no free parameter"),
                )
            })
    };

    let reference = match resolved
        .outcome
        .reference
        .as_ref()
        .filter(|line| !line.is_unset())
    {
        Some(line) => {
            let area = line
                .group_label()
                .and_then(|label| resolved.areas.iter().find(|area| area.group == label))
                .ok_or_else(|| {
                    FastFitError::reference_resolution(
                        "CONC.REFERENCE",
                        format!(
                            "invalid reference <{}> <{}>",
                            line.element, line.transitions
                        ),
                    )
                })?;
            Some((parameters.plane(parameter_of(&area.group)?), area.area))
        }
        None => None,
    };

    let layered = resolved.outcome.layers.len() > 1;
    let mut planes: Vec<Vec<f64>> = Vec::new();
    for area in resolved
        .areas
        .iter()
        .filter(|area| !is_scatter_group(&area.group))
    {
        let values = parameters.plane(parameter_of(&area.group)?);
        let mut emit = |label: String, mass_fraction: Option<&f64>| -> FastFitResult<()> {
            let mass_fraction = mass_fraction.copied().ok_or_else(|| {
                FastFitError::configuration(
                    "CONC.MASS_FRACTION",
                    format!("no mass fraction reported for group '{}'", area.group),
                )
            })?;
            planes.push(scale_plane(values, reference, area.area, mass_fraction));
            names.push(label);
            Ok(())
        };

        emit(
            format!("C({})", area.group),
            resolved.outcome.mass_fractions.get(&area.group),
        )?;
        if layered {
            for layer in &resolved.outcome.layers {
                emit(
                    format!("C({})-{}", area.group, layer.name),
                    layer.mass_fractions.get(&area.group),
                )?;
            }
        }
    }

    let mut maps = ParameterMap::zeros(planes.len(), parameters.rows(), parameters.columns());
    for (index, plane) in planes.iter().enumerate() {
        maps.plane_mut(index).copy_from_slice(plane);
    }
    Ok(maps)
}

/// Without a reference: `value * mf / area`. With one, positive pixels are
/// normalised by the reference map: `value / ref * (ref_area / area) * mf`.
fn scale_plane(
    values: &[f64],
    reference: Option<(&[f64], f64)>,
    area: f64,
    mass_fraction: f64,
) -> Vec<f64> {
    match reference {
        None => values
            .iter()
            .map(|value| value * (mass_fraction / area))
            .collect(),
        Some((reference_values, reference_area)) => {
            let factor = (reference_area / area) * mass_fraction;
            values
                .iter()
                .zip(reference_values)
                .map(|(value, reference)| {
                    if *value > 0.0 {
                        let denominator = if *reference == 0.0 { 1.0 } else { *reference };
                        value / denominator * factor
                    } else {
                        0.0
                    }
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ResolvedAreas, concentration_maps, scale_plane};
    use crate::domain::{FastFitErrorKind, ParameterMap};
    use crate::modules::traits::{
        ConcentrationsOutcome, GroupArea, LayerMassFractions, ReferenceLine,
    };
    use std::collections::BTreeMap;

    fn free_names() -> Vec<String> {
        ["Constant", "Ca K", "Fe K", "Scatter Peak000"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn parameters() -> ParameterMap {
        let mut map = ParameterMap::zeros(4, 1, 2);
        map.plane_mut(1).copy_from_slice(&[2.0, -1.0]);
        map.plane_mut(2).copy_from_slice(&[4.0, 0.0]);
        map.plane_mut(3).copy_from_slice(&[7.0, 7.0]);
        map
    }

    fn resolved(reference: Option<ReferenceLine>) -> ResolvedAreas {
        ResolvedAreas {
            areas: vec![
                GroupArea::new("Ca K", 1.0),
                GroupArea::new("Fe K", 1.0),
                GroupArea::new("Scatter Peak000", 1.0),
            ],
            outcome: ConcentrationsOutcome {
                mass_fractions: BTreeMap::from([
                    ("Ca K".to_string(), 0.5),
                    ("Fe K".to_string(), 0.25),
                ]),
                layers: Vec::new(),
                reference,
            },
        }
    }

    #[test]
    fn maps_without_reference_scale_by_mass_fraction() {
        let mut names = free_names();
        let maps = concentration_maps(&resolved(None), &free_names(), &parameters(), &mut names)
            .expect("maps");
        assert_eq!(maps.n_parameters(), 2);
        assert_eq!(maps.plane(0), &[1.0, -0.5]);
        assert_eq!(maps.plane(1), &[1.0, 0.0]);
        assert_eq!(&names[4..], &["C(Ca K)".to_string(), "C(Fe K)".to_string()]);
    }

    #[test]
    fn maps_with_reference_normalise_positive_pixels() {
        let reference = ReferenceLine {
            element: "Fe".to_string(),
            transitions: "K".to_string(),
        };
        let mut names = Vec::new();
        let maps = concentration_maps(
            &resolved(Some(reference)),
            &free_names(),
            &parameters(),
            &mut names,
        )
        .expect("maps");
        assert_eq!(maps.plane(0), &[0.25, 0.0]);
        assert_eq!(maps.plane(1), &[0.25, 0.0]);
    }

    #[test]
    fn unknown_reference_group_is_rejected() {
        let reference = ReferenceLine {
            element: "Zn".to_string(),
            transitions: "K".to_string(),
        };
        let error = concentration_maps(
            &resolved(Some(reference)),
            &free_names(),
            &parameters(),
            &mut Vec::new(),
        )
        .expect_err("unknown reference");
        assert_eq!(error.kind(), FastFitErrorKind::ReferenceResolution);
    }

    #[test]
    fn multiple_layers_add_labelled_planes() {
        let mut layered = resolved(None);
        layered.outcome.layers = ["top", "bottom"]
            .into_iter()
            .map(|name| LayerMassFractions {
                name: name.to_string(),
                mass_fractions: BTreeMap::from([
                    ("Ca K".to_string(), 1.0),
                    ("Fe K".to_string(), 1.0),
                ]),
            })
            .collect();
        let mut names = Vec::new();
        let maps = concentration_maps(&layered, &free_names(), &parameters(), &mut names)
            .expect("maps");
        assert_eq!(maps.n_parameters(), 6);
        assert_eq!(names[1], "C(Ca K)-top");
        assert_eq!(names[5], "C(Fe K)-bottom");
    }

    #[test]
    fn zero_reference_pixels_divide_by_one() {
        let scaled = scale_plane(&[3.0], Some((&[0.0], 2.0)), 1.0, 0.5);
        assert_eq!(scaled, vec![3.0]);
    }
}
