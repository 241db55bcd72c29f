//! Sensitivity-table conversion of fitted group areas into mass fractions.

use crate::common::ConcentrationsSection;
use crate::domain::{FastFitError, FastFitResult};
use crate::modules::traits::{
    ConcentrationsConverter, ConcentrationsOutcome, GroupArea, LayerMassFractions, ReferenceLine,
};
use std::collections::BTreeMap;

pub fn is_scatter_group(group: &str) -> bool {
    group
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("scatter"))
}

/// Mass fraction of a group is its area times the configured sensitivity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabulatedConverter;

impl ConcentrationsConverter for TabulatedConverter {
    fn process_fit_areas(
        &self,
        section: &ConcentrationsSection,
        areas: &[GroupArea],
    ) -> FastFitResult<ConcentrationsOutcome> {
        let mass_fractions = tabulate(&section.sensitivities, areas, None)?;
        let layers = section
            .layers
            .iter()
            .map(|layer| {
                Ok(LayerMassFractions {
                    name: layer.name.clone(),
                    mass_fractions: tabulate(&layer.sensitivities, areas, Some(&layer.name))?,
                })
            })
            .collect::<FastFitResult<Vec<_>>>()?;

        Ok(ConcentrationsOutcome {
            mass_fractions,
            layers,
            reference: resolve_reference(&section.reference, areas),
        })
    }
}

fn tabulate(
    sensitivities: &BTreeMap<String, f64>,
    areas: &[GroupArea],
    layer: Option<&str>,
) -> FastFitResult<BTreeMap<String, f64>> {
    let mut mass_fractions = BTreeMap::new();
    for area in areas.iter().filter(|area| !is_scatter_group(&area.group)) {
        let sensitivity = sensitivities.get(&area.group).ok_or_else(|| {
            let scope = layer.map_or_else(String::new, |name| format!(" in layer '{name}'"));
            FastFitError::configuration(
                "CONFIG.SENSITIVITY",
                format!("no sensitivity configured for group '{}'{scope}", area.group),
            )
        })?;
        mass_fractions.insert(area.group.clone(), area.area * sensitivity);
    }
    Ok(mass_fractions)
}

/// `""`/`"None"` disable the reference, `"AUTO"` picks the strongest group,
/// `"Fe K"` names element and transitions, and a bare `"Fe"` takes the first
/// group of that element.
fn resolve_reference(requested: &str, areas: &[GroupArea]) -> Option<ReferenceLine> {
    let requested = requested.trim();
    if requested.is_empty() || requested.eq_ignore_ascii_case("none") {
        return None;
    }

    if requested.eq_ignore_ascii_case("auto") {
        let mut strongest: Option<&GroupArea> = None;
        for area in areas.iter().filter(|area| !is_scatter_group(&area.group)) {
            if strongest.is_none_or(|best| area.area > best.area) {
                strongest = Some(area);
            }
        }
        return strongest.map(|area| split_group(&area.group));
    }

    let mut tokens = requested.split_whitespace();
    let element = tokens.next()?;
    let transitions: Vec<&str> = tokens.collect();
    if !transitions.is_empty() {
        return Some(ReferenceLine {
            element: element.to_string(),
            transitions: transitions.join(" "),
        });
    }

    let matched = areas
        .iter()
        .map(|area| split_group(&area.group))
        .find(|line| line.element == element);
    Some(matched.unwrap_or_else(|| ReferenceLine {
        element: element.to_string(),
        transitions: String::new(),
    }))
}

fn split_group(group: &str) -> ReferenceLine {
    let mut tokens = group.split_whitespace();
    let element = tokens.next().unwrap_or_default().to_string();
    ReferenceLine {
        element,
        transitions: tokens.collect::<Vec<_>>().join(" "),
    }
}
