//! PREPARING: turning the base model plus one scenario into a per-entity
//! document.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use valsuite_model::EntityKey;

use crate::{
    inputs::ScenarioDocument,
    overrides::{Address, OverrideError, OverrideReport, apply_overrides},
};

#[derive(Debug, Error)]
pub enum PreparationError {
    #[error("scenario has no '{0}' parameter")]
    MissingEntityParameter(String),

    #[error(transparent)]
    InvalidAddress(#[from] OverrideError),

    #[error("entity parameter '{0}' matched nothing in the model")]
    EntityParameterUnmatched(String),
}

/// Builds the document submitted for `entity` under `scenario`.
///
/// The scenario's entity parameter is rebound to the entity key before the
/// override list is applied. Unmatched addresses of other parameters are
/// tolerated and logged.
pub fn prepare_document(
    model: &Value,
    scenario: &ScenarioDocument,
    entity: &EntityKey,
    entity_parameter: &str,
) -> Result<(Value, OverrideReport), PreparationError> {
    let binding = scenario
        .parameter(entity_parameter)
        .ok_or_else(|| PreparationError::MissingEntityParameter(entity_parameter.to_string()))?;
    let entity_value = Value::String(entity.as_str().to_string());

    let mut overrides = Vec::new();
    let mut entity_slots = Vec::new();
    for parameter in &scenario.parameters {
        let is_entity = parameter.name == binding.name;
        let value = if is_entity {
            &entity_value
        } else {
            &parameter.value
        };
        for path in &parameter.paths {
            if is_entity {
                entity_slots.push(overrides.len());
            }
            overrides.push((Address::parse(path)?, value.clone()));
        }
    }

    let (document, report) = apply_overrides(model, &overrides);

    let entity_matches: usize = entity_slots
        .iter()
        .filter_map(|&slot| report.outcomes.get(slot))
        .map(|outcome| outcome.matched)
        .sum();
    if entity_matches == 0 {
        return Err(PreparationError::EntityParameterUnmatched(
            binding.name.clone(),
        ));
    }

    for address in report.unmatched() {
        warn!(
            %entity,
            scenario = %scenario.key,
            address,
            "override address found no matches"
        );
    }

    Ok((document, report))
}
