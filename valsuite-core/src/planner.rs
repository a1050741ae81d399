//! Selection of the stale part of the (entity x scenario) cross product.

use std::{collections::HashSet, hash::Hash};

use serde::Serialize;
use tracing::{debug, info};
use valsuite_model::{EntityKey, Fingerprint, ScenarioKey, Unit};

use crate::store::{ResultStore, StoreResult};

/// Entities to run for one scenario, in catalogue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioGroup {
    pub scenario: ScenarioKey,
    pub entities: Vec<EntityKey>,
}

/// Stale units grouped by scenario. Scenarios with nothing to do are
/// omitted, so an empty plan means everything is up to date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    groups: Vec<ScenarioGroup>,
}

impl Plan {
    pub fn groups(&self) -> &[ScenarioGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<ScenarioGroup> {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_units(&self) -> usize {
        self.groups.iter().map(|g| g.entities.len()).sum()
    }

    pub fn entities_for(&self, scenario: &ScenarioKey) -> Option<&[EntityKey]> {
        self.groups
            .iter()
            .find(|g| &g.scenario == scenario)
            .map(|g| g.entities.as_slice())
    }

    pub fn units(&self) -> impl Iterator<Item = Unit> + '_ {
        self.groups.iter().flat_map(|g| {
            g.entities
                .iter()
                .map(|e| Unit::new(e.clone(), g.scenario.clone()))
        })
    }
}

#[derive(Debug, Clone)]
pub struct RerunPlanner {
    store: ResultStore,
}

impl RerunPlanner {
    pub fn new(store: ResultStore) -> Self {
        Self { store }
    }

    /// With `force` the plan is the whole cross product; otherwise only
    /// units for which [`ResultStore::needs_rerun`] holds are kept.
    pub async fn plan(
        &self,
        entities: &[EntityKey],
        scenarios: &[ScenarioKey],
        fingerprint: &Fingerprint,
        force: bool,
    ) -> StoreResult<Plan> {
        let entities = first_occurrences(entities);
        let mut groups = Vec::new();
        let mut skipped = 0usize;

        for scenario in first_occurrences(scenarios) {
            let mut stale = Vec::new();
            for &entity in &entities {
                if force
                    || self
                        .store
                        .needs_rerun(entity, scenario, fingerprint)
                        .await?
                {
                    stale.push(entity.clone());
                } else {
                    skipped += 1;
                }
            }

            debug!(%scenario, stale = stale.len(), "planned scenario");
            if !stale.is_empty() {
                groups.push(ScenarioGroup {
                    scenario: scenario.clone(),
                    entities: stale,
                });
            }
        }

        let plan = Plan { groups };
        info!(
            units = plan.total_units(),
            scenarios = plan.groups.len(),
            skipped,
            force,
            fingerprint = fingerprint.short(),
            "computed rerun plan"
        );
        Ok(plan)
    }
}

/// Drops repeated keys, keeping the first occurrence of each in order.
fn first_occurrences<T: Eq + Hash>(items: &[T]) -> Vec<&T> {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().filter(|item| seen.insert(*item)).collect()
}
