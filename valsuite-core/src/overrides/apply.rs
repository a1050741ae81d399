use serde_json::Value;

use super::address::{Address, Segment};

/// Result of applying one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideOutcome {
    pub address: String,
    pub matched: usize,
}

/// Per-address match counts, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideReport {
    pub outcomes: Vec<OverrideOutcome>,
}

impl OverrideReport {
    /// Addresses that matched nothing and therefore changed nothing.
    pub fn unmatched(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.matched == 0)
            .map(|o| o.address.as_str())
    }

    pub fn total_matched(&self) -> usize {
        self.outcomes.iter().map(|o| o.matched).sum()
    }

    pub fn matched(&self, address: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.address == address)
            .map(|o| o.matched)
            .sum()
    }
}

/// Returns a copy of `base` with every node matched by each address set to
/// its value. Later pairs see the effect of earlier ones.
pub fn apply_overrides(
    base: &Value,
    overrides: &[(Address, Value)],
) -> (Value, OverrideReport) {
    let mut document = base.clone();
    let mut report = OverrideReport::default();

    for (address, value) in overrides {
        let matched = set_all(&mut document, &address.segments, value);
        report.outcomes.push(OverrideOutcome {
            address: address.as_str().to_string(),
            matched,
        });
    }

    (document, report)
}

fn set_all(node: &mut Value, segments: &[Segment], value: &Value) -> usize {
    let Some((head, rest)) = segments.split_first() else {
        *node = value.clone();
        return 1;
    };

    match head {
        Segment::Key(key) => match node {
            Value::Object(map) => map
                .get_mut(key)
                .map_or(0, |child| set_all(child, rest, value)),
            _ => 0,
        },
        Segment::Index(index) => match node {
            Value::Array(items) => items
                .get_mut(*index)
                .map_or(0, |child| set_all(child, rest, value)),
            _ => 0,
        },
        Segment::Wildcard => children(node)
            .map(|child| set_all(child, rest, value))
            .sum(),
        Segment::Filter(filter) => children(node)
            .filter(|child| filter.matches(child))
            .map(|child| set_all(child, rest, value))
            .sum(),
    }
}

fn children(node: &mut Value) -> Box<dyn Iterator<Item = &mut Value> + '_> {
    match node {
        Value::Array(items) => Box::new(items.iter_mut()),
        Value::Object(map) => Box::new(map.values_mut()),
        _ => Box::new(std::iter::empty()),
    }
}
