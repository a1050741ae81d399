//! Decoding of analytics responses into metric records.

use serde_json::Value;
use tracing::warn;
use valsuite_model::MetricRecord;

use super::RemoteError;

/// Keeps every record carrying an element label, a year, and a numeric
/// value; anything else is skipped with a warning.
pub fn parse_metric_records(body: &Value) -> Result<Vec<MetricRecord>, RemoteError> {
    let Some(items) = body.as_array() else {
        return Err(RemoteError::Malformed(
            "analytics response is not an array".to_string(),
        ));
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match parse_record(item) {
            Some(record) => records.push(record),
            None => warn!(index, record = %item, "skipping malformed analytics record"),
        }
    }
    Ok(records)
}

fn parse_record(item: &Value) -> Option<MetricRecord> {
    let element_label = item.get("element_label")?.as_str()?.to_string();
    let year = integer(item.get("timestamp_year")?)?;
    let value = number(item.get("value")?)?;
    Some(MetricRecord {
        element_label,
        year,
        value,
    })
}

fn integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
