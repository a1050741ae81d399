//! Plain-text rendering for terminal output.

use serde_json::Value;
use valsuite_core::{
    orchestrator::{RunOutcome, RunReport},
    planner::Plan,
    store::QueryRows,
};
use valsuite_model::Fingerprint;

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Column-aligned table with a header rule and a row count footer.
pub fn render_table(rows: &QueryRows) -> String {
    let cells: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();

    let mut widths: Vec<usize> = rows.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, &w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(&rows.columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row));
        out.push('\n');
    }
    let count = cells.len();
    out.push_str(&format!("({count} row{})", if count == 1 { "" } else { "s" }));
    out
}

pub fn render_plan(fingerprint: &Fingerprint, plan: &Plan) -> String {
    if plan.is_empty() {
        return format!("up to date at {}: nothing to run", fingerprint.short());
    }
    let mut out = format!(
        "{} stale units across {} scenarios at {}",
        plan.total_units(),
        plan.groups().len(),
        fingerprint.short()
    );
    for group in plan.groups() {
        let entities: Vec<&str> = group.entities.iter().map(|e| e.as_str()).collect();
        out.push_str(&format!(
            "\n  {} ({}): {}",
            group.scenario,
            entities.len(),
            entities.join(", ")
        ));
    }
    out
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = report.summary();
    if let RunOutcome::Finished { groups, .. } = &report.outcome {
        for group in groups {
            out.push_str(&format!(
                "\n  {}: {} ok, {} failed, {} timed out, {} not submitted, {} not prepared, {} metrics",
                group.scenario,
                group.succeeded,
                group.failed,
                group.timed_out,
                group.submission_failures,
                group.preparation_failures,
                group.metrics_stored,
            ));
            if group.analytics_failures > 0 {
                out.push_str(&format!(
                    " ({} without analytics)",
                    group.analytics_failures
                ));
            }
        }
    }
    out
}
