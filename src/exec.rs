//! Plan Executor.
//!
//! Runs a validated `Plan` against an in-memory row set and produces a
//! result for the presentation layer: plain text, a table, or chart-ready
//! series. Execution is pure — same plan and rows, same outcome — and it
//! never fails the request: a plan referencing columns the data does not
//! have degrades to empty groups, zero-coerced metrics, or the stub text.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{
    AggFn, AggregateKind, ChartKind, FilterOp, FilterPredicate, Plan, PlanAction,
};
use crate::schema::Row;

/// Outcome of executing one plan. Created fresh per execution and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecOutcome {
    Text { text: String },
    Table { data: Vec<Row> },
    Chart { data: Vec<Row>, x: String, y: String },
}

/// Execute a plan against a row set.
pub fn execute_plan(plan: &Plan, rows: &[Row]) -> ExecOutcome {
    match &plan.action {
        PlanAction::Summarize => summarize(rows),
        PlanAction::Aggregate(agg) => {
            let filtered = apply_filters(rows, &agg.filters);
            match &agg.kind {
                AggregateKind::Count => ExecOutcome::Text {
                    text: format!("Row count: {}", filtered.len()),
                },
                AggregateKind::Grouped { group_by, metric, agg, chart } => {
                    let data = group_by_agg(&filtered, group_by, Some(metric), *agg);
                    shape_grouped(data, group_by, metric, *chart)
                }
                // Ungrouped reductions have no renderer downstream.
                AggregateKind::Scalar { .. } => no_result(),
            }
        }
        PlanAction::TopK(topk) => {
            let filtered = apply_filters(rows, &topk.filters);
            let grouped = group_by_agg(&filtered, &topk.group_by, Some(&topk.metric), topk.agg);
            let data = top_k(grouped, topk.k, &topk.metric);
            shape_grouped(data, &topk.group_by, &topk.metric, topk.chart)
        }
        PlanAction::Filter(filter) => {
            let filtered = apply_filters(rows, &filter.filters);
            let select: Vec<String> = if filter.select.is_empty() {
                filtered
                    .first()
                    .map(|r| r.keys().cloned().collect())
                    .unwrap_or_default()
            } else {
                filter.select.clone()
            };
            let data = filtered
                .iter()
                .map(|r| {
                    select
                        .iter()
                        .map(|k| (k.clone(), r.get(k).cloned().unwrap_or(Value::Null)))
                        .collect()
                })
                .collect();
            ExecOutcome::Table { data }
        }
    }
}

fn summarize(rows: &[Row]) -> ExecOutcome {
    let columns = rows
        .first()
        .map(|r| r.keys().join(", "))
        .unwrap_or_default();
    ExecOutcome::Text {
        text: format!("Rows: {}. Columns: {}", rows.len(), columns),
    }
}

fn no_result() -> ExecOutcome {
    ExecOutcome::Text { text: "No result.".to_string() }
}

/// Chart hint decides the result shape; anything but an explicit `none`
/// yields a chart.
fn shape_grouped(data: Vec<Row>, x: &str, y: &str, chart: Option<ChartKind>) -> ExecOutcome {
    if matches!(chart, Some(ChartKind::None)) {
        ExecOutcome::Table { data }
    } else {
        ExecOutcome::Chart { data, x: x.to_string(), y: y.to_string() }
    }
}

/// Keep the rows for which every filter holds.
pub fn apply_filters<'a>(rows: &'a [Row], filters: &[FilterPredicate]) -> Vec<&'a Row> {
    rows.iter()
        .filter(|row| filters.iter().all(|f| filter_holds(row, f)))
        .collect()
}

fn filter_holds(row: &Row, filter: &FilterPredicate) -> bool {
    let cell = row.get(&filter.column).unwrap_or(&Value::Null);
    match filter.op {
        FilterOp::Eq => stringify(cell) == stringify(&filter.value),
        FilterOp::Gt => to_num(cell) > to_num(&filter.value),
        FilterOp::Ge => to_num(cell) >= to_num(&filter.value),
        FilterOp::Lt => to_num(cell) < to_num(&filter.value),
        FilterOp::Le => to_num(cell) <= to_num(&filter.value),
        FilterOp::Contains => stringify(cell)
            .to_lowercase()
            .contains(&stringify(&filter.value).to_lowercase()),
        // Unrecognized operators never exclude rows.
        FilterOp::Unknown => true,
    }
}

/// Partition rows by `group_by` and reduce the metric per group. Group
/// emission order is first-seen-key order; missing and null keys share the
/// literal "UNKNOWN" bucket.
pub fn group_by_agg(rows: &[&Row], group_by: &str, metric: Option<&str>, agg: AggFn) -> Vec<Row> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, (Value, Vec<f64>)> =
        std::collections::HashMap::new();

    for row in rows {
        let key_value = match row.get(group_by) {
            None | Some(Value::Null) => Value::String("UNKNOWN".to_string()),
            Some(v) => v.clone(),
        };
        let key = stringify(&key_value);
        let val = metric.map(|m| to_num(row.get(m).unwrap_or(&Value::Null))).unwrap_or(1.0);

        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                (key_value, Vec::new())
            })
            .1
            .push(val);
    }

    order
        .iter()
        .filter_map(|key| groups.get(key))
        .map(|(key_value, vals)| {
            let reduced = reduce(vals, agg);
            let mut row = Row::new();
            row.insert(group_by.to_string(), key_value.clone());
            row.insert(metric.unwrap_or("value").to_string(), json_num(reduced));
            row
        })
        .collect()
}

fn reduce(vals: &[f64], agg: AggFn) -> f64 {
    match agg {
        AggFn::Sum => vals.iter().sum(),
        AggFn::Avg => vals.iter().sum::<f64>() / vals.len() as f64,
        AggFn::Count => vals.len() as f64,
        AggFn::Max => vals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggFn::Min => vals.iter().copied().fold(f64::INFINITY, f64::min),
    }
}

/// Sort grouped rows by the aggregated metric and keep the first `k`.
/// The sort is always descending, whatever the aggregation was; ties keep
/// first-seen group order (the sort is stable).
pub fn top_k(mut grouped: Vec<Row>, k: usize, metric: &str) -> Vec<Row> {
    grouped.sort_by(|a, b| {
        let av = to_num(a.get(metric).unwrap_or(&Value::Null));
        let bv = to_num(b.get(metric).unwrap_or(&Value::Null));
        bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
    });
    grouped.truncate(k);
    grouped
}

/// Numeric coercion: anything that is not a finite number counts as 0.
fn to_num(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
            }
        }
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

/// Display form used by `=`/`contains` comparisons and group keys. Null and
/// missing cells stringify empty.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Emit whole results as JSON integers, everything else as floats.
fn json_num(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Value::from(v as i64)
    } else {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rows() -> Vec<Row> {
        vec![
            row(json!({"Region": "APAC", "Revenue": 10})),
            row(json!({"Region": "APAC", "Revenue": 20})),
            row(json!({"Region": "EMEA", "Revenue": 5})),
        ]
    }

    fn row(v: Value) -> Row {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn plan_from(json: Value) -> Plan {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_grouped_sum_first_seen_order() {
        let plan = plan_from(json!({
            "intent": "aggregate",
            "groupBy": "Region",
            "metric": "Revenue",
            "agg": "sum",
            "chart": "pie"
        }));
        let outcome = execute_plan(&plan, &sample_rows());
        assert_eq!(
            outcome,
            ExecOutcome::Chart {
                data: vec![
                    row(json!({"Region": "APAC", "Revenue": 30})),
                    row(json!({"Region": "EMEA", "Revenue": 5})),
                ],
                x: "Region".to_string(),
                y: "Revenue".to_string(),
            }
        );
    }

    #[test]
    fn test_grouped_with_chart_none_is_table() {
        let plan = plan_from(json!({
            "intent": "aggregate",
            "groupBy": "Region",
            "metric": "Revenue",
            "agg": "max",
            "chart": "none"
        }));
        match execute_plan(&plan, &sample_rows()) {
            ExecOutcome::Table { data } => {
                assert_eq!(data[0], row(json!({"Region": "APAC", "Revenue": 20})));
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_topk_one() {
        let plan = plan_from(json!({
            "intent": "topk",
            "groupBy": "Region",
            "metric": "Revenue",
            "agg": "sum",
            "k": 1,
            "chart": "bar"
        }));
        let outcome = execute_plan(&plan, &sample_rows());
        assert_eq!(
            outcome,
            ExecOutcome::Chart {
                data: vec![row(json!({"Region": "APAC", "Revenue": 30}))],
                x: "Region".to_string(),
                y: "Revenue".to_string(),
            }
        );
    }

    #[test]
    fn test_topk_sorts_descending_even_for_min() {
        // "bottom" selection keeps the min-per-group metric but still ranks
        // largest-first; preserved source behavior.
        let plan = plan_from(json!({
            "intent": "topk",
            "groupBy": "Region",
            "metric": "Revenue",
            "agg": "min",
            "k": 2,
            "chart": "bar"
        }));
        match execute_plan(&plan, &sample_rows()) {
            ExecOutcome::Chart { data, .. } => {
                assert_eq!(data[0], row(json!({"Region": "APAC", "Revenue": 10})));
                assert_eq!(data[1], row(json!({"Region": "EMEA", "Revenue": 5})));
            }
            other => panic!("expected chart, got {:?}", other),
        }
    }

    #[test]
    fn test_count_with_filter() {
        let plan = plan_from(json!({
            "intent": "aggregate",
            "agg": "count",
            "filters": [{"column": "Region", "op": "=", "value": "APAC"}]
        }));
        assert_eq!(
            execute_plan(&plan, &sample_rows()),
            ExecOutcome::Text { text: "Row count: 2".to_string() }
        );
    }

    #[test]
    fn test_summarize_ignores_filters_and_lists_columns() {
        let plan = plan_from(json!({"intent": "summarize"}));
        assert_eq!(
            execute_plan(&plan, &sample_rows()),
            ExecOutcome::Text { text: "Rows: 3. Columns: Region, Revenue".to_string() }
        );
        assert_eq!(
            execute_plan(&plan, &[]),
            ExecOutcome::Text { text: "Rows: 0. Columns: ".to_string() }
        );
    }

    #[test]
    fn test_scalar_aggregate_degrades_to_no_result() {
        let plan = plan_from(json!({
            "intent": "aggregate",
            "metric": "Revenue",
            "agg": "avg"
        }));
        assert_eq!(
            execute_plan(&plan, &sample_rows()),
            ExecOutcome::Text { text: "No result.".to_string() }
        );
    }

    #[test]
    fn test_filter_projects_selected_columns_in_order() {
        let plan = plan_from(json!({
            "intent": "filter",
            "filters": [{"column": "Region", "op": "contains", "value": "apac"}],
            "select": ["Region"]
        }));
        match execute_plan(&plan, &sample_rows()) {
            ExecOutcome::Table { data } => {
                assert_eq!(data.len(), 2);
                assert_eq!(data[0], row(json!({"Region": "APAC"})));
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_operator_passes_all_rows() {
        let plan = plan_from(json!({
            "intent": "filter",
            "filters": [{"column": "Region", "op": "between", "value": "x"}]
        }));
        match execute_plan(&plan, &sample_rows()) {
            ExecOutcome::Table { data } => assert_eq!(data.len(), 3),
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_comparison_coerces_strings() {
        let rows = vec![
            row(json!({"Revenue": "15"})),
            row(json!({"Revenue": "n/a"})),
            row(json!({"Revenue": 7})),
        ];
        let plan = plan_from(json!({
            "intent": "filter",
            "filters": [{"column": "Revenue", "op": ">", "value": 10}]
        }));
        match execute_plan(&plan, &rows) {
            ExecOutcome::Table { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0], row(json!({"Revenue": "15"})));
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_group_key_buckets_as_unknown() {
        let rows = vec![
            row(json!({"Region": "APAC", "Revenue": 10})),
            row(json!({"Revenue": 2})),
            row(json!({"Region": null, "Revenue": 3})),
        ];
        let filtered: Vec<&Row> = rows.iter().collect();
        let grouped = group_by_agg(&filtered, "Region", Some("Revenue"), AggFn::Sum);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[1], row(json!({"Region": "UNKNOWN", "Revenue": 5})));
    }

    #[test]
    fn test_grouped_avg_emits_float() {
        let rows = vec![
            row(json!({"Region": "APAC", "Revenue": 10})),
            row(json!({"Region": "APAC", "Revenue": 15})),
        ];
        let filtered: Vec<&Row> = rows.iter().collect();
        let grouped = group_by_agg(&filtered, "Region", Some("Revenue"), AggFn::Avg);
        assert_eq!(grouped[0], row(json!({"Region": "APAC", "Revenue": 12.5})));
    }

    #[test]
    fn test_execution_is_idempotent() {
        let plan = plan_from(json!({
            "intent": "topk",
            "groupBy": "Region",
            "metric": "Revenue",
            "agg": "sum",
            "k": 2,
            "chart": "bar"
        }));
        let rows = sample_rows();
        assert_eq!(execute_plan(&plan, &rows), execute_plan(&plan, &rows));
    }
}
