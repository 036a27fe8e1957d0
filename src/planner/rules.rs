//! Rule-Based Planner.
//!
//! Translates a free-text question into a `Plan` with one deterministic
//! pass over an ordered rule list. Each rule is a named (predicate,
//! builder) pair; the first rule that produces a plan wins, so list order
//! is part of the contract ("how many products" is a count, not a filter,
//! because the count rule runs first). No network, no randomness: the same
//! schema, question and numeric-column list always yield the same plan.
//!
//! Column selection inside the rules prefers exact token-substring matches
//! over domain keyword matches over positional defaults, in that order.

use lazy_static::lazy_static;
use regex::Regex;

use crate::classify::{partition_columns, pick_filter_column};
use crate::plan::{
    AggFn, AggregateKind, AggregatePlan, ChartKind, FilterOp, FilterPlan, FilterPredicate,
    Plan, PlanAction, TopKPlan,
};
use crate::schema::Schema;
use crate::text::{normalize, tokenize};

lazy_static! {
    static ref COUNT_PATTERN: Regex = Regex::new(r"\b(count|how many|number of)\b").unwrap();
    static ref AVG_PATTERN: Regex = Regex::new(r"\b(avg|average|mean)\b").unwrap();
    static ref SUM_PATTERN: Regex = Regex::new(r"\b(sum|total|aggregate)\b").unwrap();
    static ref TOPK_PATTERN: Regex = Regex::new(
        r"\b(top|highest|largest|most|max|min|lowest|least|smallest|bottom)\b"
    )
    .unwrap();
    /// Lowest-family for aggregation direction ("min" included).
    static ref LOWEST_PATTERN: Regex =
        Regex::new(r"\b(lowest|least|smallest|min|bottom)\b").unwrap();
    /// Lowest-family for the implicit k = 1 default ("min" deliberately
    /// absent; "min salary" still defaults to 5 unless a number is given).
    static ref K_ONE_PATTERN: Regex =
        Regex::new(r"\b(lowest|least|smallest|bottom)\b").unwrap();
    /// Explicit k: "top 3" or "3 highest". Runs on the raw question.
    static ref K_PATTERN: Regex =
        Regex::new(r"(?i)top\s*(\d+)|(\d+)\s*(top|highest|bottom|lowest)").unwrap();
    static ref FILTER_PATTERN: Regex = Regex::new(r"\b(filter|where|only|in|for|with)\b").unwrap();
    /// Free-text value following a filter keyword. Runs on the raw question.
    static ref FILTER_VALUE_PATTERN: Regex =
        Regex::new(r"(?i)\b(?:filter|where|only|in|for|with)\b\s+(?:the\s+)?([\w\s\-&]+)")
            .unwrap();
    /// Trailing clauses chopped off an extracted filter value.
    static ref FILTER_VALUE_STOP: Regex = Regex::new(r"\s+by\b|\s+where\b|\s+for\b").unwrap();
    /// Domain terms that usually name a metric column.
    static ref METRIC_KEYWORDS: Regex = Regex::new(
        r"revenue|sales|price|amount|value|units|score|marks|salary|income|age|count|total"
    )
    .unwrap();
}

/// Precomputed per-question facts shared by every rule.
pub struct PlannerContext {
    /// Raw question as the user typed it.
    pub question: String,
    /// Normalized question the intent regexes run against.
    pub normalized: String,
    /// Stop-word-filtered tokens.
    pub tokens: Vec<String>,
    /// All column names in schema order.
    pub columns: Vec<String>,
    /// Normalized forms of `columns`, index-aligned.
    pub columns_normalized: Vec<String>,
    pub numeric: Vec<String>,
    pub non_numeric: Vec<String>,
}

impl PlannerContext {
    pub fn new(schema: &Schema, question: &str, numeric_columns: &[String]) -> Self {
        let partition = partition_columns(schema, numeric_columns);
        let columns = schema.names();
        let columns_normalized = columns.iter().map(|c| normalize(c)).collect();
        Self {
            question: question.to_string(),
            normalized: normalize(question),
            tokens: tokenize(question),
            columns,
            columns_normalized,
            numeric: partition.numeric,
            non_numeric: partition.non_numeric,
        }
    }

    fn name_overlaps_token(&self, column: &str) -> bool {
        let name = normalize(column);
        self.tokens.iter().any(|t| name.contains(t.as_str()))
    }

    /// Numeric column named by a question token, if any.
    fn token_metric(&self) -> Option<String> {
        self.numeric.iter().find(|c| self.name_overlaps_token(c)).cloned()
    }

    /// Numeric column matching the domain keyword list.
    fn keyword_metric(&self) -> Option<String> {
        self.numeric
            .iter()
            .find(|c| METRIC_KEYWORDS.is_match(&normalize(c)))
            .cloned()
    }

    /// Metric preference for the averaging/summing rules: token match,
    /// then first numeric column, then first column of the schema.
    fn simple_metric(&self) -> Option<String> {
        self.token_metric()
            .or_else(|| self.numeric.first().cloned())
            .or_else(|| self.columns.first().cloned())
    }

    /// Metric preference for ranking: token match, then keyword list,
    /// then first numeric column, then first column.
    fn ranking_metric(&self) -> Option<String> {
        self.token_metric()
            .or_else(|| self.keyword_metric())
            .or_else(|| self.numeric.first().cloned())
            .or_else(|| self.columns.first().cloned())
    }

    /// Grouping preference: non-numeric token match, then the filterable
    /// column heuristic, then first column.
    fn grouping_column(&self) -> Option<String> {
        self.non_numeric
            .iter()
            .find(|c| self.name_overlaps_token(c))
            .cloned()
            .or_else(|| pick_filter_column(&self.non_numeric))
            .or_else(|| self.columns.first().cloned())
    }

    /// Free-text value for the filter rule: pattern match after a filter
    /// keyword, else the last token that names no column.
    fn filter_value(&self) -> Option<String> {
        if let Some(caps) = FILTER_VALUE_PATTERN.captures(&self.question) {
            if let Some(m) = caps.get(1) {
                let head = FILTER_VALUE_STOP
                    .split(m.as_str().trim())
                    .next()
                    .unwrap_or("")
                    .trim();
                if !head.is_empty() {
                    return Some(head.to_string());
                }
            }
        }
        self.tokens
            .iter()
            .rev()
            .find(|tok| !self.columns_normalized.iter().any(|cn| cn.contains(tok.as_str())))
            .cloned()
    }

    fn extract_k(&self) -> usize {
        if let Some(caps) = K_PATTERN.captures(&self.question) {
            let digits = caps.get(1).or_else(|| caps.get(2));
            if let Some(k) = digits.and_then(|m| m.as_str().parse::<usize>().ok()) {
                return k;
            }
        }
        if K_ONE_PATTERN.is_match(&self.normalized) {
            1
        } else {
            5
        }
    }
}

/// One entry of the planner's rule list: a name for diagnostics and a
/// builder that returns `Some(plan)` when the rule applies.
pub struct IntentRule {
    pub name: &'static str,
    pub build: fn(&PlannerContext) -> Option<Plan>,
}

/// Ordered rule list evaluated first-match-wins. The default list encodes
/// the documented decision order; callers may construct a planner with a
/// custom list to add intents without touching the evaluation loop.
pub struct RulePlanner {
    rules: Vec<IntentRule>,
}

impl Default for RulePlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RulePlanner {
    pub fn new() -> Self {
        Self { rules: default_rules() }
    }

    pub fn with_rules(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    /// Translate a question into a plan. Falls through to the dataset
    /// summary when no rule claims the question.
    pub fn plan(&self, schema: &Schema, question: &str, numeric_columns: &[String]) -> Plan {
        let ctx = PlannerContext::new(schema, question, numeric_columns);
        for rule in &self.rules {
            if let Some(plan) = (rule.build)(&ctx) {
                tracing::debug!(rule = rule.name, intent = plan.intent(), "rule matched");
                return plan;
            }
        }
        summarize_plan()
    }
}

/// Deterministic question-to-plan translation with the default rule list.
pub fn rule_based(schema: &Schema, question: &str, numeric_columns: &[String]) -> Plan {
    RulePlanner::new().plan(schema, question, numeric_columns)
}

fn default_rules() -> Vec<IntentRule> {
    vec![
        IntentRule { name: "count", build: build_count },
        IntentRule { name: "average", build: build_average },
        IntentRule { name: "sum", build: build_sum },
        IntentRule { name: "topk", build: build_topk },
        IntentRule { name: "filter", build: build_filter },
        IntentRule { name: "metric-fallback", build: build_metric_fallback },
        IntentRule { name: "summarize", build: |_| Some(summarize_plan()) },
    ]
}

fn summarize_plan() -> Plan {
    Plan::new(PlanAction::Summarize).with_explanation("Dataset summary")
}

fn build_count(ctx: &PlannerContext) -> Option<Plan> {
    if !COUNT_PATTERN.is_match(&ctx.normalized) {
        return None;
    }
    Some(
        Plan::new(PlanAction::Aggregate(AggregatePlan {
            filters: Vec::new(),
            kind: AggregateKind::Count,
        }))
        .with_explanation("Count rows"),
    )
}

fn build_average(ctx: &PlannerContext) -> Option<Plan> {
    if !AVG_PATTERN.is_match(&ctx.normalized) {
        return None;
    }
    scalar_aggregate(ctx, AggFn::Avg, "Average")
}

fn build_sum(ctx: &PlannerContext) -> Option<Plan> {
    if !SUM_PATTERN.is_match(&ctx.normalized) {
        return None;
    }
    scalar_aggregate(ctx, AggFn::Sum, "Sum")
}

fn scalar_aggregate(ctx: &PlannerContext, agg: AggFn, label: &str) -> Option<Plan> {
    let metric = ctx.simple_metric()?;
    let explanation = format!("{} of {}", label, metric);
    Some(
        Plan::new(PlanAction::Aggregate(AggregatePlan {
            filters: Vec::new(),
            kind: AggregateKind::Scalar { metric, agg },
        }))
        .with_explanation(explanation),
    )
}

fn build_topk(ctx: &PlannerContext) -> Option<Plan> {
    if !TOPK_PATTERN.is_match(&ctx.normalized) {
        return None;
    }
    let metric = ctx.ranking_metric()?;
    let group_by = ctx.grouping_column()?;
    let lowest = LOWEST_PATTERN.is_match(&ctx.normalized);
    let k = ctx.extract_k();
    let explanation = format!(
        "{} {} by {}",
        if lowest { "Bottom" } else { "Top" },
        k,
        metric
    );
    Some(
        Plan::new(PlanAction::TopK(TopKPlan {
            group_by,
            metric,
            agg: if lowest { AggFn::Min } else { AggFn::Max },
            k,
            filters: Vec::new(),
            chart: Some(ChartKind::Bar),
        }))
        .with_explanation(explanation),
    )
}

fn build_filter(ctx: &PlannerContext) -> Option<Plan> {
    if !FILTER_PATTERN.is_match(&ctx.normalized) {
        return None;
    }
    // Without an extractable value this rule abstains and the cascade
    // continues.
    let value = ctx.filter_value()?;
    let column = pick_filter_column(&ctx.non_numeric).or_else(|| ctx.columns.first().cloned())?;
    let select: Vec<String> = ctx.columns.iter().take(6).cloned().collect();
    let explanation = format!("Filter where {} contains '{}'", column, value);
    Some(
        Plan::new(PlanAction::Filter(FilterPlan {
            filters: vec![FilterPredicate {
                column,
                op: FilterOp::Contains,
                value: serde_json::Value::String(value),
            }],
            select,
        }))
        .with_explanation(explanation),
    )
}

fn build_metric_fallback(ctx: &PlannerContext) -> Option<Plan> {
    let metric = ctx.token_metric()?;
    let explanation = format!("Average of {}", metric);
    Some(
        Plan::new(PlanAction::Aggregate(AggregatePlan {
            filters: Vec::new(),
            kind: AggregateKind::Scalar { metric, agg: AggFn::Avg },
        }))
        .with_explanation(explanation),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Schema};

    fn sales_schema() -> (Schema, Vec<String>) {
        let schema = Schema::new(vec![
            Column { name: "Region".into(), ty: ColumnType::String },
            Column { name: "Product".into(), ty: ColumnType::String },
            Column { name: "Revenue".into(), ty: ColumnType::Number },
            Column { name: "Units".into(), ty: ColumnType::Number },
        ]);
        let numeric = vec!["Revenue".to_string(), "Units".to_string()];
        (schema, numeric)
    }

    fn plan_for(question: &str) -> Plan {
        let (schema, numeric) = sales_schema();
        rule_based(&schema, question, &numeric)
    }

    #[test]
    fn test_count_rule() {
        let plan = plan_for("How many rows are there?");
        match plan.action {
            PlanAction::Aggregate(AggregatePlan { kind: AggregateKind::Count, .. }) => {}
            other => panic!("expected count, got {:?}", other),
        }
        assert_eq!(plan.explanation.as_deref(), Some("Count rows"));
    }

    #[test]
    fn test_average_prefers_token_matched_metric() {
        let plan = plan_for("What is the average units sold?");
        match plan.action {
            PlanAction::Aggregate(AggregatePlan {
                kind: AggregateKind::Scalar { metric, agg }, ..
            }) => {
                assert_eq!(metric, "Units");
                assert_eq!(agg, AggFn::Avg);
            }
            other => panic!("expected scalar aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_average_falls_back_to_first_numeric() {
        let plan = plan_for("What's the mean?");
        match plan.action {
            PlanAction::Aggregate(AggregatePlan {
                kind: AggregateKind::Scalar { metric, .. }, ..
            }) => assert_eq!(metric, "Revenue"),
            other => panic!("expected scalar aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_topk_extracts_k_metric_and_group() {
        let plan = plan_for("Show top 3 product by revenue");
        match plan.action {
            PlanAction::TopK(t) => {
                assert_eq!(t.k, 3);
                assert_eq!(t.metric, "Revenue");
                assert_eq!(t.group_by, "Product");
                assert_eq!(t.agg, AggFn::Max);
                assert_eq!(t.chart, Some(ChartKind::Bar));
            }
            other => panic!("expected topk, got {:?}", other),
        }
    }

    #[test]
    fn test_lowest_defaults_k_to_one_and_min() {
        let plan = plan_for("Which region has the lowest revenue?");
        match plan.action {
            PlanAction::TopK(t) => {
                assert_eq!(t.k, 1);
                assert_eq!(t.agg, AggFn::Min);
                assert_eq!(t.group_by, "Region");
            }
            other => panic!("expected topk, got {:?}", other),
        }
    }

    #[test]
    fn test_min_keyword_keeps_default_k() {
        let plan = plan_for("min revenue per region");
        match plan.action {
            PlanAction::TopK(t) => {
                assert_eq!(t.k, 5);
                assert_eq!(t.agg, AggFn::Min);
            }
            other => panic!("expected topk, got {:?}", other),
        }
    }

    #[test]
    fn test_average_wins_over_topk() {
        // Branch ordering is contractual: "average" precedes "top".
        let plan = plan_for("average and top 5");
        match plan.action {
            PlanAction::Aggregate(AggregatePlan {
                kind: AggregateKind::Scalar { agg: AggFn::Avg, .. },
                ..
            }) => {}
            other => panic!("expected average aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_extracts_value_after_keyword() {
        let plan = plan_for("only APAC");
        match plan.action {
            PlanAction::Filter(f) => {
                assert_eq!(f.filters.len(), 1);
                assert_eq!(f.filters[0].op, FilterOp::Contains);
                assert_eq!(f.filters[0].value, serde_json::json!("APAC"));
                assert_eq!(f.filters[0].column, "Region");
                assert_eq!(f.select.len(), 4);
            }
            other => panic!("expected filter, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_value_stops_at_trailing_clause() {
        let plan = plan_for("records where Electronics for the north team");
        match plan.action {
            PlanAction::Filter(f) => {
                assert_eq!(f.filters[0].value, serde_json::json!("Electronics"));
            }
            other => panic!("expected filter, got {:?}", other),
        }
    }

    #[test]
    fn test_metric_fallback_without_intent_keyword() {
        let plan = plan_for("revenue?");
        match plan.action {
            PlanAction::Aggregate(AggregatePlan {
                kind: AggregateKind::Scalar { metric, agg: AggFn::Avg }, ..
            }) => assert_eq!(metric, "Revenue"),
            other => panic!("expected scalar aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_unmatched_question_summarizes() {
        let plan = plan_for("tell about this dataset please");
        assert!(plan.is_summarize());
        assert_eq!(plan.explanation.as_deref(), Some("Dataset summary"));
    }

    #[test]
    fn test_planner_is_deterministic() {
        let (schema, numeric) = sales_schema();
        let a = rule_based(&schema, "top 4 regions by units", &numeric);
        let b = rule_based(&schema, "top 4 regions by units", &numeric);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }

    #[test]
    fn test_empty_schema_still_produces_a_plan() {
        let schema = Schema::default();
        let plan = rule_based(&schema, "top 5 anything", &[]);
        // No columns to rank: the ranking rule abstains, later rules run.
        assert!(plan.is_summarize());
    }
}
