//! Plan schema: the contract between planning and execution.
//!
//! Two representations live here. `PlanDraft` is the loose wire form — every
//! field optional, original JSON names — used wherever a plan crosses a
//! trust boundary (the external planning backend, HTTP callers). `Plan` is
//! the closed, typed form the executor consumes: one variant per intent,
//! each carrying only the fields that intent needs, so states like an
//! aggregation with no metric cannot reach execution. The only place a
//! draft becomes a plan is `Plan::try_from`, and a malformed draft fails
//! there, not somewhere downstream.
//!
//! A `Plan` is self-contained: executing it needs the plan and a row set,
//! nothing else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TabletalkError;

// ============================================================================
// Shared vocabulary
// ============================================================================

/// Aggregation function applied per group (or to the whole table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

/// Chart hint carried through to the result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    None,
}

/// Filter comparison operator. `Unknown` absorbs any operator string the
/// backend invents; such filters pass every row (permissive default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    Unknown,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Contains => "contains",
            FilterOp::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "=" => FilterOp::Eq,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            "contains" => FilterOp::Contains,
            _ => FilterOp::Unknown,
        }
    }
}

impl Serialize for FilterOp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FilterOp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FilterOp::from_str(&s))
    }
}

/// One row predicate; a plan's filters are ANDed in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

// ============================================================================
// Wire form
// ============================================================================

/// Loose plan as it appears on the wire. Field names match the JSON grammar
/// the planning backend is instructed to emit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(rename = "groupBy", skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agg: Option<AggFn>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<serde_json::Number>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FilterPredicate>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

// ============================================================================
// Typed form
// ============================================================================

/// Validated, executable plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PlanDraft", into = "PlanDraft")]
pub struct Plan {
    pub action: PlanAction,
    /// Human-readable description; never affects execution.
    pub explanation: Option<String>,
}

/// One variant per intent, each carrying only its required fields.
#[derive(Debug, Clone)]
pub enum PlanAction {
    Summarize,
    Aggregate(AggregatePlan),
    TopK(TopKPlan),
    Filter(FilterPlan),
}

#[derive(Debug, Clone)]
pub struct AggregatePlan {
    pub filters: Vec<FilterPredicate>,
    pub kind: AggregateKind,
}

#[derive(Debug, Clone)]
pub enum AggregateKind {
    /// Count the rows surviving the filters.
    Count,
    /// Partition by a column and reduce a metric per group.
    Grouped {
        group_by: String,
        metric: String,
        agg: AggFn,
        chart: Option<ChartKind>,
    },
    /// Whole-table reduction of a single metric. The executor has no
    /// renderer for this shape and answers with the stub text.
    Scalar { metric: String, agg: AggFn },
}

#[derive(Debug, Clone)]
pub struct TopKPlan {
    pub group_by: String,
    pub metric: String,
    pub agg: AggFn,
    pub k: usize,
    pub filters: Vec<FilterPredicate>,
    pub chart: Option<ChartKind>,
}

#[derive(Debug, Clone)]
pub struct FilterPlan {
    pub filters: Vec<FilterPredicate>,
    /// Columns to project; empty means "columns of the first surviving row".
    pub select: Vec<String>,
}

impl Plan {
    pub fn new(action: PlanAction) -> Self {
        Self { action, explanation: None }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Wire-level intent tag for this plan.
    pub fn intent(&self) -> &'static str {
        match self.action {
            PlanAction::Summarize => "summarize",
            PlanAction::Aggregate(_) => "aggregate",
            PlanAction::TopK(_) => "topk",
            PlanAction::Filter(_) => "filter",
        }
    }

    pub fn is_summarize(&self) -> bool {
        matches!(self.action, PlanAction::Summarize)
    }
}

impl TryFrom<PlanDraft> for Plan {
    type Error = TabletalkError;

    fn try_from(draft: PlanDraft) -> Result<Self, Self::Error> {
        let filters = draft.filters.unwrap_or_default();
        let intent = draft.intent.as_deref().unwrap_or("summarize");

        let action = match intent {
            "summarize" => PlanAction::Summarize,
            "aggregate" => {
                let kind = match (draft.group_by, draft.metric) {
                    (Some(group_by), Some(metric)) => AggregateKind::Grouped {
                        group_by,
                        metric,
                        agg: draft.agg.unwrap_or(AggFn::Sum),
                        chart: draft.chart,
                    },
                    _ if draft.agg == Some(AggFn::Count) => AggregateKind::Count,
                    (_, Some(metric)) => AggregateKind::Scalar {
                        metric,
                        agg: draft.agg.unwrap_or(AggFn::Sum),
                    },
                    _ => {
                        return Err(TabletalkError::Planner(
                            "aggregate plan needs a metric or agg=count".to_string(),
                        ))
                    }
                };
                PlanAction::Aggregate(AggregatePlan { filters, kind })
            }
            "topk" => {
                let group_by = draft.group_by.ok_or_else(|| {
                    TabletalkError::Planner("topk plan needs groupBy".to_string())
                })?;
                let metric = draft.metric.ok_or_else(|| {
                    TabletalkError::Planner("topk plan needs metric".to_string())
                })?;
                PlanAction::TopK(TopKPlan {
                    group_by,
                    metric,
                    agg: draft.agg.unwrap_or(AggFn::Sum),
                    k: coerce_k(draft.k),
                    filters,
                    chart: draft.chart,
                })
            }
            "filter" => PlanAction::Filter(FilterPlan {
                filters,
                select: draft.select.unwrap_or_default(),
            }),
            other => {
                return Err(TabletalkError::Planner(format!("unknown intent '{}'", other)))
            }
        };

        Ok(Plan { action, explanation: draft.explanation })
    }
}

fn coerce_k(k: Option<serde_json::Number>) -> usize {
    match k.and_then(|n| n.as_f64()) {
        Some(v) if v >= 1.0 => v as usize,
        _ => 5,
    }
}

impl From<Plan> for PlanDraft {
    fn from(plan: Plan) -> Self {
        let mut draft = PlanDraft {
            intent: Some(plan.intent().to_string()),
            explanation: plan.explanation.clone(),
            ..PlanDraft::default()
        };
        match plan.action {
            PlanAction::Summarize => {
                draft.chart = Some(ChartKind::None);
            }
            PlanAction::Aggregate(agg) => {
                if !agg.filters.is_empty() {
                    draft.filters = Some(agg.filters);
                }
                match agg.kind {
                    AggregateKind::Count => {
                        draft.agg = Some(AggFn::Count);
                        draft.chart = Some(ChartKind::None);
                    }
                    AggregateKind::Grouped { group_by, metric, agg, chart } => {
                        draft.group_by = Some(group_by);
                        draft.metric = Some(metric);
                        draft.agg = Some(agg);
                        draft.chart = chart;
                    }
                    AggregateKind::Scalar { metric, agg } => {
                        draft.metric = Some(metric);
                        draft.agg = Some(agg);
                        draft.chart = Some(ChartKind::None);
                    }
                }
            }
            PlanAction::TopK(topk) => {
                draft.group_by = Some(topk.group_by);
                draft.metric = Some(topk.metric);
                draft.agg = Some(topk.agg);
                draft.k = Some(serde_json::Number::from(topk.k as u64));
                draft.chart = topk.chart;
                if !topk.filters.is_empty() {
                    draft.filters = Some(topk.filters);
                }
            }
            PlanAction::Filter(filter) => {
                draft.filters = Some(filter.filters);
                if !filter.select.is_empty() {
                    draft.select = Some(filter.select);
                }
                draft.chart = Some(ChartKind::None);
            }
        }
        draft
    }
}
