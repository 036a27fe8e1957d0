//! Plan Builder.
//!
//! Orchestrates planning for one question: the rule cascade runs first and
//! its answer is authoritative whenever it is anything more specific than a
//! dataset summary. Only a summary triggers the configured planning
//! backend, and everything the backend returns is treated as untrusted
//! text: the first balanced JSON object is extracted, parsed as a loose
//! draft and coerced into a typed plan. Transport errors, timeouts and
//! malformed output all fall back to the rule-based summary — the caller
//! never sees a backend failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::llm::PlanningBackend;
use crate::plan::{Plan, PlanDraft};
use crate::planner::rules::RulePlanner;
use crate::schema::Schema;

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(20);

pub struct PlanBuilder {
    rules: RulePlanner,
    backend: Option<Arc<dyn PlanningBackend>>,
    backend_timeout: Duration,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    /// Rule-based planning only; no external calls.
    pub fn new() -> Self {
        Self {
            rules: RulePlanner::new(),
            backend: None,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn PlanningBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_rules(mut self, rules: RulePlanner) -> Self {
        self.rules = rules;
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Build a plan for one question. The backend call is the only
    /// suspension point; without a configured backend this completes
    /// synchronously.
    pub async fn build(
        &self,
        schema: &Schema,
        question: &str,
        numeric_columns: &[String],
    ) -> Plan {
        let rule_plan = self.rules.plan(schema, question, numeric_columns);
        if !rule_plan.is_summarize() {
            debug!(intent = rule_plan.intent(), "rule-based plan used");
            return rule_plan;
        }

        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                debug!("no planning backend configured, returning rule-based summary");
                return rule_plan;
            }
        };

        let proposed = tokio::time::timeout(
            self.backend_timeout,
            backend.propose_plan(schema, numeric_columns, question),
        )
        .await;

        match proposed {
            Ok(Ok(raw)) => match parse_plan_text(&raw) {
                Ok(plan) => {
                    debug!(intent = plan.intent(), "backend plan used");
                    plan
                }
                Err(e) => {
                    warn!("backend returned an unusable plan ({}), falling back", e);
                    rule_plan
                }
            },
            Ok(Err(e)) => {
                warn!("planning backend failed ({}), falling back", e);
                rule_plan
            }
            Err(_) => {
                warn!(
                    "planning backend timed out after {:?}, falling back",
                    self.backend_timeout
                );
                rule_plan
            }
        }
    }
}

/// Parse free-form backend text into a typed plan: extract the first
/// balanced `{...}` substring, read it as a loose draft, coerce.
pub fn parse_plan_text(raw: &str) -> crate::error::Result<Plan> {
    let json_text = extract_json_object(raw).ok_or_else(|| {
        crate::error::TabletalkError::Backend("no JSON object in response".to_string())
    })?;
    let draft: PlanDraft = serde_json::from_str(json_text)?;
    Plan::try_from(draft)
}

/// First balanced `{...}` substring of `raw`, if any. Brace depth is
/// tracked outside string literals so embedded `{`/`}` characters do not
/// derail the scan.
fn extract_json_object(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
