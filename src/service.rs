//! Planning service: the request-handling layer.
//!
//! Owns the plan builder, the dedupe cache and the clock, and exposes the
//! planning request contract consumed by HTTP handlers and the CLI. Input
//! validation happens here (missing schema or question is the caller's
//! error, reported immediately); backend failures never surface — the
//! builder already degrades them to a rule-based plan.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::{Clock, PlanCache, SystemClock, DEFAULT_TTL};
use crate::error::{Result, TabletalkError};
use crate::plan::Plan;
use crate::planner::PlanBuilder;
use crate::schema::Schema;

/// Planning request wire format.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub schema: Option<Schema>,
    pub question: Option<String>,
    #[serde(rename = "numericColumns", default)]
    pub numeric_columns: Vec<String>,
}

/// Successful planning response wire format.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub plan: Plan,
}

/// Service-level knobs with the recommended defaults.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache_ttl: Duration,
    pub backend_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            backend_timeout: Duration::from_secs(20),
        }
    }
}

pub struct PlanService {
    builder: PlanBuilder,
    cache: Mutex<PlanCache>,
    clock: Arc<dyn Clock>,
}

impl PlanService {
    pub fn new(builder: PlanBuilder, config: ServiceConfig) -> Self {
        let builder = builder.with_backend_timeout(config.backend_timeout);
        Self {
            builder,
            cache: Mutex::new(PlanCache::new(config.cache_ttl)),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Handle one planning request: validate, consult the cache, build.
    pub async fn plan(&self, request: PlanRequest) -> Result<PlanResponse> {
        let schema = request
            .schema
            .ok_or_else(|| TabletalkError::Input("Missing schema or question".to_string()))?;
        let question = request
            .question
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| TabletalkError::Input("Missing schema or question".to_string()))?;

        let key = PlanCache::key(&schema, &question);
        {
            let now = self.clock.now();
            let mut cache = self.cache.lock().await;
            cache.sweep(now);
            if let Some(plan) = cache.lookup(key, now) {
                debug!(key, "dedupe cache hit");
                return Ok(PlanResponse { plan });
            }
        }

        // The cache is not held across the build: concurrent identical
        // requests may both reach the builder, and the last one to finish
        // wins the cache slot. At-most-one backend call per window is
        // best-effort.
        let plan = self
            .builder
            .build(&schema, &question, &request.numeric_columns)
            .await;

        info!(intent = plan.intent(), "planned question");
        self.cache.lock().await.insert(key, plan.clone(), self.clock.now());
        Ok(PlanResponse { plan })
    }

    /// Number of live cache entries; used by diagnostics and tests.
    pub async fn cached_plans(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::PlanningBackend;
    use crate::schema::{Column, ColumnType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PlanningBackend for CountingBackend {
        async fn propose_plan(
            &self,
            _schema: &Schema,
            _numeric_columns: &[String],
            _question: &str,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"intent": "filter", "filters": [], "select": ["Region"]}"#.to_string())
        }
    }

    fn request(question: &str) -> PlanRequest {
        PlanRequest {
            schema: Some(Schema::new(vec![
                Column { name: "Region".into(), ty: ColumnType::String },
                Column { name: "Revenue".into(), ty: ColumnType::Number },
            ])),
            question: Some(question.to_string()),
            numeric_columns: vec!["Revenue".to_string()],
        }
    }

    #[tokio::test]
    async fn test_missing_schema_is_an_input_error() {
        let service = PlanService::new(PlanBuilder::new(), ServiceConfig::default());
        let result = service
            .plan(PlanRequest {
                schema: None,
                question: Some("how many rows".to_string()),
                numeric_columns: vec![],
            })
            .await;
        assert!(matches!(result, Err(TabletalkError::Input(_))));
    }

    #[tokio::test]
    async fn test_missing_question_is_an_input_error() {
        let service = PlanService::new(PlanBuilder::new(), ServiceConfig::default());
        let mut req = request("x");
        req.question = None;
        assert!(matches!(service.plan(req).await, Err(TabletalkError::Input(_))));
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache_and_call_backend_once() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0) });
        let builder = PlanBuilder::new().with_backend(backend.clone());
        let service = PlanService::new(builder, ServiceConfig::default());

        // An inscrutable question escalates to the backend.
        let first = service.plan(request("zzz qqq")).await.unwrap();
        let second = service.plan(request("zzz qqq")).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            serde_json::to_value(&first.plan).unwrap(),
            serde_json::to_value(&second.plan).unwrap()
        );
        assert_eq!(service.cached_plans().await, 1);
    }

    #[tokio::test]
    async fn test_different_questions_do_not_share_entries() {
        let service = PlanService::new(PlanBuilder::new(), ServiceConfig::default());
        service.plan(request("how many rows")).await.unwrap();
        service.plan(request("sum of revenue")).await.unwrap();
        assert_eq!(service.cached_plans().await, 2);
    }
}
