//! External planning backend.
//!
//! When the rule cascade cannot do better than a dataset summary, the
//! builder may delegate to a chat-completion model that is instructed to
//! emit one JSON plan. The backend is a collaborator, not a component: its
//! output is free-form text and is never trusted — extraction and parsing
//! happen on our side, and every failure path falls back to the rule-based
//! plan.
//!
//! The client is constructed explicitly (usually from the environment) and
//! passed into `PlanBuilder`; nothing in this module is a global.

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{Result, TabletalkError};
use crate::schema::Schema;

/// System instruction enumerating the plan grammar the backend must emit.
const PLAN_GRAMMAR: &str = r#"You are a data assistant. Output exactly one JSON object (no surrounding text) that is a plan the caller can execute.
Fields:
intent: "aggregate"|"topk"|"filter"|"summarize"
groupBy?: string
metric?: string
agg?: "sum"|"avg"|"count"|"max"|"min"
k?: number
filters?: [{column:string,op:"="|">"|">="|"<"|"<="|"contains",value:any}]
select?: string[]
chart?: "bar"|"line"|"pie"|"none"
explanation?: string

Map user terms to schema column names. Use the provided "Numeric columns" to pick metrics."#;

/// Anything that can propose a plan for a question it has never seen.
/// Implementations return raw text expected to contain one JSON object.
#[async_trait]
pub trait PlanningBackend: Send + Sync {
    async fn propose_plan(
        &self,
        schema: &Schema,
        numeric_columns: &[String],
        question: &str,
    ) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from `OPENAI_API_KEY` / `OPENAI_MODEL` /
    /// `OPENAI_BASE_URL`. Returns `None` when no key is configured, which
    /// callers treat as "rule-based planning only".
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        let model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Some(Self::new(api_key, model, base_url))
    }

    async fn call(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.25,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TabletalkError::Backend(format!("API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TabletalkError::Backend(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TabletalkError::Backend(format!("Failed to parse response: {}", e)))?;

        let content = response_json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| {
                TabletalkError::Backend(format!(
                    "No content in response: {}",
                    serde_json::to_string(&response_json)
                        .unwrap_or_else(|_| "<unserializable>".to_string())
                ))
            })?;

        if content.is_empty() {
            return Err(TabletalkError::Backend("Empty content in response".to_string()));
        }

        debug!(model = %self.model, "backend returned {} chars", content.len());
        Ok(content.to_string())
    }
}

#[async_trait]
impl PlanningBackend for LlmClient {
    async fn propose_plan(
        &self,
        schema: &Schema,
        numeric_columns: &[String],
        question: &str,
    ) -> Result<String> {
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{}({})", c.name, c.ty.as_str()))
            .join(", ");

        let user = format!(
            "Schema columns: {}\nNumeric columns: {}\nQuestion: \"{}\"",
            columns,
            numeric_columns.join(", "),
            question
        );

        match self.call(PLAN_GRAMMAR, &user).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!("planning backend failed: {}", e);
                Err(e)
            }
        }
    }
}
