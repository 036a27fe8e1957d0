//! HTTP server for the CSV question-answering core.
//!
//! Raw tokio HTTP handling, no web framework. Routes:
//!   POST /upload   CSV body -> upload summary (dataset kept in memory)
//!   POST /plan     {schema, question, numericColumns?} -> {plan}
//!   POST /execute  {plan, rows} or {plan, datasetId} -> result
//!   GET  /health   liveness probe

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use tabletalk::error::TabletalkError;
use tabletalk::exec::execute_plan;
use tabletalk::ingest::Dataset;
use tabletalk::llm::LlmClient;
use tabletalk::plan::{Plan, PlanDraft};
use tabletalk::planner::PlanBuilder;
use tabletalk::schema::Row;
use tabletalk::service::{PlanRequest, PlanService, ServiceConfig};

struct AppState {
    service: PlanService,
    datasets: Mutex<HashMap<String, Dataset>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut builder = PlanBuilder::new();
    if let Some(client) = LlmClient::from_env() {
        info!("planning backend configured from environment");
        builder = builder.with_backend(Arc::new(client));
    } else {
        info!("no OPENAI_API_KEY set, rule-based planning only");
    }

    let state = Arc::new(AppState {
        service: PlanService::new(builder, ServiceConfig::default()),
        datasets: Mutex::new(HashMap::new()),
    });

    let addr = std::env::var("TABLETALK_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("server listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!("connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<AppState>,
) -> std::io::Result<()> {
    let request = match read_request(&mut stream).await? {
        Some(request) => request,
        None => return Ok(()),
    };

    let (method, path) = parse_request_line(&request);
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or("");

    let response = match (method.as_str(), path.as_str()) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/health") => create_response(200, "OK", r#"{"status":"ok"}"#),
        ("POST", "/upload") => handle_upload(&state, body).await,
        ("POST", "/plan") => handle_plan(&state, body).await,
        ("POST", "/execute") => handle_execute(&state, body).await,
        _ => create_response(404, "Not Found", r#"{"error":"not_found"}"#),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn handle_upload(state: &Arc<AppState>, body: &str) -> String {
    if body.trim().is_empty() {
        return create_response(400, "Bad Request", r#"{"error":"empty upload"}"#);
    }
    match Dataset::from_reader(body.as_bytes()) {
        Ok(dataset) => {
            let summary = dataset.summary();
            state
                .datasets
                .lock()
                .await
                .insert(dataset.id.clone(), dataset);
            match serde_json::to_string(&summary) {
                Ok(json) => create_response(200, "OK", &json),
                Err(e) => {
                    error!("failed to serialize upload summary: {}", e);
                    create_response(500, "Internal Server Error", r#"{"error":"upload_failed"}"#)
                }
            }
        }
        Err(e) => {
            warn!("upload rejected: {}", e);
            let body = serde_json::json!({ "error": format!("invalid CSV: {}", e) });
            create_response(400, "Bad Request", &body.to_string())
        }
    }
}

async fn handle_plan(state: &Arc<AppState>, body: &str) -> String {
    let request: PlanRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(_) => {
            return create_response(
                400,
                "Bad Request",
                r#"{"error":"Missing schema or question"}"#,
            )
        }
    };

    match state.service.plan(request).await {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(json) => create_response(200, "OK", &json),
            Err(e) => {
                error!("plan serialization failed: {}", e);
                create_response(500, "Internal Server Error", r#"{"error":"plan_failed"}"#)
            }
        },
        Err(TabletalkError::Input(_)) => create_response(
            400,
            "Bad Request",
            r#"{"error":"Missing schema or question"}"#,
        ),
        Err(e) => {
            error!("planning failed: {}", e);
            create_response(500, "Internal Server Error", r#"{"error":"plan_failed"}"#)
        }
    }
}

#[derive(serde::Deserialize)]
struct ExecuteRequest {
    plan: PlanDraft,
    #[serde(default)]
    rows: Option<Vec<Row>>,
    #[serde(rename = "datasetId", default)]
    dataset_id: Option<String>,
}

async fn handle_execute(state: &Arc<AppState>, body: &str) -> String {
    let request: ExecuteRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            let body = serde_json::json!({ "error": format!("invalid request: {}", e) });
            return create_response(400, "Bad Request", &body.to_string());
        }
    };

    let plan = match Plan::try_from(request.plan) {
        Ok(plan) => plan,
        Err(e) => {
            let body = serde_json::json!({ "error": format!("invalid plan: {}", e) });
            return create_response(400, "Bad Request", &body.to_string());
        }
    };

    let rows: Vec<Row> = match (request.rows, request.dataset_id) {
        (Some(rows), _) => rows,
        (None, Some(id)) => match state.datasets.lock().await.get(&id) {
            Some(dataset) => dataset.rows.clone(),
            None => {
                return create_response(404, "Not Found", r#"{"error":"unknown dataset"}"#)
            }
        },
        (None, None) => {
            return create_response(
                400,
                "Bad Request",
                r#"{"error":"rows or datasetId required"}"#,
            )
        }
    };

    let outcome = execute_plan(&plan, &rows);
    match serde_json::to_string(&outcome) {
        Ok(json) => create_response(200, "OK", &json),
        Err(e) => {
            error!("result serialization failed: {}", e);
            create_response(500, "Internal Server Error", r#"{"error":"execute_failed"}"#)
        }
    }
}

/// Read one HTTP request, headers plus Content-Length-delimited body.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    use tokio::time::{timeout, Duration};

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Ok(text) = std::str::from_utf8(&buffer) {
                        if let Some(headers_end) = text.find("\r\n\r\n") {
                            match extract_content_length(text) {
                                Some(content_length) => {
                                    if buffer.len() >= headers_end + 4 + content_length {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                    // Refuse unbounded requests.
                    if buffer.len() > 10_000_000 {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    })
    .await;

    match read_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            warn!("request read timed out");
            return Ok(None);
        }
    }

    if buffer.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

fn parse_request_line(request: &str) -> (String, String) {
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();
    (method, path)
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
