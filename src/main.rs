// Ask one question against a CSV file from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tabletalk::exec::{execute_plan, ExecOutcome};
use tabletalk::ingest::Dataset;
use tabletalk::llm::LlmClient;
use tabletalk::planner::PlanBuilder;
use tabletalk::schema::Row;
use tabletalk::service::{PlanRequest, PlanService, ServiceConfig};

#[derive(Parser)]
#[command(name = "tabletalk")]
#[command(about = "Ask natural-language questions about a CSV file")]
#[command(version)]
struct Args {
    /// CSV file to load
    file: PathBuf,

    /// Question in plain English
    question: String,

    /// Print the plan and result as one JSON object
    #[arg(long)]
    json: bool,

    /// Print the plan that was executed
    #[arg(long)]
    show_plan: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let dataset = Dataset::from_path(&args.file)?;
    info!(
        rows = dataset.rows.len(),
        columns = dataset.schema.columns.len(),
        "loaded {}",
        args.file.display()
    );

    let mut builder = PlanBuilder::new();
    if let Some(client) = LlmClient::from_env() {
        info!("planning backend configured");
        builder = builder.with_backend(Arc::new(client));
    }
    let service = PlanService::new(builder, ServiceConfig::default());

    let response = service
        .plan(PlanRequest {
            schema: Some(dataset.schema.clone()),
            question: Some(args.question.clone()),
            numeric_columns: dataset.numeric_columns.clone(),
        })
        .await?;

    let outcome = execute_plan(&response.plan, &dataset.rows);

    if args.json {
        let combined = serde_json::json!({
            "plan": response.plan,
            "result": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    if args.show_plan {
        println!("Plan: {}", serde_json::to_string(&response.plan)?);
    }
    if let Some(explanation) = &response.plan.explanation {
        println!("{}", explanation);
    }
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &ExecOutcome) {
    match outcome {
        ExecOutcome::Text { text } => println!("{}", text),
        ExecOutcome::Table { data } => print_rows(data),
        ExecOutcome::Chart { data, x, y } => {
            println!("[chart: {} by {}]", y, x);
            print_rows(data);
        }
    }
}

fn print_rows(rows: &[Row]) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }
    let headers: Vec<&String> = rows[0].keys().collect();
    println!(
        "{}",
        headers.iter().map(|h| h.as_str()).collect::<Vec<_>>().join("\t")
    );
    for row in rows {
        let line: Vec<String> = headers
            .iter()
            .map(|h| match row.get(h.as_str()) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", line.join("\t"));
    }
}
