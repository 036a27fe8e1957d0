use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabletalkError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Planning backend error: {0}")]
    Backend(String),

    #[error("Ingestion error: {0}")]
    Ingest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TabletalkError>;
