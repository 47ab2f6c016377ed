use thiserror::Error;

/// Unified application error type to simplify bubbling errors through async flows.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Errored while handling a file. {0}")]
    Command(#[from] std::io::Error),
    #[error("Error parsing a number. {0}")]
    Parse(#[from] std::num::ParseIntError),
    #[error("Error from SQLite driver. {0}")]
    Database(#[from] sqlx::Error),
    #[error("Error serializing json. {0}")]
    SerdeJsonSer(#[from] serde_json::Error),
    #[error("Error communicating with the embedding server. {0}")]
    AIClient(#[from] async_openai::error::OpenAIError),
    #[error("Error reading delimited data. {0}")]
    Csv(#[from] csv::Error),
    #[error("Error while writing information to a string. {0}")]
    BufferWrite(#[from] std::fmt::Error),
    #[error("Error parsing a timestamp. {0}")]
    TimeParse(#[from] time::error::Parse),
    #[error("Error formatting a timestamp. {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("Timestamp component out of range. {0}")]
    TimeRange(#[from] time::error::ComponentRange),
    #[error("Runtime error. {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("Directory not found error. {0}")]
    Dir(#[from] dichoteca_dirs::DirError),
    #[error("Invalid assigner configuration. {0}")]
    InvalidConfiguration(String),
    #[error("Embedding dimension mismatch. expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Degenerate embedding vector. {0}")]
    DegenerateVector(String),
    #[error("Embedding provider failed. {0}")]
    EmbeddingProvider(String),
    #[error("{0}")]
    Other(String),
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;
