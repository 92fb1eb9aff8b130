use thiserror::Error;

/// Failures reported by a [`crate::database::Database`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("could not connect to the database: {0}")]
    Connection(String),

    #[error("could not read the database schema: {0}")]
    Schema(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Failures reported by a [`crate::model::LanguageModel`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model did not respond within {0} seconds")]
    Timeout(u64),

    #[error("model returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Why a query could not be produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error(transparent)]
    Schema(#[from] DatabaseError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("model returned no usable query")]
    EmptyQuery,
}

/// Stage failures recorded in the pipeline state. None of these abort a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Error generating query: {0}")]
    Generation(#[from] GenerationError),

    #[error("Error executing query: {0}")]
    Execution(DatabaseError),

    #[error("Error generating answer: {0}")]
    Answer(ModelError),

    #[error("Please enter a question to proceed.")]
    EmptyQuestion,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),

    #[error("environment variable {name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Fatal errors raised while building the collaborators.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to the database: {0}")]
    Database(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
