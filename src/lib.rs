//! Natural-language questions answered from a SQL database.
//!
//! A question goes through three stages: a language model writes a query
//! for the database's schema, the query runs, and the model turns the rows
//! into an answer. Each stage records its failures in the
//! [`PipelineState`] instead of aborting, so every question ends with an
//! answer the user can read.

pub mod answer_generator;
pub mod chain;
pub mod config;
pub mod database;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod query_executor;
pub mod query_generator;
pub mod resources;
pub mod state;
pub mod text_to_sql_chain;

#[cfg(test)]
mod testing;

pub use chain::Chain;
pub use database::{Database, PostgresDatabase, QueryRows};
pub use error::{DatabaseError, ModelError, PipelineError, SetupError};
pub use model::{LanguageModel, OllamaModel, OutputSchema};
pub use pipeline::{Pipeline, Stage, StageUpdate};
pub use state::PipelineState;
pub use text_to_sql_chain::TextToSqlChain;
