use anyhow::Error;
use async_trait::async_trait;

/// A question-answering chain over some data source.
#[async_trait]
pub trait Chain {
    /// Builds the chain and everything it talks to. Fails when the
    /// collaborators cannot be constructed (missing credentials, unreachable
    /// database).
    async fn initialize() -> Result<Box<dyn Chain + Send + Sync>, Error>
    where
        Self: Sized;

    /// Answers one question.
    async fn run(&self, input: String) -> Result<String, Error>;
}
