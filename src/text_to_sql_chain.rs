use std::sync::Arc;

use anyhow::Error;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::chain::Chain;
use crate::config::Settings;
use crate::database::PostgresDatabase;
use crate::error::{DatabaseError, GenerationError, PipelineError, SetupError};
use crate::model::OllamaModel;
use crate::pipeline::Pipeline;
use crate::resources::ResourceCache;
use crate::state::PipelineState;

/// Answers questions about a Postgres database with an Ollama model.
///
/// The database pool and model client are built once and reused until they
/// expire or the connection is lost.
pub struct TextToSqlChain {
    settings: Settings,
    pipeline: ResourceCache<Pipeline>,
}

#[async_trait]
impl Chain for TextToSqlChain {
    async fn initialize() -> Result<Box<dyn Chain + Send + Sync>, Error>
    where
        Self: Sized,
    {
        let settings = Settings::from_env().map_err(SetupError::from)?;
        let chain = TextToSqlChain::new(settings);

        chain.pipeline().await?;

        Ok(Box::new(chain))
    }

    async fn run(&self, input: String) -> Result<String, Error> {
        let pipeline = self.pipeline().await?;
        let state = pipeline.ask(&input).await?;

        if lost_connection(&state) {
            warn!("database connection lost, collaborators will be rebuilt");
            self.pipeline.invalidate().await;
        }

        Ok(state.into_answer()?)
    }
}

impl TextToSqlChain {
    pub fn new(settings: Settings) -> Self {
        TextToSqlChain {
            pipeline: ResourceCache::new("text-to-sql pipeline", settings.resource_max_age),
            settings,
        }
    }

    async fn pipeline(&self) -> Result<Arc<Pipeline>, SetupError> {
        self.pipeline
            .get_or_init(|| async {
                let db = PostgresDatabase::connect(&self.settings).await?;
                let model = OllamaModel::new(&self.settings);
                info!(
                    model = %self.settings.model,
                    schema = %self.settings.database_schema,
                    "collaborators ready"
                );

                Ok::<_, SetupError>(
                    Pipeline::new(Arc::new(db), Arc::new(model)).with_top_k(self.settings.top_k),
                )
            })
            .await
    }
}

fn lost_connection(state: &PipelineState) -> bool {
    matches!(
        state.error(),
        Some(PipelineError::Execution(DatabaseError::Connection(_)))
            | Some(PipelineError::Generation(GenerationError::Schema(
                DatabaseError::Connection(_)
            )))
    )
}
