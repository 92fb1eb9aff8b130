use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, info_span, Instrument};

use crate::answer_generator::generate_answer;
use crate::config::DEFAULT_TOP_K;
use crate::database::Database;
use crate::error::{PipelineError, Result};
use crate::model::LanguageModel;
use crate::query_executor::execute_query;
use crate::query_generator::write_query;
use crate::state::PipelineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WriteQuery,
    ExecuteQuery,
    GenerateAnswer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::WriteQuery => "write_query",
            Stage::ExecuteQuery => "execute_query",
            Stage::GenerateAnswer => "generate_answer",
        };
        f.write_str(name)
    }
}

/// Emitted after each stage completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUpdate {
    pub stage: Stage,
    /// The field the stage wrote.
    pub output: String,
    /// The pipeline's recorded failure, if any, as of this stage.
    pub error: Option<PipelineError>,
}

/// Write query, execute it, answer from the result. Always in that order.
#[derive(Clone)]
pub struct Pipeline {
    db: Arc<dyn Database>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl Pipeline {
    pub fn new(db: Arc<dyn Database>, model: Arc<dyn LanguageModel>) -> Self {
        Pipeline {
            db,
            model,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Runs every stage and returns the final state.
    pub async fn run(&self, question: &str) -> PipelineState {
        self.run_stages(question, None).await
    }

    /// Like [`Pipeline::run`], reporting each completed stage on `progress`.
    pub async fn run_with_progress(
        &self,
        question: &str,
        progress: &UnboundedSender<StageUpdate>,
    ) -> PipelineState {
        self.run_stages(question, Some(progress)).await
    }

    /// Runs the pipeline for user input, trimmed. Blank input is rejected
    /// before any stage runs.
    pub async fn ask(&self, input: &str) -> Result<PipelineState> {
        let question = input.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        Ok(self.run(question).await)
    }

    async fn run_stages(
        &self,
        question: &str,
        progress: Option<&UnboundedSender<StageUpdate>>,
    ) -> PipelineState {
        let span = info_span!("pipeline", question = %question);

        async {
            let state = PipelineState::new(question);

            let state = write_query(state, self.db.as_ref(), self.model.as_ref(), self.top_k).await;
            report(progress, Stage::WriteQuery, &state);

            let state = execute_query(state, self.db.as_ref()).await;
            report(progress, Stage::ExecuteQuery, &state);

            let state = generate_answer(state, self.model.as_ref()).await;
            report(progress, Stage::GenerateAnswer, &state);

            info!(failed = state.error().is_some(), "pipeline finished");
            state
        }
        .instrument(span)
        .await
    }
}

fn report(progress: Option<&UnboundedSender<StageUpdate>>, stage: Stage, state: &PipelineState) {
    debug!(%stage, "stage complete");

    let Some(progress) = progress else {
        return;
    };

    let output = match stage {
        Stage::WriteQuery => state.query(),
        Stage::ExecuteQuery => state.result(),
        Stage::GenerateAnswer => state.answer(),
    };

    // A caller that stopped listening does not affect the run.
    let _ = progress.send(StageUpdate {
        stage,
        output: output.to_string(),
        error: state.error().cloned(),
    });
}
