use tracing::{debug, info, warn};

use crate::error::{ModelError, PipelineError};
use crate::model::LanguageModel;
use crate::prompt;
use crate::state::PipelineState;

pub const NO_DATA_ANSWER: &str =
    "The SQL query returned an empty result: no data found for this query.";
pub const GENERATION_FAILED_ANSWER: &str = "I could not generate a SQL query for your question, \
     so no data was retrieved. Please try rephrasing it.";
pub const EXECUTION_FAILED_ANSWER: &str = "The database could not run the generated SQL query, \
     so no data was returned. Please try again or rephrase your question.";

const NO_DATA_PHRASES: &[&str] = &[
    "no data",
    "empty result",
    "no results",
    "no rows",
    "no records",
    "no matching",
    "did not return any",
    "didn't return any",
    "returned nothing",
    "nothing was found",
];

/// Whether `answer` tells the user that nothing was found.
pub fn mentions_no_data(answer: &str) -> bool {
    let answer = answer.to_lowercase();
    NO_DATA_PHRASES.iter().any(|phrase| answer.contains(phrase))
}

/// Writes the final `answer`.
///
/// After an upstream failure the answer is a fixed explanation of what went
/// wrong. An empty result always yields an answer that says so, falling back
/// to [`NO_DATA_ANSWER`] when the model does not. If the model cannot answer
/// a non-empty result, the answer stays empty and the error is recorded.
pub async fn generate_answer(state: PipelineState, model: &dyn LanguageModel) -> PipelineState {
    if let Some(upstream) = state.error() {
        let answer = match upstream {
            PipelineError::Generation(_) => GENERATION_FAILED_ANSWER,
            _ => EXECUTION_FAILED_ANSWER,
        };
        info!(error = %upstream, "answering with failure explanation");
        return state.with_answer(answer.to_string());
    }

    let prompt = prompt::answer_prompt(state.question(), state.query(), state.result());
    debug!(%prompt, "answer prompt");

    let reply = model.generate_text(&prompt).await.and_then(|answer| {
        if answer.trim().is_empty() {
            Err(ModelError::MalformedOutput("empty answer".to_string()))
        } else {
            Ok(answer)
        }
    });

    if state.result().is_empty() {
        return match reply {
            Ok(answer) if mentions_no_data(&answer) => state.with_answer(answer),
            Ok(answer) => {
                warn!(%answer, "answer to an empty result does not say so");
                state.with_answer(NO_DATA_ANSWER.to_string())
            }
            Err(e) => {
                warn!(error = %e, "answer generation failed on an empty result");
                state
                    .with_answer(NO_DATA_ANSWER.to_string())
                    .with_error(PipelineError::Answer(e))
            }
        };
    }

    match reply {
        Ok(answer) => {
            info!("answer generated");
            state.with_answer(answer)
        }
        Err(e) => {
            warn!(error = %e, "answer generation failed");
            state
                .with_answer(String::new())
                .with_error(PipelineError::Answer(e))
        }
    }
}
