use tracing::warn;

use crate::error::{ModelError, PipelineError};

/// Record threaded through the pipeline stages for a single question.
///
/// `query` is written by the query generator, `result` by the executor and
/// `answer` by the answer generator, each once. An unwritten field reads as
/// the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineState {
    question: String,
    query: Option<String>,
    result: Option<String>,
    answer: Option<String>,
    error: Option<PipelineError>,
}

impl PipelineState {
    pub fn new(question: impl Into<String>) -> Self {
        PipelineState {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn query(&self) -> &str {
        self.query.as_deref().unwrap_or_default()
    }

    pub fn result(&self) -> &str {
        self.result.as_deref().unwrap_or_default()
    }

    pub fn answer(&self) -> &str {
        self.answer.as_deref().unwrap_or_default()
    }

    /// First failure recorded by any stage.
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// The answer, or the failure that kept one from being produced.
    pub fn into_answer(self) -> Result<String, PipelineError> {
        match (self.answer, self.error) {
            (Some(answer), _) if !answer.is_empty() => Ok(answer),
            (_, Some(error)) => Err(error),
            (_, None) => Err(PipelineError::Answer(ModelError::MalformedOutput(
                "empty answer".to_string(),
            ))),
        }
    }

    pub(crate) fn with_query(mut self, query: String) -> Self {
        debug_assert!(self.query.is_none(), "query written twice");
        self.query = Some(query);
        self
    }

    pub(crate) fn with_result(mut self, result: String) -> Self {
        debug_assert!(self.result.is_none(), "result written twice");
        self.result = Some(result);
        self
    }

    pub(crate) fn with_answer(mut self, answer: String) -> Self {
        debug_assert!(self.answer.is_none(), "answer written twice");
        self.answer = Some(answer);
        self
    }

    /// Records a stage failure. The earliest failure is kept since later
    /// stages usually fail as a consequence of it.
    pub(crate) fn with_error(mut self, error: PipelineError) -> Self {
        if let Some(first) = &self.error {
            warn!(%error, %first, "additional stage failure");
        } else {
            self.error = Some(error);
        }
        self
    }
}
