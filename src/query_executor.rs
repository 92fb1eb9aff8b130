use tracing::{info, warn};

use crate::database::Database;
use crate::error::PipelineError;
use crate::state::PipelineState;

/// Runs the generated query and writes its rendered rows into `result`.
///
/// An empty query (left behind by a failed generation) is skipped. A
/// database failure leaves `result` empty and records the error.
pub async fn execute_query(state: PipelineState, db: &dyn Database) -> PipelineState {
    if state.query().is_empty() {
        info!("no query to execute");
        return state.with_result(String::new());
    }

    match db.run(state.query()).await {
        Ok(rows) => {
            info!(rows = rows.rows.len(), "query executed");
            let result = rows.to_string();
            state.with_result(result)
        }
        Err(e) => {
            warn!(error = %e, query = %state.query(), "query execution failed");
            state
                .with_result(String::new())
                .with_error(PipelineError::Execution(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::QueryRows;
    use crate::error::{DatabaseError, GenerationError};
    use crate::testing::{one_row, StubDatabase};

    const QUERY: &str = "SELECT vendor_name FROM purchases ORDER BY vendor_name";

    #[tokio::test]
    async fn renders_rows_into_result() {
        let db = StubDatabase::new().with_result(QUERY, Ok(one_row("vendor_name", "Acme")));
        let state = PipelineState::new("q").with_query(QUERY.into());

        let state = execute_query(state, &db).await;

        assert_eq!(state.result(), "[{ vendor_name: Acme }]");
        assert!(state.error().is_none());
    }

    #[tokio::test]
    async fn zero_rows_give_an_empty_result_without_error() {
        let db = StubDatabase::new().with_result(
            QUERY,
            Ok(QueryRows::new(vec!["vendor_name".into()], vec![])),
        );
        let state = PipelineState::new("q").with_query(QUERY.into());

        let state = execute_query(state, &db).await;

        assert_eq!(state.result(), "");
        assert!(state.error().is_none());
    }

    #[tokio::test]
    async fn database_errors_are_recorded_not_stored_as_result() {
        let db = StubDatabase::new().with_result(
            QUERY,
            Err(DatabaseError::Query("permission denied for table purchases".into())),
        );
        let state = PipelineState::new("q").with_query(QUERY.into());

        let state = execute_query(state, &db).await;

        assert_eq!(state.result(), "");
        assert_eq!(
            state.error(),
            Some(&PipelineError::Execution(DatabaseError::Query(
                "permission denied for table purchases".into()
            )))
        );
    }

    #[tokio::test]
    async fn empty_query_is_a_no_op() {
        let db = StubDatabase::new();
        let state = PipelineState::new("q")
            .with_query(String::new())
            .with_error(PipelineError::Generation(GenerationError::EmptyQuery));

        let state = execute_query(state, &db).await;

        assert_eq!(state.result(), "");
        assert!(db.executed().is_empty());
        assert_eq!(
            state.error(),
            Some(&PipelineError::Generation(GenerationError::EmptyQuery))
        );
    }
}
