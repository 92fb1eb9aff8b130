//! Deterministic collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::database::{Database, QueryRows};
use crate::error::{DatabaseError, ModelError};
use crate::model::{LanguageModel, OutputSchema};

pub const TABLE_INFO: &str =
    "Table: purchases\nColumns: vendor_name (text), vendor_type (text), total_spend (numeric)";

pub struct StubDatabase {
    pub table_info: Result<String, DatabaseError>,
    results: HashMap<String, Result<QueryRows, DatabaseError>>,
    pub executed: Mutex<Vec<String>>,
}

impl StubDatabase {
    pub fn new() -> Self {
        StubDatabase {
            table_info: Ok(TABLE_INFO.to_string()),
            results: HashMap::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, sql: &str, result: Result<QueryRows, DatabaseError>) -> Self {
        self.results.insert(sql.to_string(), result);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for StubDatabase {
    fn dialect(&self) -> &str {
        "postgresql"
    }

    async fn table_info(&self) -> Result<String, DatabaseError> {
        self.table_info.clone()
    }

    async fn run(&self, sql: &str) -> Result<QueryRows, DatabaseError> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.results
            .get(sql)
            .cloned()
            .unwrap_or_else(|| Err(DatabaseError::Query(format!("relation does not exist: {}", sql))))
    }
}

/// Replies with fixed output and records every prompt it sees.
pub struct StubModel {
    pub structured: Result<Value, ModelError>,
    pub text: Result<String, ModelError>,
    pub prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn new(query: &str, answer: &str) -> Self {
        StubModel {
            structured: Ok(json!({ "query": query })),
            text: Ok(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_structured(mut self, error: ModelError) -> Self {
        self.structured = Err(error);
        self
    }

    pub fn failing_text(mut self, error: ModelError) -> Self {
        self.text = Err(error);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<Value, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let value = self.structured.clone()?;
        schema.validate(&value)?;
        Ok(value)
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.text.clone()
    }
}

pub fn one_row(column: &str, value: &str) -> QueryRows {
    QueryRows::new(vec![column.to_string()], vec![vec![Some(value.to_string())]])
}
