use std::fmt;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::Decimal;
use sqlx::{Column, Row};
use tracing::debug;

use crate::config::Settings;
use crate::error::DatabaseError;

/// Longest cell text handed on to the model.
pub const MAX_CELL_LENGTH: usize = 300;

/// A database the pipeline can describe and query.
#[async_trait]
pub trait Database: Send + Sync {
    /// SQL flavour spoken by the database, e.g. `postgresql`.
    fn dialect(&self) -> &str;

    /// Free-text description of the tables and columns that may be queried.
    async fn table_info(&self) -> Result<String, DatabaseError>;

    async fn run(&self, sql: &str) -> Result<QueryRows, DatabaseError>;
}

/// Tabular result of a query. Cells are already rendered as text; `None` is SQL `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        QueryRows { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn render_row(&self, row: &[Option<String>]) -> String {
        let cells: Vec<String> = self
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| match value {
                Some(value) => format!("{}: {}", column, truncate(value, MAX_CELL_LENGTH)),
                None => format!("{}: NULL", column),
            })
            .collect();

        format!("{{ {} }}", cells.join(", "))
    }
}

/// Renders rows as `[{ col: value, ... }, ...]`. An empty result renders as `""`.
impl fmt::Display for QueryRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return Ok(());
        }

        let rows: Vec<String> = self.rows.iter().map(|row| self.render_row(row)).collect();
        write!(f, "[{}]", rows.join(", "))
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }

    let mut cut: String = value.chars().take(max).collect();
    cut.push_str("...");
    cut
}

/// Postgres-backed [`Database`].
pub struct PostgresDatabase {
    pool: PgPool,
    schema: String,
    sample_rows: usize,
}

impl PostgresDatabase {
    pub async fn connect(settings: &Settings) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.database_url)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        Ok(PostgresDatabase {
            pool,
            schema: settings.database_schema.clone(),
            sample_rows: settings.sample_rows,
        })
    }

    async fn table_names(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| row.try_get("table_name")).collect()
    }

    async fn describe_table(&self, table_name: &str) -> Result<String, sqlx::Error> {
        let columns_rows = sqlx::query(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(&self.schema)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(columns_rows.len());
        for row in &columns_rows {
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            columns.push(format!("{} ({})", name, data_type));
        }

        let mut description = format!("Table: {}\nColumns: {}", table_name, columns.join(", "));

        if self.sample_rows > 0 {
            let sample_query = format!(
                "SELECT * FROM {}.{} LIMIT {}",
                quote_identifier(&self.schema),
                quote_identifier(table_name),
                self.sample_rows
            );
            let sample = sqlx::query(&sample_query).fetch_all(&self.pool).await?;
            let sample = rows_from_pg(&sample);

            description.push_str(&format!(
                "\n/*\n{} rows from {} table:\n{}\n*/",
                sample.rows.len(),
                table_name,
                sample
            ));
        }

        Ok(description)
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn dialect(&self) -> &str {
        "postgresql"
    }

    async fn table_info(&self) -> Result<String, DatabaseError> {
        let schema_error = |e: sqlx::Error| match query_error(e) {
            DatabaseError::Query(message) => DatabaseError::Schema(message),
            other => other,
        };

        let table_names = self.table_names().await.map_err(schema_error)?;

        let mut tables_info = Vec::with_capacity(table_names.len());
        for table_name in &table_names {
            tables_info.push(self.describe_table(table_name).await.map_err(schema_error)?);
        }

        debug!(tables = table_names.len(), schema = %self.schema, "described database schema");

        Ok(tables_info.join("\n\n"))
    }

    async fn run(&self, sql: &str) -> Result<QueryRows, DatabaseError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(rows_from_pg(&rows))
    }
}

fn query_error(e: sqlx::Error) -> DatabaseError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => DatabaseError::Connection(e.to_string()),
        e => DatabaseError::Query(e.to_string()),
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn rows_from_pg(rows: &[PgRow]) -> QueryRows {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.columns().len()).map(|index| cell_text(row, index)).collect())
        .collect();

    QueryRows::new(columns, rows)
}

fn cell_text(row: &PgRow, index: usize) -> Option<String> {
    fn decoded<T>(row: &PgRow, index: usize) -> Option<Option<String>>
    where
        T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + ToString,
    {
        row.try_get::<Option<T>, _>(index)
            .ok()
            .map(|value| value.map(|v| v.to_string()))
    }

    decoded::<String>(row, index)
        .or_else(|| decoded::<i64>(row, index))
        .or_else(|| decoded::<i32>(row, index))
        .or_else(|| decoded::<i16>(row, index))
        .or_else(|| decoded::<f64>(row, index))
        .or_else(|| decoded::<f32>(row, index))
        .or_else(|| decoded::<bool>(row, index))
        .or_else(|| decoded::<Decimal>(row, index))
        .or_else(|| decoded::<NaiveDate>(row, index))
        .or_else(|| decoded::<NaiveDateTime>(row, index))
        .or_else(|| decoded::<NaiveTime>(row, index))
        .or_else(|| decoded::<DateTime<Utc>>(row, index))
        .unwrap_or_else(|| Some("<unsupported>".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_rows_with_column_names() {
        let rows = QueryRows::new(
            vec!["vendor_type".into(), "avg_spend".into()],
            vec![
                vec![Some("Bumiputra".into()), Some("1520.75".into())],
                vec![Some("Local".into()), None],
            ],
        );

        assert_eq!(
            rows.to_string(),
            "[{ vendor_type: Bumiputra, avg_spend: 1520.75 }, { vendor_type: Local, avg_spend: NULL }]"
        );
    }

    #[test]
    fn empty_result_renders_as_empty_string() {
        let rows = QueryRows::new(vec!["total".into()], vec![]);
        assert!(rows.is_empty());
        assert_eq!(rows.to_string(), "");
    }

    #[test]
    fn long_cells_are_truncated() {
        let long = "x".repeat(MAX_CELL_LENGTH + 50);
        let rows = QueryRows::new(vec!["note".into()], vec![vec![Some(long)]]);
        let rendered = rows.to_string();

        assert!(rendered.contains(&format!("{}...", "x".repeat(MAX_CELL_LENGTH))));
        assert!(!rendered.contains(&"x".repeat(MAX_CELL_LENGTH + 1)));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("vendors"), "\"vendors\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }
}
