use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::{GenerationError, ModelError, PipelineError};
use crate::model::{LanguageModel, OutputSchema};
use crate::prompt;
use crate::state::PipelineState;

#[derive(Debug, Deserialize)]
struct QueryOutput {
    query: String,
}

fn query_output_schema() -> OutputSchema {
    OutputSchema::new("QueryOutput").field("query", "Syntactically valid SQL query.")
}

/// Writes `query` into the state. On any failure the query stays empty and
/// the error is recorded instead.
pub async fn write_query(
    state: PipelineState,
    db: &dyn Database,
    model: &dyn LanguageModel,
    top_k: usize,
) -> PipelineState {
    match generate(state.question(), db, model, top_k).await {
        Ok(query) => {
            info!(%query, "generated query");
            for violation in rule_violations(&query) {
                warn!(%violation, "generated query breaks a construction rule");
            }
            state.with_query(query)
        }
        Err(e) => {
            warn!(error = %e, "query generation failed");
            state
                .with_query(String::new())
                .with_error(PipelineError::Generation(e))
        }
    }
}

async fn generate(
    question: &str,
    db: &dyn Database,
    model: &dyn LanguageModel,
    top_k: usize,
) -> Result<String, GenerationError> {
    let table_info = db.table_info().await?;
    let prompt = prompt::query_prompt(question, db.dialect(), top_k, &table_info);
    debug!(%prompt, "query prompt");

    let value = model
        .generate_structured(&prompt, &query_output_schema())
        .await?;
    let output: QueryOutput = serde_json::from_value(value)
        .map_err(|e| ModelError::MalformedOutput(e.to_string()))?;

    let query = strip_code_fence(&output.query);
    if query.is_empty() {
        return Err(GenerationError::EmptyQuery);
    }

    Ok(query.to_string())
}

/// Unwraps a query the model wrapped in a Markdown code block.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();

    match text.strip_prefix("```") {
        Some(inner) => {
            let inner = inner.strip_suffix("```").unwrap_or(inner);
            let inner = inner
                .strip_prefix("sql")
                .or_else(|| inner.strip_prefix("SQL"))
                .unwrap_or(inner);
            inner.trim()
        }
        None => text,
    }
}

/// A query construction rule the generated SQL does not follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    SelectAll,
    RowLimit,
    MissingOrderBy,
    OrderColumnNotSelected(String),
    ExactTextFilter,
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleViolation::SelectAll => write!(f, "selects all columns"),
            RuleViolation::RowLimit => write!(f, "uses a row-limiting clause"),
            RuleViolation::MissingOrderBy => write!(f, "has no ORDER BY clause"),
            RuleViolation::OrderColumnNotSelected(column) => {
                write!(f, "orders by `{}` which is not selected", column)
            }
            RuleViolation::ExactTextFilter => {
                write!(f, "filters text with = or IN instead of LIKE")
            }
        }
    }
}

struct RulePatterns {
    select_all: Regex,
    row_limit: Regex,
    select_list: Regex,
    order_by: Regex,
    sort_direction: Regex,
    exact_text_filter: Regex,
    distinct: Regex,
    explicit_alias: Regex,
    implicit_alias: Regex,
}

fn patterns() -> &'static RulePatterns {
    static PATTERNS: OnceLock<RulePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| RulePatterns {
        select_all: Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+)?\*").expect("valid rule pattern"),
        row_limit: Regex::new(
            r"(?i)\bLIMIT\s+\d+|\bSELECT\s+(?:DISTINCT\s+)?TOP\s*\(?\s*\d+|\bFETCH\s+(?:FIRST|NEXT)\b",
        )
        .expect("valid rule pattern"),
        select_list: Regex::new(r"(?is)\bSELECT\s+(.*?)\s+FROM\b").expect("valid rule pattern"),
        order_by: Regex::new(r"(?is)\bORDER\s+BY\s+(.*?)\s*;?\s*$").expect("valid rule pattern"),
        sort_direction: Regex::new(r"(?i)\s+(?:ASC|DESC)(?:\s+NULLS\s+(?:FIRST|LAST))?$").expect("valid rule pattern"),
        exact_text_filter: Regex::new(r"(?i)(?:^|[^<>!=])=\s*N?'|\bIN\s*\(\s*N?'").expect("valid rule pattern"),
        distinct: Regex::new(r"(?i)^DISTINCT\s+").expect("valid rule pattern"),
        explicit_alias: Regex::new(r#"(?is)^(.*\S)\s+AS\s+("[^"]+"|\w+)$"#).expect("valid rule pattern"),
        implicit_alias: Regex::new(r#"(?is)^([\w."]+|.*\))\s+("[^"]+"|\w+)$"#).expect("valid rule pattern"),
    })
}

/// Checks generated SQL against the prompt's construction rules.
///
/// This is a textual heuristic over the outermost statement, not a parser.
pub fn rule_violations(sql: &str) -> Vec<RuleViolation> {
    let patterns = patterns();
    let mut violations = Vec::new();

    if patterns.select_all.is_match(sql) {
        violations.push(RuleViolation::SelectAll);
    }
    if patterns.row_limit.is_match(sql) {
        violations.push(RuleViolation::RowLimit);
    }
    if patterns.exact_text_filter.is_match(sql) {
        violations.push(RuleViolation::ExactTextFilter);
    }

    match patterns.order_by.captures(sql) {
        None => violations.push(RuleViolation::MissingOrderBy),
        Some(order_by) => {
            let items = patterns
                .select_list
                .captures(sql)
                .map(|c| select_items(&c[1]))
                .unwrap_or_default();

            for term in split_top_level(&order_by[1]) {
                let term = patterns.sort_direction.replace(term.trim(), "");
                let term = term.trim();

                let is_position = !term.is_empty() && term.chars().all(|c| c.is_ascii_digit());
                if !is_position && !items.iter().any(|item| item.matches(term)) {
                    violations.push(RuleViolation::OrderColumnNotSelected(term.to_string()));
                }
            }
        }
    }

    violations
}

/// One entry of a select list, normalized for comparison.
#[derive(Debug, PartialEq, Eq)]
struct SelectItem {
    expression: String,
    alias: Option<String>,
}

impl SelectItem {
    fn parse(item: &str) -> Self {
        let patterns = patterns();
        let item = item.trim();

        let captures = patterns
            .explicit_alias
            .captures(item)
            .or_else(|| patterns.implicit_alias.captures(item));

        match captures {
            Some(c) => SelectItem {
                expression: normalize(&c[1]),
                alias: Some(normalize(&c[2])),
            },
            None => SelectItem {
                expression: normalize(item),
                alias: None,
            },
        }
    }

    /// An ordering term refers to this item when it names its alias, repeats
    /// its expression, or names the column an unqualified/qualified pair shares.
    fn matches(&self, term: &str) -> bool {
        let term = normalize(term);

        if self.alias.as_deref() == Some(term.as_str()) || self.expression == term {
            return true;
        }

        match (bare_column(&self.expression), bare_column(&term)) {
            (Some(selected), Some(ordered)) => {
                (!term.contains('.') && ordered == selected)
                    || (!self.expression.contains('.') && ordered == self.expression)
            }
            _ => false,
        }
    }
}

fn select_items(list: &str) -> Vec<SelectItem> {
    let list = patterns().distinct.replace(list.trim(), "");
    split_top_level(&list)
        .into_iter()
        .map(SelectItem::parse)
        .collect()
}

/// Splits on commas outside parentheses and quotes.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in list.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);

    parts
}

/// Lowercases and drops identifier quotes and whitespace.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '"' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Last segment of a plain (possibly qualified) column reference.
fn bare_column(expression: &str) -> Option<&str> {
    let is_reference = !expression.is_empty()
        && expression
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');

    if is_reference {
        expression.rsplit('.').next()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::testing::{StubDatabase, StubModel};

    const AVERAGE_SPEND: &str = "SELECT vendor_type, AVG(total_spend) AS average_spend FROM purchases \
        WHERE unaccent(vendor_type) ILIKE unaccent('%X%') GROUP BY vendor_type ORDER BY average_spend DESC";

    #[tokio::test]
    async fn writes_the_generated_query() {
        let db = StubDatabase::new();
        let model = StubModel::new(AVERAGE_SPEND, "unused");

        let state = write_query(
            PipelineState::new("What is the average total spend for vendor type X?"),
            &db,
            &model,
            100,
        )
        .await;

        assert_eq!(state.query(), AVERAGE_SPEND);
        assert!(state.error().is_none());
        assert!(rule_violations(state.query()).is_empty());
        assert!(state.query().contains("LIKE '%X%'") || state.query().contains("ILIKE unaccent('%X%')"));

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("postgresql"));
        assert!(prompts[0].contains("total_spend (numeric)"));
        assert!(prompts[0].contains("at most 100 results"));
    }

    #[tokio::test]
    async fn model_failure_leaves_query_empty() {
        let db = StubDatabase::new();
        let model = StubModel::new("", "").failing_structured(ModelError::Timeout(120));

        let state = write_query(PipelineState::new("q"), &db, &model, 100).await;

        assert_eq!(state.query(), "");
        assert_eq!(
            state.error(),
            Some(&PipelineError::Generation(GenerationError::Model(
                ModelError::Timeout(120)
            )))
        );
    }

    #[tokio::test]
    async fn blank_query_is_a_generation_failure() {
        let db = StubDatabase::new();
        let model = StubModel::new("   ", "");

        let state = write_query(PipelineState::new("q"), &db, &model, 100).await;

        assert_eq!(state.query(), "");
        assert_eq!(
            state.error(),
            Some(&PipelineError::Generation(GenerationError::EmptyQuery))
        );
    }

    #[tokio::test]
    async fn unreadable_schema_skips_the_model() {
        let mut db = StubDatabase::new();
        db.table_info = Err(DatabaseError::Schema("permission denied".into()));
        let model = StubModel::new(AVERAGE_SPEND, "");

        let state = write_query(PipelineState::new("q"), &db, &model, 100).await;

        assert_eq!(state.query(), "");
        assert!(matches!(
            state.error(),
            Some(PipelineError::Generation(GenerationError::Schema(_)))
        ));
        assert!(model.prompts().is_empty());
    }

    #[test]
    fn code_fences_are_removed() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn detects_broken_rules() {
        let violations =
            rule_violations("SELECT * FROM purchases WHERE vendor_type = 'X' LIMIT 10");

        assert!(violations.contains(&RuleViolation::SelectAll));
        assert!(violations.contains(&RuleViolation::RowLimit));
        assert!(violations.contains(&RuleViolation::ExactTextFilter));
        assert!(violations.contains(&RuleViolation::MissingOrderBy));
    }

    #[test]
    fn detects_order_column_missing_from_select() {
        let violations = rule_violations(
            "SELECT vendor_name FROM purchases WHERE vendor_type LIKE '%x%' ORDER BY total_spend DESC",
        );

        assert_eq!(
            violations,
            vec![RuleViolation::OrderColumnNotSelected("total_spend".into())]
        );
    }

    #[test]
    fn in_list_and_date_comparisons() {
        assert!(rule_violations(
            "SELECT vendor_name FROM purchases WHERE vendor_type IN ('a', 'b') ORDER BY vendor_name"
        )
        .contains(&RuleViolation::ExactTextFilter));

        assert!(rule_violations(
            "SELECT order_date FROM purchases WHERE order_date >= '2024-01-01' ORDER BY order_date"
        )
        .is_empty());
    }

    #[test]
    fn order_column_must_match_a_whole_select_item() {
        assert_eq!(
            rule_violations("SELECT vendor_name FROM purchases ORDER BY name"),
            vec![RuleViolation::OrderColumnNotSelected("name".into())]
        );
        assert_eq!(
            rule_violations("SELECT total_spend_eur FROM purchases ORDER BY total_spend"),
            vec![RuleViolation::OrderColumnNotSelected("total_spend".into())]
        );
    }

    #[test]
    fn order_column_may_be_alias_expression_or_column() {
        for sql in [
            "SELECT AVG(total_spend) AS average_spend FROM purchases ORDER BY average_spend DESC",
            "SELECT COUNT(vendor_name) vendors FROM purchases ORDER BY vendors",
            "SELECT vendor_type, SUM(total_spend) FROM purchases GROUP BY vendor_type ORDER BY SUM( total_spend ) DESC",
            "SELECT p.vendor_name FROM purchases p ORDER BY vendor_name",
            "SELECT vendor_name FROM purchases p ORDER BY p.vendor_name",
            "SELECT DISTINCT \"Vendor_Type\" FROM purchases ORDER BY vendor_type",
            "SELECT vendor_type, COALESCE(total_spend, 0) AS spend FROM purchases ORDER BY spend, vendor_type",
        ] {
            assert!(rule_violations(sql).is_empty(), "{}", sql);
        }
    }

    #[test]
    fn select_list_splits_outside_parentheses() {
        assert_eq!(
            split_top_level("COALESCE(a, b) AS c, 'x,y' AS d, e"),
            vec!["COALESCE(a, b) AS c", " 'x,y' AS d", " e"]
        );
        assert_eq!(
            SelectItem::parse("AVG(total_spend) AS average_spend"),
            SelectItem {
                expression: "avg(total_spend)".into(),
                alias: Some("average_spend".into()),
            }
        );
    }

    #[test]
    fn positional_order_by_is_accepted() {
        assert!(rule_violations("SELECT vendor_name, total_spend FROM purchases ORDER BY 2 DESC;")
            .is_empty());
    }
}
