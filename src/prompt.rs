//! Prompt text for the two model calls of the pipeline.

/// Case- and accent-insensitive substring filter idiom for a dialect.
pub fn text_filter_idiom(dialect: &str) -> &'static str {
    let dialect = dialect.to_ascii_lowercase();

    if dialect.contains("mssql") || dialect.contains("sqlserver") || dialect.contains("t-sql") {
        "`BusinessUnit COLLATE Latin1_General_CI_AI LIKE '%textfilter%'`"
    } else if dialect.contains("postgres") {
        "`unaccent(BusinessUnit) ILIKE unaccent('%textfilter%')`"
    } else {
        "`LOWER(BusinessUnit) LIKE LOWER('%textfilter%')`"
    }
}

pub fn query_prompt(question: &str, dialect: &str, top_k: usize, table_info: &str) -> String {
    format!(
        "Given an input question, create a syntactically correct {dialect} query to help find the answer.
Unless the user specifies a specific number of examples, the query should return at most {top_k} results.
Order the results by a relevant column to return the most interesting examples in the database.
Ensure that the order by column appears in the select clause as well.

## QUERY CONSTRUCTION RULES:
1. Never query for all columns from a specific table (no SELECT *); only select the columns relevant to the question
2. Do not use LIMIT, TOP or FETCH clauses; always include an ORDER BY clause instead
3. For all text filters:
    - Make filters case-insensitive and accent-insensitive
    - Use pattern matching with LIKE '%value%' instead of exact matching or IN clauses
    - Example: {filter}
4. Empty results handling: if the question matches no data, still return a valid query; an empty result will be reported later

Use only the following tables:
{table_info}

Question: {question}",
        dialect = dialect,
        top_k = top_k,
        filter = text_filter_idiom(dialect),
        table_info = table_info,
        question = question,
    )
}

pub fn answer_prompt(question: &str, query: &str, result: &str) -> String {
    format!(
        "Given the following user question, corresponding SQL query, and SQL result, answer the user question. \
If the result is empty, tell the user that the SQL query returned an empty result and no data was found.\n\n\
Question: {}\nSQL Query: {}\nSQL Result: {}",
        question, query, result
    )
}
