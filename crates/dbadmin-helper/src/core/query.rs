//! Paginated SELECT/COUNT composition and the statement classification used
//! by `run_query`.

use crate::core::dialect::Dialect;
use crate::core::types::{Filter, QueryParams};

/// SQL text plus positional text parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// The relation a paginated query reads from: a quoted table or a catalog
/// subquery whose projected names filters and orderings can refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub relation: String,
    pub params: Vec<String>,
}

impl Source {
    pub fn table(relation: String) -> Self {
        Self {
            relation,
            params: Vec::new(),
        }
    }

    pub fn derived(select: String, params: Vec<String>) -> Self {
        Self {
            relation: format!("({select}) AS catalog"),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedQuery {
    pub select: Statement,
    /// Same relation and filters, no ordering or paging.
    pub count: Statement,
}

pub fn build_paged(dialect: Dialect, source: &Source, params: &QueryParams, limit: usize) -> PagedQuery {
    let mut bound = source.params.clone();
    let filter = filter_clause(dialect, &params.filter, &mut bound);

    let mut select = format!("SELECT * FROM {}", source.relation);
    let mut count = format!("SELECT COUNT(*) FROM {}", source.relation);
    if let Some(filter) = &filter {
        select.push_str(&format!(" WHERE {filter}"));
        count.push_str(&format!(" WHERE {filter}"));
    }

    if !params.order.is_empty() {
        let orders: Vec<String> = params
            .order
            .iter()
            .map(|o| format!("{} {}", dialect.quote_ident(&o.column), o.direction.as_sql()))
            .collect();
        select.push_str(&format!(" ORDER BY {}", orders.join(", ")));
    }
    select.push_str(&format!(" LIMIT {limit} OFFSET {}", params.offset));

    PagedQuery {
        select: Statement::with_params(select, bound.clone()),
        count: Statement::with_params(count, bound),
    }
}

/// Renders `(<col> <op> <placeholder> AND ...)`, appending each value to `bound`.
pub fn filter_clause(dialect: Dialect, filters: &[Filter], bound: &mut Vec<String>) -> Option<String> {
    if filters.is_empty() {
        return None;
    }

    let parts: Vec<String> = filters
        .iter()
        .map(|f| {
            let (op, value) = match unquote_pattern(&f.value) {
                Some(pattern) => ("LIKE", pattern),
                None => ("=", f.value.clone()),
            };
            bound.push(value);
            format!(
                "{} {op} {}",
                dialect.filter_operand(&dialect.quote_ident(&f.column)),
                dialect.placeholder(bound.len())
            )
        })
        .collect();

    Some(format!("({})", parts.join(" AND ")))
}

/// A filter value wrapped in matching quote characters is a LIKE pattern.
/// Returns the pattern with the quotes stripped and doubled quotes collapsed.
pub fn unquote_pattern(value: &str) -> Option<String> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    if value.len() < 2 || !value.ends_with(quote) {
        return None;
    }
    let inner = &value[1..value.len() - 1];
    let doubled = format!("{quote}{quote}");
    Some(inner.replace(&doubled, &quote.to_string()))
}

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "upsert", "create", "alter", "drop", "truncate",
];

/// Lexical check: a mutating keyword appears as a whole word outside of
/// literals, quoted identifiers and comments, and no `RETURNING` does.
pub fn is_mutation(sql: &str) -> bool {
    let words = keywords(sql);
    words.iter().any(|w| MUTATING_KEYWORDS.contains(&w.as_str()))
        && !words.iter().any(|w| w == "returning")
}

fn keywords(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c.to_ascii_lowercase());
            continue;
        }
        if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        match c {
            '\'' | '"' | '`' => {
                // Doubled quotes inside a literal simply re-enter this branch.
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for q in chars.by_ref() {
                    if q == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for q in chars.by_ref() {
                    if prev == '*' && q == '/' {
                        break;
                    }
                    prev = q;
                }
            }
            _ => {}
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Direction, Ordering};

    fn filter(column: &str, value: &str) -> Filter {
        Filter {
            column: column.into(),
            value: value.into(),
        }
    }

    #[test]
    fn quoted_values_compile_to_like() {
        let mut bound = Vec::new();
        let clause = filter_clause(Dialect::Sqlite, &[filter("name", "'abc'")], &mut bound);
        assert_eq!(clause.as_deref(), Some("(name LIKE ?)"));
        assert_eq!(bound, vec!["abc"]);
    }

    #[test]
    fn unquoted_values_compile_to_equality() {
        let mut bound = Vec::new();
        let clause = filter_clause(Dialect::Mysql, &[filter("id", "42")], &mut bound);
        assert_eq!(clause.as_deref(), Some("(`id` = ?)"));
        assert_eq!(bound, vec!["42"]);
    }

    #[test]
    fn filters_are_and_joined() {
        let mut bound = vec!["public".to_string()];
        let clause = filter_clause(
            Dialect::Postgres,
            &[filter("id", "42"), filter("name", "'O''B%'")],
            &mut bound,
        );
        assert_eq!(
            clause.as_deref(),
            Some("(CAST(\"id\" AS TEXT) = $2 AND CAST(\"name\" AS TEXT) LIKE $3)")
        );
        assert_eq!(bound, vec!["public", "42", "O'B%"]);
    }

    #[test]
    fn paged_query_and_count_share_the_filter() {
        let params = QueryParams {
            limit: Some(10),
            offset: 20,
            order: vec![Ordering {
                column: "id".into(),
                direction: Direction::Desc,
            }],
            filter: vec![filter("name", "'a%'")],
        };
        let q = build_paged(Dialect::Sqlite, &Source::table("t".into()), &params, 10);
        assert_eq!(
            q.select.sql,
            "SELECT * FROM t WHERE (name LIKE ?) ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.count.sql, "SELECT COUNT(*) FROM t WHERE (name LIKE ?)");
        assert_eq!(q.select.params, q.count.params);
    }

    #[test]
    fn catalog_sources_number_placeholders_after_their_own() {
        let params = QueryParams {
            filter: vec![filter("name", "'user%'")],
            ..Default::default()
        };
        let q = build_paged(
            Dialect::Postgres,
            &Dialect::Postgres.tables_source("public"),
            &params,
            50,
        );
        assert!(q.select.sql.starts_with("SELECT * FROM (SELECT table_name::text AS name"));
        assert!(q.select.sql.ends_with(") AS catalog WHERE (CAST(\"name\" AS TEXT) LIKE $2) LIMIT 50 OFFSET 0"));
        assert_eq!(q.count.params, vec!["public", "user%"]);
    }

    #[test]
    fn unquote_requires_matching_quotes() {
        assert_eq!(unquote_pattern("'abc'").as_deref(), Some("abc"));
        assert_eq!(unquote_pattern("\"a%\"").as_deref(), Some("a%"));
        assert_eq!(unquote_pattern("'abc"), None);
        assert_eq!(unquote_pattern("'"), None);
        assert_eq!(unquote_pattern("42"), None);
    }

    #[test]
    fn mutation_detection() {
        assert!(is_mutation("DELETE FROM t"));
        assert!(is_mutation("insert into t values (1)"));
        assert!(is_mutation("CREATE TABLE x (id int)"));
        assert!(!is_mutation("SELECT * FROM t"));
        assert!(!is_mutation("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!is_mutation("SELECT created_at, updated_by FROM t"));
        assert!(!is_mutation("SELECT * FROM t WHERE note = 'please delete me'"));
        assert!(!is_mutation("SELECT 1 -- drop later"));
        assert!(!is_mutation("SELECT \"update\" FROM t"));
    }
}
