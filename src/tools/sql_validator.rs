//! Query safety validation for the `run_query` tool.
//!
//! Caller-supplied SQL goes through a fixed sequence of conservative, pattern-based
//! checks before it is allowed near a pooled connection:
//!
//! 1. statement shape (single `SELECT`, at most one trailing `;`)
//! 2. forbidden keyword scan over the normalized text
//! 3. comment marker scan
//! 4. join / nested subquery caps
//! 5. row limit governance (append a `LIMIT` or reject an oversized one)
//!
//! This is deliberately not a SQL parser. Keyword matching is a substring scan
//! of the upper-cased, whitespace-collapsed text, so a forbidden word inside a
//! string literal, a quoted identifier or a longer name (`updated_at`) is
//! rejected too. That bias fails closed.
//!
//! The validator holds only its configuration, so the same input always yields
//! the same [`QueryValidationResult`] and it can be shared freely across tasks.

use crate::config::{DEFAULT_MAX_JOINS, DEFAULT_MAX_ROWS, DEFAULT_MAX_SUBQUERIES};
use crate::error::{DbError, DbResult};
use thiserror::Error;

/// Mutation and administrative keywords that may never appear in an ad-hoc query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "ANALYZE",
];

const COMMENT_MARKERS: &[&str] = &["--", "/*", "*/"];

/// Limits applied by [`QueryValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Row cap appended when no `LIMIT` is present, and the largest `LIMIT` accepted.
    pub max_rows: u64,
    pub max_joins: usize,
    pub max_subqueries: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_joins: DEFAULT_MAX_JOINS,
            max_subqueries: DEFAULT_MAX_SUBQUERIES,
        }
    }
}

/// Why a query was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("query is empty")]
    Empty,

    #[error("only a single SELECT statement is allowed")]
    NotSelect,

    #[error("multiple statements are not allowed")]
    MultipleStatements,

    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("SQL comments are not allowed")]
    Comment,

    #[error("too many joins: {found} (max {max})")]
    TooManyJoins { found: usize, max: usize },

    #[error("too many nested subqueries: {found} (max {max})")]
    TooManySubqueries { found: usize, max: usize },

    #[error("LIMIT {found} exceeds the maximum of {max} rows")]
    LimitTooLarge { found: u64, max: u64 },

    #[error("LIMIT must be a literal row count")]
    InvalidLimit,
}

/// Outcome of a single validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValidationResult {
    Accepted { rewritten_sql: String },
    Rejected { reason: RejectionReason },
}

impl QueryValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The SQL to execute, or a validation error for the caller.
    pub fn into_result(self) -> DbResult<String> {
        match self {
            Self::Accepted { rewritten_sql } => Ok(rewritten_sql),
            Self::Rejected { reason } => Err(DbError::query_rejected(reason.to_string())),
        }
    }
}

/// Pattern-based read-only query checker.
#[derive(Debug, Clone, Default)]
pub struct QueryValidator {
    config: ValidatorConfig,
}

impl QueryValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate `sql` and return the text that may be executed.
    ///
    /// # Examples
    ///
    /// ```
    /// use db_tool_server::tools::sql_validator::{QueryValidator, QueryValidationResult};
    ///
    /// let validator = QueryValidator::default();
    /// assert_eq!(
    ///     validator.validate("SELECT * FROM creators"),
    ///     QueryValidationResult::Accepted {
    ///         rewritten_sql: "SELECT * FROM creators LIMIT 10000".to_string()
    ///     }
    /// );
    /// assert!(!validator.validate("SELECT * FROM t; DROP TABLE t;").is_accepted());
    /// ```
    pub fn validate(&self, sql: &str) -> QueryValidationResult {
        match self.check(sql) {
            Ok(rewritten_sql) => QueryValidationResult::Accepted { rewritten_sql },
            Err(reason) => QueryValidationResult::Rejected { reason },
        }
    }

    fn check(&self, sql: &str) -> Result<String, RejectionReason> {
        // Step 1: statement shape
        let body = statement_body(sql);
        if body.is_empty() {
            return Err(RejectionReason::Empty);
        }
        if body.contains(';') {
            return Err(RejectionReason::MultipleStatements);
        }
        let normalized = normalize(body);
        if !starts_with_word(&normalized, "SELECT") {
            return Err(RejectionReason::NotSelect);
        }

        // Step 2: forbidden keywords, as plain substrings. `updated_at` and
        // `droplets` are rejected too.
        if let Some(keyword) = FORBIDDEN_KEYWORDS
            .iter()
            .find(|kw| normalized.contains(**kw))
        {
            return Err(RejectionReason::ForbiddenKeyword((*keyword).to_string()));
        }

        // Step 3: comment markers
        if COMMENT_MARKERS.iter().any(|m| body.contains(m)) {
            return Err(RejectionReason::Comment);
        }

        // Step 4: complexity caps
        let joins = count_word(&normalized, "JOIN");
        if joins > self.config.max_joins {
            return Err(RejectionReason::TooManyJoins {
                found: joins,
                max: self.config.max_joins,
            });
        }
        let subqueries = count_word(&normalized.replace("( ", "("), "(SELECT");
        if subqueries > self.config.max_subqueries {
            return Err(RejectionReason::TooManySubqueries {
                found: subqueries,
                max: self.config.max_subqueries,
            });
        }

        // Step 5: row limit
        match top_level_limit(&normalized)? {
            Some(found) if found > self.config.max_rows => Err(RejectionReason::LimitTooLarge {
                found,
                max: self.config.max_rows,
            }),
            Some(_) => Ok(body.to_string()),
            None => Ok(format!("{} LIMIT {}", body, self.config.max_rows)),
        }
    }
}

/// Trim whitespace and a single optional trailing terminator.
fn statement_body(sql: &str) -> &str {
    let trimmed = sql.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}

/// Upper-case and collapse runs of whitespace to a single space.
fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn starts_with_word(text: &str, word: &str) -> bool {
    text.starts_with(word)
        && text
            .as_bytes()
            .get(word.len())
            .is_none_or(|b| !is_word_byte(*b))
}

/// Count occurrences of `word` not embedded in a longer identifier.
///
/// Only the edges that are themselves word characters are boundary-checked, so
/// `(SELECT` matches after any character.
fn count_word(text: &str, word: &str) -> usize {
    let bytes = text.as_bytes();
    let check_before = word.as_bytes().first().is_some_and(|b| is_word_byte(*b));
    text.match_indices(word)
        .filter(|(start, _)| {
            let end = start + word.len();
            let before_ok = !check_before
                || *start == 0
                || !is_word_byte(bytes[start - 1]);
            let after_ok = bytes.get(end).is_none_or(|b| !is_word_byte(*b));
            before_ok && after_ok
        })
        .count()
}

/// Byte that closes a quoted span opened by `open`, if `open` starts one.
///
/// Covers string literals and the three identifier quoting styles SQLite
/// accepts. A doubled quote inside a span closes and reopens it, which leaves
/// the outcome unchanged.
fn closing_quote(open: u8) -> Option<u8> {
    match open {
        b'\'' | b'"' | b'`' => Some(open),
        b'[' => Some(b']'),
        _ => None,
    }
}

/// Find the row count of a `LIMIT` clause outside any parentheses.
///
/// Parentheses and words inside quoted spans are ignored.
/// Understands `LIMIT n`, `LIMIT n OFFSET m` and `LIMIT m, n`.
fn top_level_limit(normalized: &str) -> Result<Option<u64>, RejectionReason> {
    let bytes = normalized.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut found = None;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(close) = quote {
            if b == close {
                quote = None;
            }
            continue;
        }
        if let Some(close) = closing_quote(b) {
            quote = Some(close);
            continue;
        }
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'L' if depth == 0 => {
                let boundary = i == 0 || !is_word_byte(bytes[i - 1]);
                if boundary && starts_with_word(&normalized[i..], "LIMIT") {
                    found = Some(i + "LIMIT".len());
                }
            }
            _ => {}
        }
    }

    let Some(start) = found else {
        return Ok(None);
    };

    let rest = normalized[start..].trim_start();
    let (first, after_first) = leading_number(rest)?;
    let after_first = after_first.trim_start();
    let count = match after_first.strip_prefix(',') {
        Some(second) => leading_number(second.trim_start())?.0,
        None => first,
    };
    Ok(Some(count))
}

fn leading_number(text: &str) -> Result<(u64, &str), RejectionReason> {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || text.as_bytes().get(digits).is_some_and(|b| is_word_byte(*b)) {
        return Err(RejectionReason::InvalidLimit);
    }
    let value = text[..digits]
        .parse::<u64>()
        .map_err(|_| RejectionReason::InvalidLimit)?;
    Ok((value, &text[digits..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> QueryValidator {
        QueryValidator::default()
    }

    fn rejected(sql: &str) -> RejectionReason {
        match validator().validate(sql) {
            QueryValidationResult::Rejected { reason } => reason,
            other => panic!("expected rejection for {sql:?}, got {other:?}"),
        }
    }

    fn accepted(sql: &str) -> String {
        match validator().validate(sql) {
            QueryValidationResult::Accepted { rewritten_sql } => rewritten_sql,
            other => panic!("expected acceptance for {sql:?}, got {other:?}"),
        }
    }

    // =========================================================================
    // Statement shape
    // =========================================================================

    #[test]
    fn test_empty_query() {
        assert_eq!(rejected(""), RejectionReason::Empty);
        assert_eq!(rejected("   \n\t "), RejectionReason::Empty);
        assert_eq!(rejected(" ; "), RejectionReason::Empty);
    }

    #[test]
    fn test_single_trailing_terminator_allowed() {
        assert_eq!(accepted("SELECT 1;"), "SELECT 1 LIMIT 10000");
        assert_eq!(accepted("  SELECT 1 ;  "), "SELECT 1 LIMIT 10000");
    }

    #[test]
    fn test_multiple_statements_rejected() {
        assert_eq!(
            rejected("SELECT * FROM t; DROP TABLE t;"),
            RejectionReason::MultipleStatements
        );
        assert_eq!(rejected("SELECT 1;;"), RejectionReason::MultipleStatements);
        assert_eq!(
            rejected("SELECT 1; SELECT 2"),
            RejectionReason::MultipleStatements
        );
    }

    #[test]
    fn test_non_select_rejected() {
        assert_eq!(rejected("WITH x AS (SELECT 1) SELECT * FROM x"), RejectionReason::NotSelect);
        assert_eq!(rejected("EXPLAIN SELECT 1"), RejectionReason::NotSelect);
        assert_eq!(rejected("SELECTED FROM t"), RejectionReason::NotSelect);
    }

    #[test]
    fn test_mutation_statements_rejected() {
        assert!(!validator().validate("INSERT INTO t VALUES (1)").is_accepted());
        assert!(!validator().validate("DELETE FROM t").is_accepted());
        assert!(!validator().validate("PRAGMA table_info(t)").is_accepted());
    }

    #[test]
    fn test_lowercase_select_accepted() {
        assert_eq!(
            accepted("select id from users"),
            "select id from users LIMIT 10000"
        );
    }

    // =========================================================================
    // Forbidden keywords
    // =========================================================================

    #[test]
    fn test_forbidden_keyword_anywhere() {
        assert_eq!(
            rejected("SELECT * FROM t WHERE id IN (SELECT id FROM x) UNION SELECT 1 FROM (DELETE FROM y)"),
            RejectionReason::ForbiddenKeyword("DELETE".into())
        );
        assert_eq!(
            rejected("select * from pragma_table_info('t') where 1 = 1 and attach = 2"),
            RejectionReason::ForbiddenKeyword("ATTACH".into())
        );
    }

    #[test]
    fn test_forbidden_keyword_in_literal_is_still_rejected() {
        assert_eq!(
            rejected("SELECT * FROM notes WHERE body = 'please delete me'"),
            RejectionReason::ForbiddenKeyword("DELETE".into())
        );
        assert_eq!(
            rejected("SELECT \"drop\" FROM t"),
            RejectionReason::ForbiddenKeyword("DROP".into())
        );
    }

    #[test]
    fn test_keyword_inside_identifier_is_rejected() {
        assert_eq!(
            rejected("SELECT updated_at FROM audit_log"),
            RejectionReason::ForbiddenKeyword("UPDATE".into())
        );
        assert_eq!(
            rejected("SELECT id FROM droplets"),
            RejectionReason::ForbiddenKeyword("DROP".into())
        );
        assert_eq!(
            rejected("SELECT created_by FROM audit_log"),
            RejectionReason::ForbiddenKeyword("CREATE".into())
        );
        accepted("SELECT replace(name, 'a', 'b') FROM t");
    }

    #[test]
    fn test_keyword_scan_is_case_and_whitespace_insensitive() {
        assert_eq!(
            rejected("SELECT 1 FROM t WHERE x IN (\n  SeLeCt 1 FROM y)\n UNION SELECT 1 FROM z WHERE Vacuum\t= 1"),
            RejectionReason::ForbiddenKeyword("VACUUM".into())
        );
    }

    // =========================================================================
    // Comments
    // =========================================================================

    #[test]
    fn test_line_comment_rejected() {
        assert_eq!(rejected("SELECT * FROM t -- x"), RejectionReason::Comment);
    }

    #[test]
    fn test_block_comment_rejected() {
        assert_eq!(rejected("SELECT /* x */ * FROM t"), RejectionReason::Comment);
        assert_eq!(rejected("SELECT * FROM t */"), RejectionReason::Comment);
    }

    // =========================================================================
    // Complexity caps
    // =========================================================================

    fn joins(n: usize) -> String {
        let mut sql = String::from("SELECT * FROM t0");
        for i in 1..=n {
            sql.push_str(&format!(" JOIN t{i} ON t{i}.id = t0.id"));
        }
        sql
    }

    #[test]
    fn test_join_cap() {
        assert!(validator().validate(&joins(5)).is_accepted());
        assert_eq!(
            rejected(&joins(6)),
            RejectionReason::TooManyJoins { found: 6, max: 5 }
        );
    }

    #[test]
    fn test_join_counts_all_join_flavours() {
        let sql = "SELECT * FROM a LEFT JOIN b ON 1 INNER JOIN c ON 1 CROSS JOIN d \
                   left outer join e on 1 JOIN f ON 1 join g on 1";
        assert_eq!(
            rejected(sql),
            RejectionReason::TooManyJoins { found: 6, max: 5 }
        );
    }

    #[test]
    fn test_subquery_cap() {
        let ok = "SELECT * FROM a WHERE x IN (SELECT 1) AND y IN ( SELECT 2) AND z IN (select 3)";
        assert!(validator().validate(ok).is_accepted());

        let too_many = "SELECT * FROM a WHERE w IN (SELECT 1) AND x IN (SELECT 1) \
                        AND y IN (SELECT 2) AND z IN (SELECT 3)";
        assert_eq!(
            rejected(too_many),
            RejectionReason::TooManySubqueries { found: 4, max: 3 }
        );
    }

    #[test]
    fn test_custom_caps() {
        let strict = QueryValidator::new(ValidatorConfig {
            max_rows: 10,
            max_joins: 0,
            max_subqueries: 0,
        });
        assert!(!strict.validate("SELECT * FROM a JOIN b ON 1").is_accepted());
        assert!(!strict.validate("SELECT * FROM (SELECT 1)").is_accepted());
        assert_eq!(
            strict.validate("SELECT 1"),
            QueryValidationResult::Accepted {
                rewritten_sql: "SELECT 1 LIMIT 10".into()
            }
        );
    }

    // =========================================================================
    // Row limit
    // =========================================================================

    #[test]
    fn test_auto_limit_appended() {
        let sql = accepted("SELECT * FROM creators");
        assert!(sql.ends_with("LIMIT 10000"));
    }

    #[test]
    fn test_limit_cap_enforced() {
        assert_eq!(
            rejected("SELECT * FROM creators LIMIT 50000"),
            RejectionReason::LimitTooLarge {
                found: 50000,
                max: 10000
            }
        );
    }

    #[test]
    fn test_limit_within_cap_kept_as_is() {
        assert_eq!(
            accepted("SELECT * FROM creators LIMIT 50"),
            "SELECT * FROM creators LIMIT 50"
        );
        assert_eq!(
            accepted("SELECT * FROM creators limit 10000 offset 20000"),
            "SELECT * FROM creators limit 10000 offset 20000"
        );
    }

    #[test]
    fn test_limit_offset_comma_form_uses_count() {
        assert!(validator()
            .validate("SELECT * FROM t LIMIT 50000, 10")
            .is_accepted());
        assert_eq!(
            rejected("SELECT * FROM t LIMIT 10, 50000"),
            RejectionReason::LimitTooLarge {
                found: 50000,
                max: 10000
            }
        );
    }

    #[test]
    fn test_nested_limit_does_not_count() {
        let sql = accepted("SELECT * FROM (SELECT * FROM t LIMIT 5)");
        assert_eq!(sql, "SELECT * FROM (SELECT * FROM t LIMIT 5) LIMIT 10000");
    }

    #[test]
    fn test_limit_inside_literal_does_not_count() {
        let sql = accepted("SELECT * FROM t WHERE note = ' limit 5'");
        assert!(sql.ends_with("LIMIT 10000"));
    }

    #[test]
    fn test_quoted_paren_does_not_change_depth() {
        for quoted in ["\")\"", "`)`", "[)]", "')'"] {
            let sql = format!("SELECT * FROM big WHERE id NOT IN (SELECT {quoted} LIMIT 5)");
            assert_eq!(accepted(&sql), format!("{sql} LIMIT 10000"));
        }
    }

    #[test]
    fn test_quoted_open_paren_does_not_hide_top_level_limit() {
        assert_eq!(
            rejected("SELECT \"(\" FROM t LIMIT 50000"),
            RejectionReason::LimitTooLarge {
                found: 50000,
                max: 10000
            }
        );
        let sql = accepted("SELECT [a(b] FROM t LIMIT 5");
        assert_eq!(sql, "SELECT [a(b] FROM t LIMIT 5");
    }

    #[test]
    fn test_non_literal_limit_rejected() {
        assert_eq!(rejected("SELECT * FROM t LIMIT ?"), RejectionReason::InvalidLimit);
        assert_eq!(rejected("SELECT * FROM t LIMIT -1"), RejectionReason::InvalidLimit);
        assert_eq!(rejected("SELECT * FROM t LIMIT 10abc"), RejectionReason::InvalidLimit);
    }

    #[test]
    fn test_limit_identifier_not_a_clause() {
        let sql = accepted("SELECT credit_limit FROM accounts");
        assert!(sql.ends_with("LIMIT 10000"));
    }

    // =========================================================================
    // Purity
    // =========================================================================

    #[test]
    fn test_validation_is_idempotent() {
        let v = validator();
        for sql in [
            "SELECT * FROM creators",
            "SELECT * FROM t -- x",
            "SELECT * FROM creators LIMIT 50000",
            "",
        ] {
            assert_eq!(v.validate(sql), v.validate(sql));
        }
    }

    #[test]
    fn test_rewritten_sql_revalidates_unchanged() {
        let v = validator();
        let first = accepted("SELECT * FROM creators");
        assert_eq!(
            v.validate(&first),
            QueryValidationResult::Accepted {
                rewritten_sql: first.clone()
            }
        );
    }

    #[test]
    fn test_into_result_maps_to_validation_error() {
        let err = validator()
            .validate("DROP TABLE t")
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("SELECT"));
    }
}
