//! Integration tests for ad-hoc query validation.
//!
//! These check the properties every accepted query must have rather than
//! exact rewrites, which the unit tests already pin down.

use db_tool_server::error::DbError;
use db_tool_server::tools::sql_validator::{
    FORBIDDEN_KEYWORDS, QueryValidationResult, QueryValidator, RejectionReason, ValidatorConfig,
};

fn validator() -> QueryValidator {
    QueryValidator::new(ValidatorConfig {
        max_rows: 1000,
        max_joins: 2,
        max_subqueries: 1,
    })
}

fn reason(sql: &str) -> RejectionReason {
    match validator().validate(sql) {
        QueryValidationResult::Rejected { reason } => reason,
        other => panic!("expected rejection for {sql:?}, got {other:?}"),
    }
}

fn rewritten(sql: &str) -> String {
    match validator().validate(sql) {
        QueryValidationResult::Accepted { rewritten_sql } => rewritten_sql,
        other => panic!("expected acceptance for {sql:?}, got {other:?}"),
    }
}

#[test]
fn test_accepted_queries_always_carry_a_limit() {
    let queries = [
        "SELECT * FROM creators",
        "select id, handle from creators where score > 1",
        "SELECT handle FROM creators ORDER BY score DESC;",
        "SELECT COUNT(*) FROM creators c JOIN posts p ON p.creator_id = c.id",
        "SELECT * FROM creators LIMIT 5",
        "SELECT * FROM creators LIMIT 10 OFFSET 20",
        "SELECT * FROM creators LIMIT 20, 10",
    ];
    for sql in queries {
        let out = rewritten(sql);
        assert!(
            out.to_ascii_uppercase().contains("LIMIT"),
            "{sql:?} rewrote to {out:?}"
        );
        assert!(!out.contains(';'), "{sql:?} rewrote to {out:?}");
    }
}

#[test]
fn test_quoted_parens_do_not_hide_missing_limit() {
    let queries = [
        "SELECT * FROM big WHERE id NOT IN (SELECT \")\" LIMIT 5)",
        "SELECT * FROM big WHERE id NOT IN (SELECT `)` LIMIT 5)",
        "SELECT * FROM big WHERE id NOT IN (SELECT [)] LIMIT 5)",
    ];
    for sql in queries {
        assert_eq!(rewritten(sql), format!("{sql} LIMIT 1000"));
    }
    assert_eq!(
        reason("SELECT \"(\" AS p FROM big LIMIT 5000"),
        RejectionReason::LimitTooLarge {
            found: 5000,
            max: 1000
        }
    );
}

#[test]
fn test_validation_is_idempotent() {
    let queries = [
        "SELECT * FROM creators",
        "  SELECT handle FROM creators WHERE id IN (SELECT creator_id FROM posts) ; ",
        "SELECT * FROM creators LIMIT 7",
    ];
    for sql in queries {
        let once = rewritten(sql);
        let twice = rewritten(&once);
        assert_eq!(once, twice, "rewriting {sql:?} is not stable");
    }
}

#[test]
fn test_every_forbidden_keyword_is_rejected() {
    for keyword in FORBIDDEN_KEYWORDS {
        let sql = format!("SELECT * FROM creators WHERE {} = 1", keyword.to_lowercase());
        assert_eq!(
            reason(&sql),
            RejectionReason::ForbiddenKeyword((*keyword).to_string()),
            "{sql:?}"
        );
    }
}

#[test]
fn test_keywords_inside_identifiers_are_rejected() {
    let cases = [
        ("SELECT updated_at FROM creators", "UPDATE"),
        ("SELECT * FROM droplets", "DROP"),
        ("SELECT created_by FROM creators", "CREATE"),
        ("SELECT deleted_flag FROM creators", "DELETE"),
    ];
    for (sql, keyword) in cases {
        assert_eq!(
            reason(sql),
            RejectionReason::ForbiddenKeyword(keyword.to_string()),
            "{sql:?}"
        );
    }
}

#[test]
fn test_statement_shape_rejections() {
    assert_eq!(reason(""), RejectionReason::Empty);
    assert_eq!(reason("WITH x AS (SELECT 1) SELECT * FROM x"), RejectionReason::NotSelect);
    assert_eq!(
        reason("SELECT 1; SELECT 2"),
        RejectionReason::MultipleStatements
    );
    assert_eq!(
        reason("SELECT * FROM creators; DROP TABLE creators;"),
        RejectionReason::MultipleStatements
    );
    assert_eq!(reason("SELECT 1 -- trailing"), RejectionReason::Comment);
    assert_eq!(reason("SELECT /* hi */ 1"), RejectionReason::Comment);
}

#[test]
fn test_complexity_caps_use_configured_limits() {
    assert_eq!(
        reason("SELECT * FROM a JOIN b ON 1 JOIN c ON 1 JOIN d ON 1"),
        RejectionReason::TooManyJoins { found: 3, max: 2 }
    );
    assert_eq!(
        reason("SELECT * FROM a WHERE x IN (SELECT y FROM b WHERE z IN ( SELECT w FROM c))"),
        RejectionReason::TooManySubqueries { found: 2, max: 1 }
    );
    assert_eq!(
        reason("SELECT * FROM creators LIMIT 5000"),
        RejectionReason::LimitTooLarge {
            found: 5000,
            max: 1000
        }
    );
    assert_eq!(
        reason("SELECT * FROM creators LIMIT ?"),
        RejectionReason::InvalidLimit
    );
}

#[test]
fn test_rejection_converts_to_query_rejected_error() {
    let err = validator()
        .validate("DELETE FROM creators")
        .into_result()
        .unwrap_err();
    assert!(matches!(err, DbError::QueryRejected { .. }), "got {err:?}");
    assert_eq!(err.kind(), "validation");
}
