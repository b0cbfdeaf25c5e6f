//! Schema introspection tools.
//!
//! `list_tables` and `describe_table` run fixed statements and bypass the
//! query validator.

use crate::db::schema as inspector;
use crate::error::DbResult;
use crate::models::{TableListing, TableSchema};
use crate::tools::ToolContext;
use schemars::JsonSchema;
use serde::Deserialize;

/// Input for the list_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Include views in the listing. Default: false
    #[serde(default)]
    pub include_views: bool,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Name of the table to describe
    pub table_name: String,
}

pub async fn list_tables(ctx: ToolContext, input: ListTablesInput) -> DbResult<TableListing> {
    let mut conn = ctx.pool().acquire().await?;
    inspector::list_tables(&mut conn, input.include_views).await
}

pub async fn describe_table(ctx: ToolContext, input: DescribeTableInput) -> DbResult<TableSchema> {
    // Reject bad names before spending a checkout on them
    inspector::validate_identifier(&input.table_name)?;

    let mut conn = ctx.pool().acquire().await?;
    inspector::describe_table(&mut conn, &input.table_name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::tools::test_support::{seeded_context, test_context};

    #[tokio::test]
    async fn test_list_tables_tool() {
        let (ctx, _dir) = seeded_context().await;
        let listing = list_tables(ctx, ListTablesInput::default()).await.unwrap();
        assert_eq!(listing.tables.len(), 1);
        assert_eq!(listing.tables[0].name, "creators");
    }

    #[tokio::test]
    async fn test_describe_table_tool() {
        let (ctx, _dir) = seeded_context().await;
        let schema = describe_table(
            ctx,
            DescribeTableInput {
                table_name: "creators".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(schema.primary_key, vec!["id"]);
        assert_eq!(schema.columns.len(), 3);
    }

    #[tokio::test]
    async fn test_bad_identifier_fails_before_checkout() {
        let (ctx, _dir) = test_context().await;
        let err = describe_table(
            ctx.clone(),
            DescribeTableInput {
                table_name: "x'); --".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidParams { .. }));
        assert_eq!(ctx.pool().stats().acquired_total, 0);
    }
}
