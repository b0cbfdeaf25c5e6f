//! The `pool_status` tool.

use crate::db::PoolStats;
use crate::error::DbResult;
use crate::tools::ToolContext;
use schemars::JsonSchema;
use serde::Deserialize;

/// The pool_status tool takes no arguments.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct PoolStatusInput {}

pub async fn pool_status(ctx: ToolContext, _input: PoolStatusInput) -> DbResult<PoolStats> {
    Ok(ctx.pool().stats())
}
