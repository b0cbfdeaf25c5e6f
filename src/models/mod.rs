//! Data models shared by the datastore layer and the tools.

pub mod query;
pub mod schema;

pub use query::{ColumnMetadata, QueryParam, QueryResult};
pub use schema::{
    Affinity, ColumnInfo, ForeignKey, IndexInfo, IndexOrigin, ObjectKind, ReferentialAction,
    TableEntry, TableListing, TableSchema,
};
