//! Per-index table definitions using SurrealQL.

/// Reserved columns stored next to the document body.
pub(crate) const ID_FIELD: &str = "doc_id";
pub(crate) const KIND_FIELD: &str = "doc_kind";
pub(crate) const VERSION_FIELD: &str = "doc_version";

/// Schema for one index. `{table}` must already be a validated identifier.
pub(crate) fn index_schema(table: &str) -> String {
    format!(
        r#"
-- One schemaless table per index; bodies are stored at the top level
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;

DEFINE FIELD IF NOT EXISTS {ID_FIELD} ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS {KIND_FIELD} ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS {VERSION_FIELD} ON {table} TYPE int;

-- Polling looks up claimable documents of one type
DEFINE INDEX IF NOT EXISTS {table}_kind ON {table} FIELDS {KIND_FIELD};
DEFINE INDEX IF NOT EXISTS {table}_kind_status ON {table} FIELDS {KIND_FIELD}, status;
"#
    )
}
