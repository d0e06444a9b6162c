//! SurrealDB-backed document store.

use serde::Deserialize;
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::query::{is_field_path, is_identifier};
use crate::schema::{ID_FIELD, KIND_FIELD, VERSION_FIELD, index_schema};
use crate::{
    Database, DbConfig, DocumentStore, Filter, Indexed, SearchQuery, StoreError, StoredDocument,
    Version, connect,
};

/// [`DocumentStore`] on SurrealDB.
///
/// Each index is a table. A record holds the document body at the top level
/// plus `doc_id`, `doc_kind` and `doc_version`. The conditional update is a
/// single `UPDATE … WHERE doc_version = $expected` statement, so the check
/// and the write happen atomically on the server.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    doc_version: u64,
}

impl SurrealStore {
    /// Connect using `config`.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        Ok(Self::from_database(connect(config).await?))
    }

    /// Wrap an already configured connection.
    pub fn from_database(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Define the table and polling indexes for `index`.
    pub async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        let table = table_name(index)?;
        tracing::info!("Defining index table: {}", table);
        self.db.query(index_schema(table)).await?.check()?;
        Ok(())
    }

    /// Look up the current version of a document to explain a failed update.
    async fn current_version(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
    ) -> Result<Option<Version>, StoreError> {
        let mut response = self
            .db
            .query(format!(
                "SELECT {VERSION_FIELD} FROM type::thing($tb, $id) WHERE {KIND_FIELD} = $kind"
            ))
            .bind(("tb", index.to_string()))
            .bind(("id", id.to_string()))
            .bind(("kind", doc_type.to_string()))
            .await?;
        let rows: Vec<VersionRow> = response.take(0)?;
        Ok(rows.first().map(|row| Version(row.doc_version)))
    }

    /// One `UPDATE … WHERE doc_version = $expected`; `None` when the clause
    /// matched nothing.
    async fn try_update(
        &self,
        table: &str,
        doc_type: &str,
        id: &str,
        expected: Version,
        merge: Value,
    ) -> Result<Option<Version>, StoreError> {
        let mut response = self
            .db
            .query(format!(
                "UPDATE type::thing($tb, $id) MERGE $merge \
                 WHERE {KIND_FIELD} = $kind AND {VERSION_FIELD} = $expected \
                 RETURN {VERSION_FIELD}"
            ))
            .bind(("tb", table.to_string()))
            .bind(("id", id.to_string()))
            .bind(("kind", doc_type.to_string()))
            .bind(("expected", expected.0))
            .bind(("merge", merge))
            .await?;
        let rows: Vec<VersionRow> = response.take(0)?;
        Ok(rows.first().map(|row| Version(row.doc_version)))
    }
}

/// Commit attempts for one conditional update that keeps hitting
/// transaction conflicts while the version still matches.
const UPDATE_ATTEMPTS: usize = 2;

/// SurrealDB aborts one side of two transactions writing the same record
/// with a retryable commit error instead of evaluating its `WHERE` clause.
fn is_retryable(error: &StoreError) -> bool {
    matches!(error, StoreError::Database(e) if e.to_string().contains("can be retried"))
}

fn table_name(index: &str) -> Result<&str, StoreError> {
    if is_identifier(index) {
        Ok(index)
    } else {
        Err(StoreError::InvalidIndex(index.to_string()))
    }
}

/// Escape each segment of a dotted path with backticks.
fn field_idiom(path: &str) -> Result<String, StoreError> {
    if !is_field_path(path) {
        return Err(StoreError::InvalidField(path.to_string()));
    }
    Ok(path
        .split('.')
        .map(|segment| format!("`{}`", segment))
        .collect::<Vec<_>>()
        .join("."))
}

/// Compile a filter into a `WHERE` fragment, pushing values into `bindings`.
fn compile(filter: &Filter, bindings: &mut Vec<(String, Value)>) -> Result<String, StoreError> {
    match filter {
        Filter::Eq { field, value } => {
            let field = field_idiom(field)?;
            Ok(format!("{} = ${}", field, bind(bindings, value)))
        }
        Filter::Lt { field, value } => {
            let field = field_idiom(field)?;
            Ok(format!("{} < ${}", field, bind(bindings, value)))
        }
        Filter::And(filters) if filters.is_empty() => Ok("true".to_string()),
        Filter::Or(filters) if filters.is_empty() => Ok("false".to_string()),
        Filter::And(filters) => join(filters, " AND ", bindings),
        Filter::Or(filters) => join(filters, " OR ", bindings),
    }
}

fn bind(bindings: &mut Vec<(String, Value)>, value: &Value) -> String {
    let name = format!("p{}", bindings.len());
    bindings.push((name.clone(), value.clone()));
    name
}

fn join(
    filters: &[Filter],
    separator: &str,
    bindings: &mut Vec<(String, Value)>,
) -> Result<String, StoreError> {
    let parts = filters
        .iter()
        .map(|f| compile(f, bindings))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(separator)))
}

/// Split a stored record into its metadata and body.
fn into_stored(mut row: Map<String, Value>) -> Result<StoredDocument, StoreError> {
    let id = match row.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        other => {
            return Err(StoreError::InvalidDocument(format!(
                "record without {}: {:?}",
                ID_FIELD, other
            )));
        }
    };
    let version = row
        .remove(VERSION_FIELD)
        .and_then(|v| v.as_u64())
        .map(Version)
        .ok_or_else(|| StoreError::InvalidDocument(format!("record {} without version", id)))?;
    row.remove(KIND_FIELD);

    Ok(StoredDocument {
        id,
        version,
        source: Value::Object(row),
    })
}

fn into_object(value: Value, what: &str) -> Result<Map<String, Value>, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "{} must be an object, got {}",
            what, other
        ))),
    }
}

impl DocumentStore for SurrealStore {
    async fn index(
        &self,
        index: &str,
        doc_type: &str,
        document: Value,
    ) -> Result<Indexed, StoreError> {
        let table = table_name(index)?;
        let mut content = into_object(document, "document")?;
        let id = Ulid::new().to_string();

        content.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        content.insert(KIND_FIELD.to_string(), Value::String(doc_type.to_string()));
        content.insert(VERSION_FIELD.to_string(), Value::from(Version::INITIAL.0));

        let mut response = self
            .db
            .query("CREATE type::thing($tb, $id) CONTENT $content RETURN NONE")
            .bind(("tb", table.to_string()))
            .bind(("id", id.clone()))
            .bind(("content", Value::Object(content)))
            .await?;
        let _: Vec<Value> = response.take(0)?;

        tracing::debug!(index, doc_type, id = %id, "Indexed document");

        Ok(Indexed {
            id,
            version: Version::INITIAL,
        })
    }

    async fn get(&self, index: &str, doc_type: &str, id: &str) -> Result<StoredDocument, StoreError> {
        let table = table_name(index)?;

        let mut response = self
            .db
            .query(format!(
                "SELECT * OMIT id FROM type::thing($tb, $id) WHERE {KIND_FIELD} = $kind"
            ))
            .bind(("tb", table.to_string()))
            .bind(("id", id.to_string()))
            .bind(("kind", doc_type.to_string()))
            .await?;
        let rows: Vec<Map<String, Value>> = response.take(0)?;

        match rows.into_iter().next() {
            Some(row) => into_stored(row),
            None => Err(StoreError::NotFound {
                index: index.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn search(
        &self,
        index: &str,
        doc_type: &str,
        query: &SearchQuery,
        size: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let table = table_name(index)?;

        let mut bindings = Vec::new();
        let mut sql = format!("SELECT * OMIT id FROM type::table($tb) WHERE {KIND_FIELD} = $kind");
        if let Some(filter) = &query.filter {
            sql.push_str(" AND ");
            sql.push_str(&compile(filter, &mut bindings)?);
        }
        if let Some(sort) = &query.sort {
            sql.push_str(&format!(" ORDER BY {} ASC", field_idiom(&sort.field)?));
        }
        sql.push_str(" LIMIT $limit");

        let mut request = self
            .db
            .query(sql)
            .bind(("tb", table.to_string()))
            .bind(("kind", doc_type.to_string()))
            .bind(("limit", i64::try_from(size).unwrap_or(i64::MAX)));
        for binding in bindings {
            request = request.bind(binding);
        }

        let mut response = request.await?;
        let rows: Vec<Map<String, Value>> = response.take(0)?;

        rows.into_iter().map(into_stored).collect()
    }

    async fn update(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        expected: Version,
        patch: Value,
    ) -> Result<Version, StoreError> {
        let table = table_name(index)?;
        let next = expected.next();

        let mut merge = into_object(patch, "patch")?;
        for reserved in [ID_FIELD, KIND_FIELD, VERSION_FIELD] {
            merge.remove(reserved);
        }
        merge.insert(VERSION_FIELD.to_string(), Value::from(next.0));
        let merge = Value::Object(merge);

        for attempt in 1..=UPDATE_ATTEMPTS {
            let error = match self.try_update(table, doc_type, id, expected, merge.clone()).await {
                Ok(Some(version)) => return Ok(version),
                Ok(None) => None,
                Err(e) if is_retryable(&e) => Some(e),
                Err(e) => return Err(e),
            };

            // Either the WHERE clause did not match or the transaction lost a
            // commit race. The current version tells which.
            match self.current_version(index, doc_type, id).await? {
                Some(actual) if actual != expected => {
                    return Err(StoreError::VersionConflict {
                        id: id.to_string(),
                        expected,
                        actual,
                    });
                }
                Some(_) => match error {
                    Some(e) if attempt == UPDATE_ATTEMPTS => return Err(e),
                    Some(e) => {
                        tracing::debug!(index, id, attempt, error = %e, "Retrying conditional update");
                    }
                    None => {
                        return Err(StoreError::Query(format!(
                            "update of {}/{} at {} matched nothing",
                            index, id, expected
                        )));
                    }
                },
                None => {
                    return Err(StoreError::NotFound {
                        index: index.to_string(),
                        id: id.to_string(),
                    });
                }
            }
        }

        Err(StoreError::Query(format!(
            "update of {}/{} at {} did not commit",
            index, id, expected
        )))
    }
}
