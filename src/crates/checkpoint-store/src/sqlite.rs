//! SQLite-backed durable tier
//!
//! Each collection is one table of `(id TEXT PRIMARY KEY, doc TEXT)` rows where
//! `doc` holds the JSON document without its store identity. Filters, sorts and
//! indexes are expressed over `json_extract(doc, '$.field')`, so secondary
//! indexes are SQLite expression indexes.

use crate::{
    checkpoint::STORE_ID_FIELD,
    error::{Result, StoreError},
    query::{validate_field, Filter, FindOptions, IndexSpec, ReplaceOutcome},
    traits::{Document, DocumentStore},
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{query::Query, Row, Sqlite};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// A value bound into a generated statement
#[derive(Debug, Clone)]
enum SqlParam {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<SqlParam>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value),
            SqlParam::Integer(value) => query.bind(value),
            SqlParam::Real(value) => query.bind(value),
            SqlParam::Bool(value) => query.bind(value),
        };
    }
    query
}

fn field_expr(field: &str) -> String {
    format!("json_extract(doc, '$.{}')", field)
}

fn scalar_param(field: &str, value: &Value) -> Result<Option<SqlParam>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(SqlParam::Bool(*b))),
        Value::String(s) => Ok(Some(SqlParam::Text(s.clone()))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Some(SqlParam::Integer(i))),
            None => n
                .as_f64()
                .map(|f| Some(SqlParam::Real(f)))
                .ok_or_else(|| StoreError::InvalidQuery(format!("unrepresentable number for '{}'", field))),
        },
        Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidQuery(format!(
            "field '{}' can only be compared against scalars",
            field
        ))),
    }
}

/// Translate a filter into a WHERE clause, collecting its parameters
fn where_clause(filter: &Filter, params: &mut Vec<SqlParam>) -> Result<String> {
    match filter {
        Filter::Eq(field, value) => {
            validate_field(field)?;
            match scalar_param(field, value)? {
                Some(param) => {
                    params.push(param);
                    Ok(format!("{} = ?", field_expr(field)))
                }
                None => Ok(format!("{} IS NULL", field_expr(field))),
            }
        }
        Filter::Lt(field, value) => {
            validate_field(field)?;
            let param = scalar_param(field, value)?
                .ok_or_else(|| StoreError::InvalidQuery(format!("'{}' cannot be compared to null", field)))?;
            params.push(param);
            Ok(format!("{} < ?", field_expr(field)))
        }
        Filter::And(filters) if filters.is_empty() => Ok("1 = 1".to_string()),
        Filter::And(filters) => {
            let clauses = filters
                .iter()
                .map(|inner| where_clause(inner, params))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", clauses.join(" AND ")))
        }
    }
}

fn order_clause(options: &FindOptions) -> Result<String> {
    let mut terms = Vec::with_capacity(options.sort.len() + 1);
    for (field, order) in &options.sort {
        validate_field(field)?;
        terms.push(format!("{} {}", field_expr(field), order.as_sql()));
    }
    // Ties fall back to insertion order, newest first under a descending sort
    terms.push(format!("rowid {}", options.tie_break().as_sql()));
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

fn decode_row(id: String, raw: &str) -> Result<Document> {
    let mut document: Document = serde_json::from_str(raw)?;
    document.insert(STORE_ID_FIELD.to_string(), Value::from(id));
    Ok(document)
}

/// Split a document into its store identity and the JSON body to persist
fn encode_document(mut document: Document) -> Result<(Option<String>, String)> {
    let id = match document.remove(STORE_ID_FIELD) {
        Some(Value::String(id)) => Some(id),
        _ => None,
    };
    Ok((id, serde_json::to_string(&document)?))
}

/// Durable document store over a SQLite database
#[derive(Clone, Debug)]
pub struct SqliteDocumentStore {
    pool: Arc<SqlitePool>,
    collection: String,
}

impl SqliteDocumentStore {
    /// Open (creating if missing) a database file and its collection table
    ///
    /// # Arguments
    /// * `database_path` - Path to the SQLite database file
    /// * `collection` - Table name for the collection
    /// * `max_connections` - Maximum number of pooled connections
    pub async fn connect<P: AsRef<Path>>(
        database_path: P,
        collection: &str,
        max_connections: u32,
    ) -> Result<Self> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Connection(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        debug!(path = %path.display(), collection, "Connecting to durable store");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to database: {}", e)))?;

        let store = Self::from_pool(pool, collection).await?;
        info!(path = %path.display(), collection, "Durable store connection established");
        Ok(store)
    }

    /// Private in-memory database, for tests and dry runs
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to a single connection.
    pub async fn in_memory(collection: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open in-memory database: {}", e)))?;

        Self::from_pool(pool, collection).await
    }

    /// Wrap an existing pool, creating the collection table if needed
    pub async fn from_pool(pool: SqlitePool, collection: &str) -> Result<Self> {
        validate_field(collection)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
            collection
        ))
        .execute(&pool)
        .await?;

        Ok(Self {
            pool: Arc::new(pool),
            collection: collection.to_string(),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of stored documents
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", self.collection))
            .fetch_one(self.pool.as_ref())
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn ensure_index(&self, index: &IndexSpec) -> Result<()> {
        validate_field(&index.name)?;
        if index.fields.is_empty() {
            return Err(StoreError::InvalidQuery(format!("index '{}' has no fields", index.name)));
        }

        let columns = index
            .fields
            .iter()
            .map(|(field, order)| {
                validate_field(field)?;
                Ok(format!("{} {}", field_expr(field), order.as_sql()))
            })
            .collect::<Result<Vec<_>>>()?;

        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {}_{} ON {} ({})",
            self.collection,
            index.name,
            self.collection,
            columns.join(", ")
        );
        sqlx::query(&sql).execute(self.pool.as_ref()).await?;

        debug!(collection = %self.collection, index = %index.name, "Index ensured");
        Ok(())
    }

    async fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>> {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT id, doc FROM {} WHERE {}",
            self.collection,
            where_clause(filter, &mut params)?
        );
        sql.push_str(&order_clause(options)?);
        if let Some(limit) = options.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlParam::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let rows = bind_params(sqlx::query(&sql), params)
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let doc: String = row.try_get("doc")?;
                decode_row(id, &doc)
            })
            .collect()
    }

    async fn insert(&self, document: Document) -> Result<String> {
        let (id, body) = encode_document(document)?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(&format!("INSERT INTO {} (id, doc) VALUES (?, ?)", self.collection))
            .bind(&id)
            .bind(body)
            .execute(self.pool.as_ref())
            .await?;

        Ok(id)
    }

    async fn replace_one(
        &self,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        let mut params = Vec::new();
        let select = format!(
            "SELECT id FROM {} WHERE {} ORDER BY rowid ASC LIMIT 1",
            self.collection,
            where_clause(filter, &mut params)?
        );
        let (_, body) = encode_document(document)?;

        let mut tx = self.pool.begin().await?;

        let existing = bind_params(sqlx::query(&select), params)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match existing {
            Some(row) => {
                let id: String = row.try_get("id")?;
                sqlx::query(&format!("UPDATE {} SET doc = ? WHERE id = ?", self.collection))
                    .bind(body)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                ReplaceOutcome::Replaced
            }
            None if upsert => {
                sqlx::query(&format!("INSERT INTO {} (id, doc) VALUES (?, ?)", self.collection))
                    .bind(Uuid::new_v4().to_string())
                    .bind(body)
                    .execute(&mut *tx)
                    .await?;
                ReplaceOutcome::Upserted
            }
            None => ReplaceOutcome::NotFound,
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<u64> {
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.collection,
            where_clause(filter, &mut params)?
        );

        let result = bind_params(sqlx::query(&sql), params)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}
