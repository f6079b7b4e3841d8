//! Bundle metadata storage operations

use crate::database::Database;
use crate::predicate::{JsonPredicateBuilder, PredicateBuilder, QueryParam};
use crate::query::{BundleQuery, Statement, TOTAL_COUNT_COLUMN};
use async_trait::async_trait;
use sqlx::{
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
    FromRow, Pool, Row, Sqlite,
};
use std::sync::Arc;
use tracing::debug;
use types::{
    BundleError, BundleId, BundlePage, BundleRecord, BundleStatus, DatabaseError, GamespaceId,
    JsonMap, NewBundle, Result, VersionId,
};

/// Bundle metadata storage interface
///
/// `Ok(None)` from a lookup means the row is absent; `Err` is always an
/// engine failure.
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// Get a bundle by id within a gamespace
    async fn get_bundle(&self, gamespace_id: GamespaceId, bundle_id: BundleId) -> Result<Option<BundleRecord>>;

    /// Get a bundle by its unique name within (gamespace, version)
    async fn find_bundle(
        &self,
        gamespace_id: GamespaceId,
        version_id: VersionId,
        name: &str,
    ) -> Result<Option<BundleRecord>>;

    /// Insert a CREATED bundle, returning its new id
    async fn insert_bundle(&self, bundle: &NewBundle) -> Result<BundleId>;

    /// Overwrite filters and payload
    async fn update_properties(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        filters: &JsonMap,
        payload: &JsonMap,
    ) -> Result<()>;

    /// Overwrite hash, status and size together
    async fn update_content(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        hash: &str,
        status: BundleStatus,
        size: i64,
    ) -> Result<()>;

    /// Overwrite status
    async fn update_status(&self, gamespace_id: GamespaceId, bundle_id: BundleId, status: BundleStatus) -> Result<()>;

    /// Overwrite status and url together
    async fn update_url(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        status: BundleStatus,
        url: &str,
    ) -> Result<()>;

    /// Delete the metadata row
    async fn delete_bundle(&self, gamespace_id: GamespaceId, bundle_id: BundleId) -> Result<()>;

    /// First bundle matching a query
    async fn query_one(&self, query: &BundleQuery) -> Result<Option<BundleRecord>>;

    /// All bundles matching a query, optionally with the total match count
    async fn query_many(&self, query: &BundleQuery, count: bool) -> Result<BundlePage>;
}

/// Raw `bundles` row
#[derive(Debug, FromRow)]
struct BundleRow {
    bundle_id: i64,
    version_id: i64,
    gamespace_id: i64,
    bundle_name: String,
    bundle_status: String,
    bundle_hash: Option<String>,
    bundle_url: Option<String>,
    bundle_size: Option<i64>,
    bundle_filters: String,
    bundle_payload: String,
    bundle_key: String,
}

impl TryFrom<BundleRow> for BundleRecord {
    type Error = BundleError;

    fn try_from(row: BundleRow) -> Result<Self> {
        let malformed = |message: String| -> BundleError {
            DatabaseError::MalformedRow {
                table: "bundles".to_string(),
                message,
            }
            .into()
        };
        let json = |column: &str, text: &str| -> Result<JsonMap> {
            if text.is_empty() {
                return Ok(JsonMap::new());
            }
            serde_json::from_str(text)
                .map_err(|e| malformed(format!("{} of bundle {}: {}", column, row.bundle_id, e)))
        };

        Ok(BundleRecord {
            bundle_id: row.bundle_id,
            version_id: row.version_id,
            gamespace_id: row.gamespace_id,
            status: row
                .bundle_status
                .parse()
                .map_err(|_| malformed(format!("unknown status {}", row.bundle_status)))?,
            filters: json("bundle_filters", &row.bundle_filters)?,
            payload: json("bundle_payload", &row.bundle_payload)?,
            name: row.bundle_name,
            hash: row.bundle_hash,
            url: row.bundle_url,
            size: row.bundle_size,
            key: row.bundle_key,
        })
    }
}

fn decode(row: &SqliteRow) -> Result<BundleRecord> {
    let row = BundleRow::from_row(row).map_err(|e| DatabaseError::MalformedRow {
        table: "bundles".to_string(),
        message: e.to_string(),
    })?;
    BundleRecord::try_from(row)
}

fn query_failed(context: &str, err: sqlx::Error) -> BundleError {
    DatabaseError::QueryFailed(format!("{}: {}", context, err)).into()
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[QueryParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Real(v) => query.bind(*v),
            QueryParam::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn to_json(map: &JsonMap) -> Result<String> {
    serde_json::to_string(map).map_err(|e| BundleError::Validation(e.to_string()))
}

/// SQLite implementation of bundle storage
#[derive(Clone)]
pub struct SqliteBundleStorage {
    pool: Pool<Sqlite>,
    predicates: Arc<dyn PredicateBuilder>,
}

impl SqliteBundleStorage {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            predicates: Arc::new(JsonPredicateBuilder),
        }
    }

    /// Replace the filter predicate builder
    pub fn with_predicate_builder(mut self, predicates: Arc<dyn PredicateBuilder>) -> Self {
        self.predicates = predicates;
        self
    }

    async fn fetch_all(&self, statement: &Statement, context: &str) -> Result<Vec<SqliteRow>> {
        bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed(context, e))
    }

    async fn fetch_optional(&self, statement: &Statement, context: &str) -> Result<Option<SqliteRow>> {
        bind_params(sqlx::query(&statement.sql), &statement.params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed(context, e))
    }
}

impl std::fmt::Debug for SqliteBundleStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBundleStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl BundleStorage for SqliteBundleStorage {
    async fn get_bundle(&self, gamespace_id: GamespaceId, bundle_id: BundleId) -> Result<Option<BundleRecord>> {
        let row = sqlx::query("SELECT * FROM bundles WHERE bundle_id = ? AND gamespace_id = ?")
            .bind(bundle_id)
            .bind(gamespace_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get bundle", e))?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_bundle(
        &self,
        gamespace_id: GamespaceId,
        version_id: VersionId,
        name: &str,
    ) -> Result<Option<BundleRecord>> {
        let row = sqlx::query(
            "SELECT * FROM bundles WHERE version_id = ? AND bundle_name = ? AND gamespace_id = ?",
        )
        .bind(version_id)
        .bind(name)
        .bind(gamespace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to find bundle", e))?;

        row.as_ref().map(decode).transpose()
    }

    async fn insert_bundle(&self, bundle: &NewBundle) -> Result<BundleId> {
        let result = sqlx::query(
            r#"
            INSERT INTO bundles
                (version_id, gamespace_id, bundle_name, bundle_status,
                 bundle_filters, bundle_payload, bundle_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(bundle.version_id)
        .bind(bundle.gamespace_id)
        .bind(&bundle.name)
        .bind(BundleStatus::Created.as_str())
        .bind(to_json(&bundle.filters)?)
        .bind(to_json(&bundle.payload)?)
        .bind(&bundle.key)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false);
            if duplicate {
                BundleError::Conflict("Bundle with such name already exists".to_string())
            } else {
                query_failed("Failed to create bundle", e)
            }
        })?;

        Ok(result.last_insert_rowid())
    }

    async fn update_properties(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        filters: &JsonMap,
        payload: &JsonMap,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE bundles SET bundle_filters = ?, bundle_payload = ? WHERE bundle_id = ? AND gamespace_id = ?",
        )
        .bind(to_json(filters)?)
        .bind(to_json(payload)?)
        .bind(bundle_id)
        .bind(gamespace_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update bundle", e))?;
        Ok(())
    }

    async fn update_content(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        hash: &str,
        status: BundleStatus,
        size: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE bundles SET bundle_hash = ?, bundle_status = ?, bundle_size = ? WHERE bundle_id = ? AND gamespace_id = ?",
        )
        .bind(hash)
        .bind(status.as_str())
        .bind(size)
        .bind(bundle_id)
        .bind(gamespace_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update bundle", e))?;
        Ok(())
    }

    async fn update_status(&self, gamespace_id: GamespaceId, bundle_id: BundleId, status: BundleStatus) -> Result<()> {
        sqlx::query("UPDATE bundles SET bundle_status = ? WHERE bundle_id = ? AND gamespace_id = ?")
            .bind(status.as_str())
            .bind(bundle_id)
            .bind(gamespace_id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to update bundle status", e))?;
        Ok(())
    }

    async fn update_url(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        status: BundleStatus,
        url: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE bundles SET bundle_status = ?, bundle_url = ? WHERE bundle_id = ? AND gamespace_id = ?",
        )
        .bind(status.as_str())
        .bind(url)
        .bind(bundle_id)
        .bind(gamespace_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update bundle status", e))?;
        Ok(())
    }

    async fn delete_bundle(&self, gamespace_id: GamespaceId, bundle_id: BundleId) -> Result<()> {
        sqlx::query("DELETE FROM bundles WHERE bundle_id = ? AND gamespace_id = ?")
            .bind(bundle_id)
            .bind(gamespace_id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to delete bundle", e))?;
        Ok(())
    }

    async fn query_one(&self, query: &BundleQuery) -> Result<Option<BundleRecord>> {
        let statement = query.select(self.predicates.as_ref(), false)?;
        let row = self.fetch_optional(&statement, "Failed to get bundle").await?;
        row.as_ref().map(decode).transpose()
    }

    async fn query_many(&self, query: &BundleQuery, count: bool) -> Result<BundlePage> {
        let statement = query.select(self.predicates.as_ref(), count)?;
        let rows = self.fetch_all(&statement, "Failed to query bundles").await?;

        let total = if !count {
            None
        } else if let Some(first) = rows.first() {
            let total: i64 = first
                .try_get(TOTAL_COUNT_COLUMN)
                .map_err(|e| query_failed("Failed to count bundles", e))?;
            Some(total as u64)
        } else if query.offset > 0 && query.is_paginated() {
            // An empty page past the end carries no window count
            debug!(offset = query.offset, "Empty page, counting bundles separately");
            let statement = query.count(self.predicates.as_ref())?;
            let row = self
                .fetch_optional(&statement, "Failed to count bundles")
                .await?
                .ok_or_else(|| BundleError::OperationFailed("Failed to count bundles: no result".to_string()))?;
            let total: i64 = row
                .try_get(TOTAL_COUNT_COLUMN)
                .map_err(|e| query_failed("Failed to count bundles", e))?;
            Some(total as u64)
        } else {
            Some(0)
        };

        let items = rows.iter().map(decode).collect::<Result<Vec<_>>>()?;
        Ok(BundlePage { items, total })
    }
}
