//! Filtered, paginated bundle lookups scoped to a gamespace and version

use crate::predicate::{PredicateBuilder, QueryParam};
use serde_json::Value;
use types::{BundleStatus, GamespaceId, JsonMap, Result, VersionId};

/// Column holding the JSON filter tags
pub const FILTERS_COLUMN: &str = "bundle_filters";

/// Column carrying the pagination-independent match count
pub const TOTAL_COUNT_COLUMN: &str = "total_count";

/// Lookup of bundles within one (gamespace, version) scope
///
/// Results are always ordered by descending bundle id. A zero `limit`
/// disables pagination entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleQuery {
    pub gamespace_id: GamespaceId,
    pub version_id: VersionId,
    pub status: Option<BundleStatus>,
    pub filters: Option<JsonMap>,
    pub offset: u64,
    pub limit: u64,
}

/// SQL text with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl BundleQuery {
    pub fn new(gamespace_id: GamespaceId, version_id: VersionId) -> Self {
        Self {
            gamespace_id,
            version_id,
            status: None,
            filters: None,
            offset: 0,
            limit: 0,
        }
    }

    pub fn with_status(mut self, status: BundleStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_filters(mut self, filters: JsonMap) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.limit > 0
    }

    /// WHERE conditions and their parameters
    fn conditions(&self, predicates: &dyn PredicateBuilder) -> Result<(Vec<String>, Vec<QueryParam>)> {
        let mut conditions = vec![
            "gamespace_id = ?".to_string(),
            "version_id = ?".to_string(),
        ];
        let mut params = vec![
            QueryParam::Int(self.gamespace_id),
            QueryParam::Int(self.version_id),
        ];

        if let Some(status) = self.status {
            conditions.push("bundle_status = ?".to_string());
            params.push(QueryParam::Text(status.as_str().to_string()));
        }

        if let Some(filters) = self.filters.as_ref().filter(|f| !f.is_empty()) {
            for predicate in predicates.build(FILTERS_COLUMN, filters)? {
                conditions.push(format!("({})", predicate.sql));
                params.extend(predicate.values);
            }
        }

        Ok((conditions, params))
    }

    /// Row selection, with the total match count as an extra column when `count` is set
    pub fn select(&self, predicates: &dyn PredicateBuilder, count: bool) -> Result<Statement> {
        let (conditions, mut params) = self.conditions(predicates)?;

        let mut sql = format!(
            "SELECT *{} FROM bundles WHERE {} ORDER BY bundle_id DESC",
            if count {
                format!(", COUNT(*) OVER () AS {}", TOTAL_COUNT_COLUMN)
            } else {
                String::new()
            },
            conditions.join(" AND ")
        );

        if self.is_paginated() {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(QueryParam::Int(clamp(self.limit)));
            params.push(QueryParam::Int(clamp(self.offset)));
        }

        Ok(Statement { sql, params })
    }

    /// Plain count of all matches, ignoring pagination
    pub fn count(&self, predicates: &dyn PredicateBuilder) -> Result<Statement> {
        let (conditions, params) = self.conditions(predicates)?;
        Ok(Statement {
            sql: format!(
                "SELECT COUNT(*) AS {} FROM bundles WHERE {}",
                TOTAL_COUNT_COLUMN,
                conditions.join(" AND ")
            ),
            params,
        })
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Parse a filter argument given as JSON text
pub fn parse_filters(raw: &str) -> Result<JsonMap> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| types::BundleError::Validation(format!("filters are not valid JSON: {}", e)))?;
    types::ensure_mapping("filters", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::JsonPredicateBuilder;
    use serde_json::json;

    #[test]
    fn test_scope_only() {
        let statement = BundleQuery::new(1, 2).select(&JsonPredicateBuilder, false).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT * FROM bundles WHERE gamespace_id = ? AND version_id = ? ORDER BY bundle_id DESC"
        );
        assert_eq!(statement.params, vec![QueryParam::Int(1), QueryParam::Int(2)]);
    }

    #[test]
    fn test_status_filters_and_page() {
        let filters = json!({"platform": "android"}).as_object().cloned().unwrap();
        let statement = BundleQuery::new(1, 2)
            .with_status(BundleStatus::Delivered)
            .with_filters(filters)
            .with_page(10, 5)
            .select(&JsonPredicateBuilder, true)
            .unwrap();

        assert!(statement.sql.starts_with("SELECT *, COUNT(*) OVER () AS total_count FROM bundles"));
        assert!(statement.sql.contains("AND bundle_status = ?"));
        assert!(statement.sql.contains("AND (json_extract(bundle_filters, ?) = ?)"));
        assert!(statement.sql.ends_with("ORDER BY bundle_id DESC LIMIT ? OFFSET ?"));
        assert_eq!(statement.params.len(), 7);
        assert_eq!(statement.params[2], QueryParam::Text("DELIVERED".to_string()));
        assert_eq!(statement.params[5..], [QueryParam::Int(5), QueryParam::Int(10)]);
    }

    #[test]
    fn test_zero_limit_disables_pagination() {
        let statement = BundleQuery::new(1, 2)
            .with_page(20, 0)
            .select(&JsonPredicateBuilder, false)
            .unwrap();
        assert!(!statement.sql.contains("LIMIT"));
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn test_empty_filters_are_ignored() {
        let statement = BundleQuery::new(1, 2)
            .with_filters(JsonMap::new())
            .count(&JsonPredicateBuilder)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) AS total_count FROM bundles WHERE gamespace_id = ? AND version_id = ?"
        );
    }

    #[test]
    fn test_parse_filters() {
        assert!(parse_filters(r#"{"a": 1}"#).is_ok());
        assert!(parse_filters("[1]").is_err());
        assert!(parse_filters("{").is_err());
    }
}
