//! Translation of JSON filter mappings into SQL predicates
//!
//! A filter mapping such as `{"platform": "ios", "min_build": {"@func": ">=", "@value": 120}}`
//! becomes one predicate per key over a JSON text column. Predicates are meant
//! to be ANDed together by the caller.

use serde_json::Value;
use types::{BundleError, JsonMap, Result};

/// A bound parameter of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl QueryParam {
    /// Convert a scalar JSON value the way `json_extract` reports it
    pub fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(QueryParam::Null),
            // json_extract yields 1/0 for JSON booleans
            Value::Bool(b) => Some(QueryParam::Int(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .map(QueryParam::Int)
                .or_else(|| n.as_f64().map(QueryParam::Real)),
            Value::String(s) => Some(QueryParam::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// SQL fragment with `?` placeholders and the values bound to them, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub values: Vec<QueryParam>,
}

/// Builds predicates over a JSON column from a filter mapping
pub trait PredicateBuilder: Send + Sync {
    fn build(&self, column: &str, filters: &JsonMap) -> Result<Vec<Predicate>>;
}

/// SQLite `json_extract` based predicate builder
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPredicateBuilder;

const FUNC: &str = "@func";

impl JsonPredicateBuilder {
    fn path(key: &str) -> Result<QueryParam> {
        if key.is_empty() || key.contains('"') {
            return Err(BundleError::Validation(format!("invalid filter key: {:?}", key)));
        }
        Ok(QueryParam::Text(format!("$.\"{}\"", key)))
    }

    fn scalar(key: &str, value: &Value) -> Result<QueryParam> {
        QueryParam::from_scalar(value).ok_or_else(|| {
            BundleError::Validation(format!("filter {} expects a scalar value", key))
        })
    }

    fn operand<'a>(key: &str, call: &'a JsonMap, name: &str) -> Result<&'a Value> {
        call.get(name).ok_or_else(|| {
            BundleError::Validation(format!("filter {} is missing {}", key, name))
        })
    }

    fn condition(column: &str, key: &str, value: &Value) -> Result<Predicate> {
        let extract = format!("json_extract({}, ?)", column);
        let path = Self::path(key)?;

        let call = match value {
            Value::Object(call) => call,
            Value::Null => {
                return Ok(Predicate {
                    sql: format!("{} IS NULL", extract),
                    values: vec![path],
                })
            }
            scalar => {
                return Ok(Predicate {
                    sql: format!("{} = ?", extract),
                    values: vec![path, Self::scalar(key, scalar)?],
                })
            }
        };

        let func = call
            .get(FUNC)
            .and_then(Value::as_str)
            .ok_or_else(|| BundleError::Validation(format!("filter {} is missing {}", key, FUNC)))?;

        match func {
            "=" | "!=" | ">" | ">=" | "<" | "<=" => {
                let operand = Self::scalar(key, Self::operand(key, call, "@value")?)?;
                Ok(Predicate {
                    sql: format!("{} {} ?", extract, func),
                    values: vec![path, operand],
                })
            }
            "between" => {
                let a = Self::scalar(key, Self::operand(key, call, "@a")?)?;
                let b = Self::scalar(key, Self::operand(key, call, "@b")?)?;
                Ok(Predicate {
                    sql: format!("{} BETWEEN ? AND ?", extract),
                    values: vec![path, a, b],
                })
            }
            "in" => {
                let items = Self::operand(key, call, "@values")?
                    .as_array()
                    .ok_or_else(|| {
                        BundleError::Validation(format!("filter {} expects @values to be a list", key))
                    })?;

                if items.is_empty() {
                    return Ok(Predicate {
                        sql: "0".to_string(),
                        values: Vec::new(),
                    });
                }

                let mut values = Vec::with_capacity(items.len() + 1);
                values.push(path);
                for item in items {
                    values.push(Self::scalar(key, item)?);
                }
                let placeholders = vec!["?"; items.len()].join(", ");

                Ok(Predicate {
                    sql: format!("{} IN ({})", extract, placeholders),
                    values,
                })
            }
            other => Err(BundleError::Validation(format!(
                "unsupported filter function {} for {}",
                other, key
            ))),
        }
    }
}

impl PredicateBuilder for JsonPredicateBuilder {
    fn build(&self, column: &str, filters: &JsonMap) -> Result<Vec<Predicate>> {
        filters
            .iter()
            .map(|(key, value)| Self::condition(column, key, value))
            .collect()
    }
}
