//! Uniform query interface over local and remote D1 databases.
//!
//! Both the local SQLite session ([`LocalD1`](crate::db::LocalD1)) and the
//! remote HTTP session ([`ProxyD1`](crate::proxy::ProxyD1)) implement
//! [`D1Session`], so work functions passed to
//! [`D1Helper::run_local`](crate::helper::D1Helper::run_local) and
//! [`D1Helper::run_remote`](crate::helper::D1Helper::run_remote) can be
//! written once.
//!
//! # Row shapes
//!
//! A query builder issuing SQL through a proxy expects one of two shapes,
//! chosen by the query method:
//!
//! | Method | Shape |
//! |--------|-------|
//! | `get` | [`ProxyRows::Objects`]: `{ rows: [{col: value}] }` |
//! | `all`, `run`, `values` | [`ProxyRows::Raw`]: `{ columns?, rows: [[value]] }` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// How the caller intends to consume a statement's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMethod {
    Run,
    #[default]
    All,
    Values,
    Get,
}

impl QueryMethod {
    /// Whether this method is answered in object mode.
    pub fn wants_objects(self) -> bool {
        self == QueryMethod::Get
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryMethod::Run => "run",
            QueryMethod::All => "all",
            QueryMethod::Values => "values",
            QueryMethod::Get => "get",
        }
    }
}

impl fmt::Display for QueryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(QueryMethod::Run),
            "all" => Ok(QueryMethod::All),
            "values" => Ok(QueryMethod::Values),
            "get" => Ok(QueryMethod::Get),
            other => bail!(
                "Unknown query method: '{}'. Must be run, all, values, or get.",
                other
            ),
        }
    }
}

/// Raw-mode result: column names plus positional rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawRows {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

/// Object-mode result: one JSON object per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectRows {
    pub rows: Vec<Map<String, Value>>,
}

/// Result of [`D1Session::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProxyRows {
    Raw(RawRows),
    Objects(ObjectRows),
}

impl ProxyRows {
    /// Number of rows regardless of shape.
    pub fn len(&self) -> usize {
        match self {
            ProxyRows::Raw(r) => r.rows.len(),
            ProxyRows::Objects(o) => o.rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows as JSON objects. Raw rows are zipped with their column names;
    /// positional rows without column names are keyed by index.
    pub fn into_objects(self) -> Vec<Map<String, Value>> {
        match self {
            ProxyRows::Objects(o) => o.rows,
            ProxyRows::Raw(r) => {
                let columns = r.columns.unwrap_or_default();
                r.rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .enumerate()
                            .map(|(i, v)| {
                                let key = columns.get(i).cloned().unwrap_or_else(|| i.to_string());
                                (key, v)
                            })
                            .collect()
                    })
                    .collect()
            }
        }
    }
}

/// A connected query interface to one D1 database.
#[async_trait]
pub trait D1Session: Send + Sync {
    /// Execute `sql` with positional `params`, shaping the result for `method`.
    async fn execute(&self, sql: &str, params: &[Value], method: QueryMethod) -> Result<ProxyRows>;

    async fn all(&self, sql: &str, params: &[Value]) -> Result<ProxyRows> {
        self.execute(sql, params, QueryMethod::All).await
    }

    async fn get(&self, sql: &str, params: &[Value]) -> Result<ProxyRows> {
        self.execute(sql, params, QueryMethod::Get).await
    }

    async fn run(&self, sql: &str, params: &[Value]) -> Result<ProxyRows> {
        self.execute(sql, params, QueryMethod::Run).await
    }

    async fn values(&self, sql: &str, params: &[Value]) -> Result<ProxyRows> {
        self.execute(sql, params, QueryMethod::Values).await
    }
}
