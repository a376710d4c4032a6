//! Remote D1 access over the Cloudflare REST API.
//!
//! [`D1Proxy`] calls the two D1 query endpoints with a bearer token:
//!
//! | Method | Endpoint | Result page |
//! |--------|----------|-------------|
//! | [`raw_query`](D1Proxy::raw_query) | `POST /accounts/{account}/d1/database/{db}/raw` | `{ results: { columns?, rows? } }` |
//! | [`query`](D1Proxy::query) | `POST /accounts/{account}/d1/database/{db}/query` | `{ results?: [ {..} ] }` |
//!
//! Responses are wrapped in the standard API envelope
//! (`{ success, errors, result: [page] }`); only the first page is used.
//! Missing `rows`/`results` are normalized to empty lists by
//! [`shape_raw`] and [`shape_objects`].
//!
//! [`ProxyD1`] binds a proxy to one database and implements
//! [`D1Session`]. Failed calls are returned to the caller; nothing is
//! retried.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::{D1Session, ObjectRows, ProxyRows, QueryMethod, RawRows};

/// Default Cloudflare API base URL.
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Everything needed to reach one remote D1 database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct D1Credentials {
    pub account_id: String,
    pub token: String,
    pub database_id: String,
}

/// API envelope shared by every Cloudflare endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<Vec<T>>,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// One page of the `/raw` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub results: Option<RawResults>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResults {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub rows: Option<Vec<Vec<Value>>>,
}

/// One page of the `/query` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub results: Option<Vec<Map<String, Value>>>,
}

/// Reshape a raw page: `columns` passes through, `rows` defaults to `[]`.
pub fn shape_raw(page: RawPage) -> RawRows {
    let results = page.results.unwrap_or_default();
    RawRows {
        columns: results.columns,
        rows: results.rows.unwrap_or_default(),
    }
}

/// Reshape a query page into `{ rows }`, defaulting to `[]`.
pub fn shape_objects(page: QueryPage) -> ObjectRows {
    ObjectRows {
        rows: page.results.unwrap_or_default(),
    }
}

/// Authenticated client for the D1 query endpoints of one account.
#[derive(Debug, Clone)]
pub struct D1Proxy {
    client: reqwest::Client,
    account_id: String,
    api_token: String,
    base_url: String,
}

impl D1Proxy {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_id: account_id.into(),
            api_token: api_token.into(),
            base_url: CLOUDFLARE_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API root (e.g. a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Run `sql` through the `/raw` endpoint (positional rows).
    pub async fn raw_query(&self, database_id: &str, sql: &str, params: &[Value]) -> Result<RawRows> {
        let page: RawPage = self.post(database_id, "raw", sql, params).await?;
        Ok(shape_raw(page))
    }

    /// Run `sql` through the `/query` endpoint (rows as objects).
    pub async fn query(&self, database_id: &str, sql: &str, params: &[Value]) -> Result<ObjectRows> {
        let page: QueryPage = self.post(database_id, "query", sql, params).await?;
        Ok(shape_objects(page))
    }

    async fn post<T>(&self, database_id: &str, endpoint: &str, sql: &str, params: &[Value]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!(
            "{}/accounts/{}/d1/database/{}/{}",
            self.base_url, self.account_id, database_id, endpoint
        );

        let body = serde_json::json!({
            "sql": sql,
            "params": params,
        });

        tracing::debug!(database_id, endpoint, "sending D1 query");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("D1 {} request to database {} failed: {}", endpoint, database_id, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!(
                "D1 API error {} for database {}: {}",
                status,
                database_id,
                body_text.chars().take(500).collect::<String>()
            );
        }

        let envelope: Envelope<T> = resp.json().await?;
        first_page(envelope, database_id)
    }
}

fn first_page<T>(envelope: Envelope<T>, database_id: &str) -> Result<T> {
    if !envelope.success {
        let messages = envelope
            .errors
            .iter()
            .map(|e| match e.code {
                Some(code) => format!("[{}] {}", code, e.message),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        bail!("D1 query on database {} failed: {}", database_id, messages);
    }

    envelope
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("D1 API returned no result page for database {}", database_id))
}

/// Remote query session bound to one database.
#[derive(Debug, Clone)]
pub struct ProxyD1 {
    proxy: D1Proxy,
    database_id: String,
}

impl ProxyD1 {
    /// Build a session from a credential bundle against the public API.
    pub fn connect(credentials: &D1Credentials) -> Self {
        Self::connect_to(credentials, CLOUDFLARE_API_BASE)
    }

    /// Build a session from a credential bundle against `base_url`.
    pub fn connect_to(credentials: &D1Credentials, base_url: &str) -> Self {
        Self::new(
            D1Proxy::new(&credentials.account_id, &credentials.token).with_base_url(base_url),
            &credentials.database_id,
        )
    }

    pub fn new(proxy: D1Proxy, database_id: impl Into<String>) -> Self {
        Self {
            proxy,
            database_id: database_id.into(),
        }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }
}

#[async_trait]
impl D1Session for ProxyD1 {
    async fn execute(&self, sql: &str, params: &[Value], method: QueryMethod) -> Result<ProxyRows> {
        if method.wants_objects() {
            let rows = self.proxy.query(&self.database_id, sql, params).await?;
            Ok(ProxyRows::Objects(rows))
        } else {
            let rows = self.proxy.raw_query(&self.database_id, sql, params).await?;
            Ok(ProxyRows::Raw(rows))
        }
    }
}
