//! HTTP plumbing for a Supabase project: object uploads into a storage
//! bucket and PostgREST-style table reads and inserts.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use log::{info, warn};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

pub const STORAGE_TIMEOUT: Duration = Duration::from_secs(300);
pub const REST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 500;

/// True when `url` points at this machine.
pub fn is_loopback(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    match parsed.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

/// Environment proxies are ignored for loopback targets; a local intercepting
/// proxy mangles request bodies otherwise.
pub fn http_client(base_url: &str, timeout: Duration) -> reqwest::Result<Client> {
    let mut builder = Client::builder().timeout(timeout);
    if is_loopback(base_url) {
        builder = builder.no_proxy();
    }
    builder.build()
}

pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

/// Storage answers a duplicate either with a real 409 or with a 400 whose
/// JSON body carries `"statusCode": "409"`.
fn is_conflict(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::CONFLICT {
        return true;
    }
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    match serde_json::from_str::<Value>(body) {
        Ok(json) => match &json["statusCode"] {
            Value::String(code) => code == "409",
            Value::Number(code) => code.as_u64() == Some(409),
            _ => false,
        },
        Err(_) => false,
    }
}

#[derive(Clone, Debug)]
pub struct SupabaseStorage {
    http: Client,
    base_url: String,
    key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, key: &str, bucket: &str) -> Result<Self, StoreError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() || key.trim().is_empty() {
            return Err(StoreError::Unconfigured(
                "SUPABASE_URL and SUPABASE_KEY must be set".to_string(),
            ));
        }
        if bucket.trim().is_empty() {
            return Err(StoreError::Unconfigured(
                "Supabase bucket name is empty".to_string(),
            ));
        }
        let http = http_client(base_url, STORAGE_TIMEOUT)
            .map_err(|e| StoreError::Unconfigured(format!("HTTP client: {}", e)))?;
        Ok(SupabaseStorage {
            http,
            base_url: base_url.to_string(),
            key: key.trim().to_string(),
            bucket: bucket.to_string(),
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    /// Project-relative public path, the form stored in catalog rows.
    pub fn public_path(&self, key: &str) -> String {
        format!("/storage/v1/object/public/{}/{}", self.bucket, key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}{}", self.base_url, self.public_path(key))
    }

    /// Uploads with upsert semantics; a conflict answer is retried once as an
    /// explicit update of the existing object.
    pub async fn upload(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let url = self.object_url(key);
        let size = data.len();
        let data = Bytes::from(data);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.key)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(data.clone())
            .send()
            .await
            .map_err(|e| StoreError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!("Supabase: uploaded {} bytes to {}/{}", size, self.bucket, key);
            return Ok(self.public_url(key));
        }

        let body = response.text().await.unwrap_or_default();
        if !is_conflict(status, &body) {
            return Err(StoreError::RemoteRejected {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        warn!(
            "Supabase: {}/{} already exists, updating in place",
            self.bucket, key
        );
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.key)
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| StoreError::TransportFailure(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            info!("Supabase: updated {}/{} ({} bytes)", self.bucket, key, size);
            Ok(self.public_url(key))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::RemoteRejected {
                status: status.as_u16(),
                body: truncate(&body),
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Supabase is not configured: {0}")]
    Unconfigured(String),
    #[error("request to Supabase failed: {0}")]
    TransportFailure(#[from] reqwest::Error),
    #[error("Supabase rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response from Supabase: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// One read against a table: the columns, an optional equality filter, an
/// optional ordering and an optional row limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Option<(String, String)>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl TableQuery {
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if !self.columns.is_empty() {
            pairs.push(("select".to_string(), self.columns.join(",")));
        }
        if let Some((column, value)) = &self.filter {
            pairs.push((column.clone(), format!("eq.{}", value)));
        }
        if let Some(order) = &self.order {
            let direction = if order.descending { "desc" } else { "asc" };
            pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }

    pub fn query_string(&self) -> Result<String, CatalogError> {
        serde_urlencoded::to_string(self.query_pairs()).map_err(|e| CatalogError::Decode(e.to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct RestClient {
    http: Client,
    base_url: String,
    key: String,
}

impl RestClient {
    pub fn new(base_url: &str, key: &str) -> Result<Self, CatalogError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() || key.trim().is_empty() {
            return Err(CatalogError::Unconfigured(
                "SUPABASE_URL and SUPABASE_KEY must be set".to_string(),
            ));
        }
        Ok(RestClient {
            http: http_client(base_url, REST_TIMEOUT)?,
            base_url: base_url.to_string(),
            key: key.trim().to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    pub async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, CatalogError> {
        let mut url = self.table_url(&query.table);
        let query_string = query.query_string()?;
        if !query_string.is_empty() {
            url = format!("{}?{}", url, query_string);
        }
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Content-Type", "application/json")
            .send()
            .await?;
        Self::rows(response).await
    }

    /// Inserts one row and returns its stored representation.
    pub async fn insert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        row: &T,
    ) -> Result<Vec<Value>, CatalogError> {
        let response = self
            .http
            .post(self.table_url(table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        Self::rows(response).await
    }

    async fn rows(response: reqwest::Response) -> Result<Vec<Value>, CatalogError> {
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Rejected {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }
        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            Value::Object(row) => Ok(vec![Value::Object(row)]),
            other => Err(CatalogError::Decode(format!("expected rows, got {}", other))),
        }
    }
}
