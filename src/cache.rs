//! HTTP cache engine (C11): maps a request fingerprint (method + URL) to a
//! stored response, applying the same storability/TTL rules a shared HTTP
//! cache would.

use crate::clock::Clock;
use crate::storage::{Storage, StorageError, StoredMeta};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CacheResponse {
    pub status: u16,
    /// Multi-valued headers, preserving insertion order and duplicates.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    method: String,
    status: u16,
    headers: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct CacheControlDirectives {
    no_store: bool,
    private_fields: Vec<String>,
    max_age: Option<i64>,
    s_maxage: Option<i64>,
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_cache_control(headers: &[(String, String)]) -> CacheControlDirectives {
    let mut out = CacheControlDirectives::default();
    for (k, v) in headers {
        if !k.eq_ignore_ascii_case("cache-control") {
            continue;
        }
        for directive in v.split(',') {
            let directive = directive.trim();
            let (name, value) = match directive.split_once('=') {
                Some((n, val)) => (n.trim(), Some(val.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => out.no_store = true,
                "private" => {
                    if let Some(v) = value {
                        out.private_fields.extend(v.split(',').map(|s| s.trim().to_ascii_lowercase()));
                    }
                }
                "max-age" => out.max_age = value.and_then(|v| v.parse().ok()),
                "s-maxage" => out.s_maxage = value.and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
    }
    out
}

/// Remove only the `private=set-cookie` token from a `Cache-Control` header,
/// leaving the rest of its directives and the `Set-Cookie` header intact.
fn strip_private_set_cookie_token(mut headers: Vec<(String, String)>) -> Vec<(String, String)> {
    for (k, v) in headers.iter_mut() {
        if !k.eq_ignore_ascii_case("cache-control") {
            continue;
        }
        let kept: Vec<&str> = v
            .split(',')
            .map(str::trim)
            .filter(|directive| {
                let name = directive.split('=').next().unwrap_or("").trim();
                let is_private_set_cookie =
                    name.eq_ignore_ascii_case("private") && directive.to_ascii_lowercase().contains("set-cookie");
                !is_private_set_cookie
            })
            .collect();
        *v = kept.join(", ");
    }
    headers
}

/// Computes a freshness lifetime in whole seconds under `shared: true`
/// semantics (s-maxage takes priority over max-age), or `None` if the
/// response carries no freshness information or is marked `no-store`.
fn compute_ttl_secs(headers: &[(String, String)], cc: &CacheControlDirectives, now_ms: i64) -> Option<i64> {
    if cc.no_store {
        return None;
    }
    if let Some(s) = cc.s_maxage {
        return Some(s);
    }
    if let Some(m) = cc.max_age {
        return Some(m);
    }
    let expires_raw = header_value(headers, "expires")?;
    let expires = chrono::DateTime::parse_from_rfc2822(expires_raw).ok()?;
    let date = header_value(headers, "date")
        .and_then(|d| chrono::DateTime::parse_from_rfc2822(d).ok())
        .unwrap_or_else(|| Utc.timestamp_millis_opt(now_ms).unwrap().into());
    Some(expires.timestamp() - date.timestamp())
}

fn sanitize_url(url: &str) -> String {
    crate::storage::sanitize_key(url).unwrap_or_else(|| "_".to_string())
}

/// A single HTTP cache instance, backed by one [`Storage`] namespace.
pub struct Cache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub async fn put(&self, request: &CacheRequest, response: CacheResponse) -> Result<(), CacheError> {
        if request.method != "GET" {
            return Ok(());
        }

        let cc = parse_cache_control(&response.headers);
        let ttl = match compute_ttl_secs(&response.headers, &cc, self.clock.now_ms()) {
            Some(ttl) if ttl > 0 => ttl,
            _ => return Ok(()),
        };

        let mut headers = response.headers;

        if cc.private_fields.iter().any(|f| f == "set-cookie") {
            headers = strip_private_set_cookie_token(headers);
        } else {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("set-cookie"));
        }

        let entry = StoredEntry {
            method: request.method.clone(),
            status: response.status,
            headers,
        };

        self.storage
            .put(
                &sanitize_url(&request.url),
                response.body,
                StoredMeta {
                    expiration: Some(self.clock.now_secs() + ttl),
                    metadata: Some(serde_json::to_value(entry)?),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn match_request(
        &self,
        request: &CacheRequest,
        ignore_method: bool,
    ) -> Result<Option<CacheResponse>, CacheError> {
        if !ignore_method && request.method != "GET" {
            return Ok(None);
        }
        let stored = match self.storage.get(&sanitize_url(&request.url)).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        let metadata = match stored.meta.metadata {
            Some(m) => m,
            None => return Ok(None),
        };
        let entry: StoredEntry = serde_json::from_value(metadata)?;
        if !ignore_method && entry.method != request.method {
            return Ok(None);
        }

        let mut headers = entry.headers;
        headers.push(("CF-Cache-Status".to_string(), "HIT".to_string()));

        Ok(Some(CacheResponse {
            status: entry.status,
            headers,
            body: stored.bytes,
        }))
    }

    pub async fn delete(&self, request: &CacheRequest, ignore_method: bool) -> Result<bool, CacheError> {
        if !ignore_method && request.method != "GET" {
            return Ok(false);
        }
        Ok(self.storage.delete(&sanitize_url(&request.url)).await?)
    }
}
