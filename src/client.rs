//! HTTP gateway for the Site Recovery / Migrate management API.
//!
//! Thin and stateless beyond the cached token: translates HTTP status and
//! payload into typed results or domain errors. HTTP 404 and the known
//! malformed-filter response both collapse to an empty result; any other
//! non-2xx becomes a `RemoteApi` error carrying status and body. No retries
//! happen at this layer; retry policy belongs to the callers.

use std::sync::RwLock;
use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::auth::{self, Credentials, Token};
use crate::error::{MigrateError, MigrateResult};
use crate::remote::{ArmList, OperationHandle, ARM_BASE};

/// Gateway to the remote management API.
pub struct SrsClient {
    http: Client,
    credentials: RwLock<Option<Credentials>>,
    token: RwLock<Option<Token>>,
}

impl SrsClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            credentials: RwLock::new(None),
            token: RwLock::new(None),
        }
    }

    // ── Credential / token state ─────────────────────────────────────

    pub fn set_credentials(&self, creds: Credentials) {
        *self.credentials.write().expect("credentials lock") = Some(creds);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().expect("credentials lock").clone()
    }

    pub fn set_token(&self, token: Token) {
        *self.token.write().expect("token lock") = Some(token);
    }

    pub fn clear_token(&self) {
        *self.token.write().expect("token lock") = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .expect("token lock")
            .as_ref()
            .map(Token::is_usable)
            .unwrap_or(false)
    }

    pub fn subscription_id(&self) -> MigrateResult<String> {
        self.credentials()
            .map(|c| c.subscription_id)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MigrateError::auth("subscription id not configured"))
    }

    pub fn resource_group(&self) -> MigrateResult<String> {
        self.credentials()
            .map(|c| c.resource_group)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MigrateError::configuration("resource group not configured"))
    }

    /// Acquire (or reuse) a bearer token. Fails with an `Auth` error when no
    /// valid credential or token can be obtained.
    async fn ensure_token(&self) -> MigrateResult<Token> {
        if let Some(token) = self.token.read().expect("token lock").clone() {
            if token.is_usable() {
                return Ok(token);
            }
        }
        let creds = self
            .credentials()
            .filter(Credentials::is_complete)
            .ok_or_else(|| MigrateError::auth("credentials not configured"))?;
        let token = auth::acquire_token(&self.http, &creds).await?;
        self.set_token(token.clone());
        Ok(token)
    }

    async fn auth_headers(&self) -> MigrateResult<HeaderMap> {
        let token = self.ensure_token().await?;
        let mut headers = HeaderMap::new();
        let val = format!("Bearer {}", token.access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&val)
                .map_err(|e| MigrateError::auth(format!("header value: {e}")))?,
        );
        Ok(headers)
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a management URL: `https://management.azure.com{path}`.
    pub fn arm_url(path: &str) -> String {
        format!("{}{}", ARM_BASE, path)
    }

    /// Subscription-scoped URL.
    pub fn subscription_url(&self, suffix: &str) -> MigrateResult<String> {
        let sub = self.subscription_id()?;
        Ok(format!("{}/subscriptions/{}{}", ARM_BASE, sub, suffix))
    }

    /// Vault-scoped Site Recovery URL.
    pub fn vault_url(&self, vault: &str, suffix: &str) -> MigrateResult<String> {
        let sub = self.subscription_id()?;
        let rg = self.resource_group()?;
        Ok(format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.RecoveryServices/vaults/{}{}",
            ARM_BASE, sub, rg, vault, suffix
        ))
    }

    // ── Core call ────────────────────────────────────────────────────

    /// Issue one authenticated call. `Ok(None)` for 404 and for the known
    /// malformed-filter response; `Ok(Some(json))` otherwise on success.
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> MigrateResult<Option<Value>> {
        let resp = self.send(method, url, body).await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            debug!("{} → 404, treated as empty", url);
            return Ok(None);
        }
        if status.is_success() {
            let text = resp
                .text()
                .await
                .map_err(|e| MigrateError::network(format!("{e}")))?;
            if text.is_empty() {
                return Ok(None);
            }
            return serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| MigrateError::parse(format!("response body: {e}")));
        }

        let body_text = resp.text().await.unwrap_or_default();
        if is_malformed_filter(status.as_u16(), &body_text) {
            warn!("{} → malformed filter response, treated as empty", url);
            return Ok(None);
        }
        Err(MigrateError::remote(status.as_u16(), body_text))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> MigrateResult<reqwest::Response> {
        let headers = self.auth_headers().await?;
        debug!("{} {}", method, url);
        let mut req = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .map_err(|e| MigrateError::network(format!("{e}")))
    }

    // ── Typed convenience verbs ──────────────────────────────────────

    /// GET that treats 404 / malformed-filter as `None`.
    pub async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> MigrateResult<Option<T>> {
        match self.call(Method::GET, url, None).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| MigrateError::parse(format!("response body: {e}"))),
            None => Ok(None),
        }
    }

    /// GET that fails with `NotFound` when the resource is absent. Reserved
    /// for internal callers that need to distinguish absence.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> MigrateResult<T> {
        self.get_optional(url)
            .await?
            .ok_or_else(|| MigrateError::not_found(url.to_string()))
    }

    /// Follow `nextLink` to collect all items from a paginated list
    /// endpoint. An absent endpoint yields an empty list.
    pub async fn get_all_pages<T: serde::de::DeserializeOwned + Default>(
        &self,
        initial_url: &str,
    ) -> MigrateResult<Vec<T>> {
        let mut all: Vec<T> = Vec::new();
        let mut url = initial_url.to_string();
        loop {
            let page: Option<ArmList<T>> = self.get_optional(&url).await?;
            let Some(page) = page else { break };
            all.extend(page.value);
            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }
        Ok(all)
    }

    /// PUT accepting 200/201/202; a 202 yields the async-operation handle.
    pub async fn put_accepted<B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> MigrateResult<OperationHandle> {
        let value = serde_json::to_value(body)
            .map_err(|e| MigrateError::parse(format!("request body: {e}")))?;
        self.accepted(Method::PUT, url, Some(&value)).await
    }

    /// POST accepting 200/202; a 202 yields the async-operation handle.
    pub async fn post_accepted<B: serde::Serialize>(
        &self,
        url: &str,
        body: Option<&B>,
    ) -> MigrateResult<OperationHandle> {
        let value = match body {
            Some(b) => Some(
                serde_json::to_value(b)
                    .map_err(|e| MigrateError::parse(format!("request body: {e}")))?,
            ),
            None => None,
        };
        self.accepted(Method::POST, url, value.as_ref()).await
    }

    /// DELETE accepting 200/202/204.
    pub async fn delete_accepted(&self, url: &str) -> MigrateResult<OperationHandle> {
        self.accepted(Method::DELETE, url, None).await
    }

    async fn accepted(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> MigrateResult<OperationHandle> {
        let resp = self.send(method, url, body).await?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(MigrateError::remote(status.as_u16(), body_text));
        }

        let operation_url = operation_location(resp.headers());
        let text = resp.text().await.unwrap_or_default();
        let body = if text.is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };
        Ok(OperationHandle {
            operation_url,
            body,
        })
    }
}

impl Default for SrsClient {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Extract the long-running-operation status URL from a 202 response.
/// Header values that do not parse as absolute URLs are discarded.
fn operation_location(headers: &HeaderMap) -> Option<String> {
    for key in ["azure-asyncoperation", "location"] {
        if let Some(value) = headers.get(key).and_then(|v| v.to_str().ok()) {
            if url::Url::parse(value).is_ok() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// The remote service answers certain list filters with a 400 whose error
/// code names an invalid `$filter`; these are transient vocabulary
/// mismatches, not caller errors.
fn is_malformed_filter(status: u16, body: &str) -> bool {
    if status != 400 {
        return false;
    }
    let lower = body.to_ascii_lowercase();
    lower.contains("invalidfilter")
        || lower.contains("invalid filter")
        || lower.contains("$filter")
}

// ─── Tests ──────────────────────────────────────────────────────────
