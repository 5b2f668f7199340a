//! Hosted portal access: an ArcGIS-REST style HTTP client and an in-memory
//! portal used for offline snapshots and tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use gcat_core::{ItemUpdate, PortalItem};
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, warn};

use crate::{classify_response, is_transient_transport_error, BackoffPolicy, ResponseClass};

/// Item types enumerated when listing the portal's services.
const SERVICE_ITEM_TYPES: [&str; 2] = ["Feature Service", "Map Service"];

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("portal connection rejected: {0}")]
    InvalidConnection(String),
    #[error("portal error {code}: {message}")]
    Portal { code: i64, message: String },
    #[error("item `{0}` not found on portal")]
    ItemNotFound(String),
    #[error("unexpected portal response: {0}")]
    Decode(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// Errors that make every later portal call pointless.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ServiceError::InvalidConnection(_))
    }
}

/// Read/write contract the toolkit needs from the hosted portal.
pub trait RemoteService {
    /// `Ok(None)` when the id does not resolve to an item.
    fn get_item(&self, item_id: &str) -> Result<Option<PortalItem>, ServiceError>;

    fn update_item(&self, item_id: &str, update: &ItemUpdate) -> Result<(), ServiceError>;

    /// Every hosted service item visible to the connection.
    fn search_items(&self) -> Result<Vec<PortalItem>, ServiceError>;

    fn item_url(&self, item_id: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct PortalClientConfig {
    pub portal_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub page_size: usize,
    pub backoff: BackoffPolicy,
}

impl Default for PortalClientConfig {
    fn default() -> Self {
        Self {
            portal_url: "https://www.arcgis.com".to_string(),
            token: None,
            timeout: Duration::from_secs(20),
            user_agent: None,
            page_size: 100,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct PortalClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    page_size: usize,
    backoff: BackoffPolicy,
}

impl PortalClient {
    pub fn new(config: PortalClientConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building portal http client")?;
        Ok(Self {
            client,
            base_url: config.portal_url.trim_end_matches('/').to_string(),
            token: config.token,
            page_size: config.page_size.clamp(1, 100),
            backoff: config.backoff,
        })
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.query(&[("f", "json")]);
        match &self.token {
            Some(token) => request.query(&[("token", token.as_str())]),
            None => request,
        }
    }

    /// Send with retry on throttling, server faults and transient transport
    /// errors. Refused credentials fail at once.
    fn send_json(&self, build: impl Fn() -> RequestBuilder) -> Result<JsonValue, ServiceError> {
        let mut attempt = 0;
        loop {
            let failure = match self.with_auth(build()).send() {
                Ok(resp) => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    match classify_response(status) {
                        ResponseClass::Success => {
                            return resp.json::<JsonValue>().map_err(ServiceError::Request)
                        }
                        ResponseClass::Rejected => {
                            return Err(ServiceError::InvalidConnection(format!(
                                "http {} for {url}",
                                status.as_u16()
                            )))
                        }
                        ResponseClass::Fatal => {
                            return Err(ServiceError::HttpStatus {
                                status: status.as_u16(),
                                url,
                            })
                        }
                        ResponseClass::Transient => ServiceError::HttpStatus {
                            status: status.as_u16(),
                            url,
                        },
                    }
                }
                Err(err) if is_transient_transport_error(&err) => ServiceError::Request(err),
                Err(err) => return Err(ServiceError::Request(err)),
            };

            let Some(delay) = self.backoff.next_delay(attempt) else {
                return Err(failure);
            };
            warn!(attempt, error = %failure, ?delay, "portal request failed, retrying");
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}

/// Portal error payloads arrive with HTTP 200 as `{"error": {"code", "message"}}`.
fn portal_error(body: &JsonValue) -> Option<(i64, String)> {
    let error = body.get("error")?;
    let code = error.get("code").and_then(JsonValue::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or("unknown portal error")
        .to_string();
    Some((code, message))
}

fn is_token_error(code: i64) -> bool {
    matches!(code, 401 | 498 | 499)
}

fn is_plausible_item_id(item_id: &str) -> bool {
    !item_id.is_empty() && item_id.chars().all(|c| c.is_ascii_alphanumeric())
}

impl RemoteService for PortalClient {
    fn get_item(&self, item_id: &str) -> Result<Option<PortalItem>, ServiceError> {
        if !is_plausible_item_id(item_id) {
            debug!(item_id, "not a portal item id; treating as unresolved");
            return Ok(None);
        }
        let span = info_span!("portal_get_item", item_id);
        let _guard = span.enter();

        let url = format!("{}/sharing/rest/content/items/{item_id}", self.base_url);
        let body = self.send_json(|| self.client.get(&url))?;

        if let Some((code, message)) = portal_error(&body) {
            if is_token_error(code) {
                return Err(ServiceError::InvalidConnection(message));
            }
            if matches!(code, 400 | 403 | 404) {
                return Ok(None);
            }
            return Err(ServiceError::Portal { code, message });
        }

        serde_json::from_value(body)
            .map(Some)
            .map_err(|e| ServiceError::Decode(format!("item {item_id}: {e}")))
    }

    fn update_item(&self, item_id: &str, update: &ItemUpdate) -> Result<(), ServiceError> {
        let item = self
            .get_item(item_id)?
            .ok_or_else(|| ServiceError::ItemNotFound(item_id.to_string()))?;
        let owner = item
            .owner
            .ok_or_else(|| ServiceError::Decode(format!("item {item_id} has no owner")))?;

        let mut form: Vec<(&str, String)> = Vec::new();
        if let Some(v) = &update.description {
            form.push(("description", v.clone()));
        }
        if let Some(v) = &update.snippet {
            form.push(("snippet", v.clone()));
        }
        if let Some(v) = &update.tags {
            form.push(("tags", v.join(",")));
        }
        if let Some(v) = &update.access_information {
            form.push(("accessInformation", v.clone()));
        }
        if let Some(v) = &update.license_info {
            form.push(("licenseInfo", v.clone()));
        }

        let url = format!(
            "{}/sharing/rest/content/users/{owner}/items/{item_id}/update",
            self.base_url
        );
        let body = self.send_json(|| self.client.post(&url).form(&form))?;

        if let Some((code, message)) = portal_error(&body) {
            if is_token_error(code) {
                return Err(ServiceError::InvalidConnection(message));
            }
            return Err(ServiceError::Portal { code, message });
        }
        if body.get("success").and_then(JsonValue::as_bool) != Some(true) {
            return Err(ServiceError::Decode(format!(
                "update of {item_id} did not report success"
            )));
        }
        Ok(())
    }

    fn search_items(&self) -> Result<Vec<PortalItem>, ServiceError> {
        let query = SERVICE_ITEM_TYPES
            .iter()
            .map(|t| format!("type:\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");
        let url = format!("{}/sharing/rest/search", self.base_url);
        let num = self.page_size.to_string();

        let mut items = Vec::new();
        let mut start: i64 = 1;
        loop {
            let start_param = start.to_string();
            let body = self.send_json(|| {
                self.client.get(&url).query(&[
                    ("q", query.as_str()),
                    ("num", num.as_str()),
                    ("start", start_param.as_str()),
                ])
            })?;
            if let Some((code, message)) = portal_error(&body) {
                if is_token_error(code) {
                    return Err(ServiceError::InvalidConnection(message));
                }
                return Err(ServiceError::Portal { code, message });
            }

            let page = body
                .get("results")
                .cloned()
                .map(serde_json::from_value::<Vec<PortalItem>>)
                .transpose()
                .map_err(|e| ServiceError::Decode(format!("search results: {e}")))?
                .unwrap_or_default();
            let page_len = page.len();
            items.extend(page);

            let next = body.get("nextStart").and_then(JsonValue::as_i64).unwrap_or(-1);
            if next <= 0 || page_len == 0 {
                break;
            }
            start = next;
        }
        Ok(items)
    }

    fn item_url(&self, item_id: &str) -> String {
        format!("{}/home/item.html?id={item_id}", self.base_url)
    }
}

/// Serialized portal contents, used for offline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalSnapshot {
    #[serde(default)]
    pub portal_url: Option<String>,
    pub items: Vec<PortalItem>,
}

/// Portal held in memory. Single-threaded by construction.
#[derive(Debug, Default)]
pub struct InMemoryPortal {
    portal_url: String,
    items: RefCell<BTreeMap<String, PortalItem>>,
    rejected_updates: RefCell<Vec<String>>,
}

impl InMemoryPortal {
    pub fn new(portal_url: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn from_snapshot(snapshot: PortalSnapshot) -> Self {
        let portal = Self::new(
            snapshot
                .portal_url
                .unwrap_or_else(|| "https://www.arcgis.com".to_string()),
        );
        for item in snapshot.items {
            portal.insert(item);
        }
        portal
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading portal snapshot {}", path.display()))?;
        let snapshot: PortalSnapshot = serde_json::from_str(&text)
            .with_context(|| format!("parsing portal snapshot {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn insert(&self, item: PortalItem) {
        self.items.borrow_mut().insert(item.id.clone(), item);
    }

    /// Make every later update of `item_id` fail.
    pub fn reject_updates_for(&self, item_id: impl Into<String>) {
        self.rejected_updates.borrow_mut().push(item_id.into());
    }

}

impl RemoteService for InMemoryPortal {
    fn get_item(&self, item_id: &str) -> Result<Option<PortalItem>, ServiceError> {
        Ok(self.items.borrow().get(item_id).cloned())
    }

    fn update_item(&self, item_id: &str, update: &ItemUpdate) -> Result<(), ServiceError> {
        if self.rejected_updates.borrow().iter().any(|id| id == item_id) {
            warn!(item_id, "in-memory portal rejecting update");
            return Err(ServiceError::Portal {
                code: 403,
                message: format!("updates to {item_id} are not permitted"),
            });
        }
        let mut items = self.items.borrow_mut();
        let item = items
            .get_mut(item_id)
            .ok_or_else(|| ServiceError::ItemNotFound(item_id.to_string()))?;
        update.apply_to(item);
        Ok(())
    }

    fn search_items(&self) -> Result<Vec<PortalItem>, ServiceError> {
        Ok(self.items.borrow().values().cloned().collect())
    }

    fn item_url(&self, item_id: &str) -> String {
        format!("{}/home/item.html?id={item_id}", self.portal_url)
    }
}
