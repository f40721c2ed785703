// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Resource client
//!
//! Lists a collection of a protected API (Pub/Sub topics by default) with
//! the impersonated access token as bearer credential. Responses have the
//! shape `{"<items>": [{"name": "..."}, ...], "nextPageToken": "..."}`;
//! an absent items key is an empty, successful listing.

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::ResourceConfig;
use crate::error::{FederationError, Stage};
use crate::exchange::AccessToken;
use crate::utility::http;

/// Default resource API
pub const DEFAULT_RESOURCE_ENDPOINT: &str = "https://pubsub.googleapis.com";
/// Safety stop for pagination
pub const DEFAULT_MAX_PAGES: u32 = 10;

/// A collection to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Path below the API base, e.g. `v1/projects/p/topics`
    pub path: String,
    /// Response field holding the items, e.g. `topics`
    pub items_key: String,
}

impl ResourceRef {
    pub fn new(path: impl Into<String>, items_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            items_key: items_key.into(),
        }
    }

    /// `v1/projects/{project_id}/{collection}`, items under `collection`
    pub fn for_project(project_id: &str, collection: &str) -> Self {
        Self::new(
            format!("v1/projects/{}/{}", project_id, collection),
            collection,
        )
    }

    pub fn from_config(config: &ResourceConfig) -> Self {
        let mut reference = Self::for_project(&config.project_id, &config.collection);
        if let Some(key) = config.items_key.as_deref().filter(|k| !k.is_empty()) {
            reference.items_key = key.to_string();
        }
        reference
    }

    fn validate(&self) -> Result<(), FederationError> {
        if self.path.trim_matches('/').is_empty() {
            return Err(FederationError::validation("resource path", "must not be empty"));
        }
        if self.path.contains("projects//") || self.path.ends_with('/') {
            return Err(FederationError::validation(
                "resource path",
                format!("'{}' has an empty segment", self.path),
            ));
        }
        if self.items_key.is_empty() {
            return Err(FederationError::validation("items_key", "must not be empty"));
        }
        Ok(())
    }
}

/// One listed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    /// Any other fields returned by the API
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of a listing, all fetched pages concatenated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceList {
    pub items: Vec<ResourceDescriptor>,
    /// Set when the page limit stopped the listing early
    pub next_page_token: Option<String>,
}

impl ResourceList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.name.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.next_page_token.is_none()
    }
}

struct Page {
    items: Vec<ResourceDescriptor>,
    next_page_token: Option<String>,
}

/// Authenticated GET client for the resource API
#[derive(Debug, Clone)]
pub struct ResourceClient {
    http: reqwest::Client,
    base: Url,
    page_size: Option<u32>,
    max_pages: u32,
}

impl ResourceClient {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            page_size: None,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn from_config(
        config: &ResourceConfig,
        request_timeout: Duration,
    ) -> Result<Self, FederationError> {
        let base = http::parse_endpoint("resource.endpoint", &config.endpoint)?;
        Ok(Self::new(http::build_client(request_timeout)?, base)
            .with_page_size(config.page_size)
            .with_max_pages(config.max_pages))
    }

    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size.filter(|&n| n > 0);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// List every item of `resource`, following `nextPageToken` up to the
    /// page limit
    pub async fn call(
        &self,
        token: &AccessToken,
        resource: &ResourceRef,
    ) -> Result<ResourceList, FederationError> {
        resource.validate()?;

        let mut list = ResourceList::default();
        let mut page_token: Option<String> = None;

        for page_number in 1..=self.max_pages {
            let page = self
                .fetch_page(token, resource, page_token.as_deref())
                .await?;
            debug!(
                "Page {} of {} returned {} item(s)",
                page_number,
                resource.path,
                page.items.len()
            );
            list.items.extend(page.items);
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        if let Some(remaining) = page_token {
            warn!(
                "Stopped listing {} after {} page(s), more results are available",
                resource.path, self.max_pages
            );
            list.next_page_token = Some(remaining);
        }

        info!("Listed {} item(s) from {}", list.len(), resource.path);
        Ok(list)
    }

    async fn fetch_page(
        &self,
        token: &AccessToken,
        resource: &ResourceRef,
        page_token: Option<&str>,
    ) -> Result<Page, FederationError> {
        let mut url = http::join_path(&self.base, &resource.path);
        if self.page_size.is_some() || page_token.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(size) = self.page_size {
                query.append_pair("pageSize", &size.to_string());
            }
            if let Some(page_token) = page_token {
                query.append_pair("pageToken", page_token);
            }
        }

        let request = self.http.get(url).bearer_auth(token.secret());
        let (status, body) = http::send(Stage::Resource, request).await?;

        match status {
            s if s.is_success() => parse_page(&body, &resource.items_key),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(FederationError::ResourceAccessDenied {
                    stage: Stage::Resource,
                    status: status.as_u16(),
                    body,
                })
            }
            _ => Err(FederationError::Protocol {
                stage: Stage::Resource,
                status: status.as_u16(),
                body,
            }),
        }
    }
}

fn parse_page(body: &str, items_key: &str) -> Result<Page, FederationError> {
    let malformed = |reason: String| FederationError::MalformedResponse {
        stage: Stage::Resource,
        reason,
        body: body.to_string(),
    };

    // Some APIs answer `{}` or an empty body for an empty collection
    if body.trim().is_empty() {
        return Ok(Page {
            items: Vec::new(),
            next_page_token: None,
        });
    }

    let value: Value = http::parse_json(Stage::Resource, body)?;
    let (items, next_page_token) = match value {
        Value::Array(items) => (items, None),
        Value::Object(mut object) => {
            let items = match object.remove(items_key) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(malformed(format!(
                        "'{}' is not an array but {}",
                        items_key,
                        json_kind(&other)
                    )))
                }
            };
            let next = object
                .remove("nextPageToken")
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|t| !t.is_empty());
            (items, next)
        }
        other => return Err(malformed(format!("unexpected top-level {}", json_kind(&other)))),
    };

    let items = items
        .into_iter()
        .map(serde_json::from_value::<ResourceDescriptor>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| malformed(format!("invalid resource descriptor: {}", e)))?;

    Ok(Page {
        items,
        next_page_token,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
