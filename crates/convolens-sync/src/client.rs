//! Document-database access.
//!
//! The synchronizer only depends on the [`ReportDb`] trait; the Notion
//! implementation is the production backend, tests use an in-memory fake.

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::time::Duration;

const NOTION_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Minimal page surface needed for upsert-by-natural-key synchronization.
pub trait ReportDb {
    /// All pages of a database, pagination already drained.
    fn query_pages(&mut self, db_id: &str) -> Result<Vec<Value>>;

    /// Create a page with properties and body blocks in one call; returns
    /// the created page object (carrying at least `id`).
    fn create_page(&mut self, db_id: &str, properties: Value, children: Vec<Value>) -> Result<Value>;

    fn update_page(&mut self, page_id: &str, properties: Value) -> Result<()>;

    /// Delete all existing child blocks of a page.
    fn clear_page(&mut self, page_id: &str) -> Result<()>;

    fn append_blocks(&mut self, page_id: &str, blocks: Vec<Value>) -> Result<()>;

    fn archive_page(&mut self, page_id: &str) -> Result<()>;
}

/// Body block builders shared by the synchronizer and tests.
pub mod blocks {
    use serde_json::{json, Value};

    fn rich_text(text: &str) -> Value {
        json!([{"type": "text", "text": {"content": text}}])
    }

    pub fn heading(text: &str, level: u8) -> Value {
        let kind = match level {
            1 => "heading_1",
            2 => "heading_2",
            _ => "heading_3",
        };
        json!({"object": "block", "type": kind, kind: {"rich_text": rich_text(text)}})
    }

    pub fn paragraph(text: &str) -> Value {
        json!({"object": "block", "type": "paragraph", "paragraph": {"rich_text": rich_text(text)}})
    }

    pub fn divider() -> Value {
        json!({"object": "block", "type": "divider", "divider": {}})
    }

    pub fn bulleted_list(text: &str) -> Value {
        json!({
            "object": "block",
            "type": "bulleted_list_item",
            "bulleted_list_item": {"rich_text": rich_text(text)},
        })
    }
}

/// Notion-backed implementation of [`ReportDb`].
#[derive(Debug)]
pub struct NotionClient {
    token: String,
    client: reqwest::blocking::Client,
}

impl NotionClient {
    pub fn new(token: String) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Config("notion token missing in config".to_string()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|err| Error::Config(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self { token, client })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.notion.token.clone())
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", NOTION_BASE_URL, path);
        let mut request = self
            .client
            .request(method, url.as_str())
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .map_err(|err| Error::Db(format!("request to {} failed: {}", url, err)))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| Error::Db(format!("reading response from {} failed: {}", url, err)))?;
        if !status.is_success() {
            let head: String = text.chars().take(500).collect();
            return Err(Error::Db(format!("HTTP {} from {}: {}", status.as_u16(), url, head)));
        }
        serde_json::from_str(&text)
            .map_err(|err| Error::Db(format!("invalid JSON from {}: {}", url, err)))
    }

    fn drain_paginated(&self, path: &str, body_base: Value) -> Result<Vec<Value>> {
        let mut results: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = body_base.clone();
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let page = self.request(reqwest::Method::POST, path, Some(&body))?;
            if let Some(items) = page.get("results").and_then(Value::as_array) {
                results.extend(items.iter().cloned());
            }
            let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            cursor = page
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_more || cursor.is_none() {
                return Ok(results);
            }
        }
    }
}

impl ReportDb for NotionClient {
    fn query_pages(&mut self, db_id: &str) -> Result<Vec<Value>> {
        self.drain_paginated(&format!("/databases/{}/query", db_id), json!({"page_size": 100}))
    }

    fn create_page(&mut self, db_id: &str, properties: Value, children: Vec<Value>) -> Result<Value> {
        let body = json!({
            "parent": {"database_id": db_id},
            "properties": properties,
            "children": children,
        });
        self.request(reqwest::Method::POST, "/pages", Some(&body))
    }

    fn update_page(&mut self, page_id: &str, properties: Value) -> Result<()> {
        let body = json!({"properties": properties});
        self.request(reqwest::Method::PATCH, &format!("/pages/{}", page_id), Some(&body))?;
        Ok(())
    }

    fn clear_page(&mut self, page_id: &str) -> Result<()> {
        loop {
            let listing = self.request(
                reqwest::Method::GET,
                &format!("/blocks/{}/children?page_size=100", page_id),
                None,
            )?;
            let children: Vec<String> = listing
                .get("results")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if children.is_empty() {
                return Ok(());
            }
            for child_id in children {
                self.request(reqwest::Method::DELETE, &format!("/blocks/{}", child_id), None)?;
            }
            let has_more = listing.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            if !has_more {
                return Ok(());
            }
        }
    }

    fn append_blocks(&mut self, page_id: &str, blocks: Vec<Value>) -> Result<()> {
        let body = json!({"children": blocks});
        self.request(
            reqwest::Method::PATCH,
            &format!("/blocks/{}/children", page_id),
            Some(&body),
        )?;
        Ok(())
    }

    fn archive_page(&mut self, page_id: &str) -> Result<()> {
        let body = json!({"archived": true});
        self.request(reqwest::Method::PATCH, &format!("/pages/{}", page_id), Some(&body))?;
        Ok(())
    }
}
