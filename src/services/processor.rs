// src/services/processor.rs

//! Page fetching and schema.org record extraction.
//!
//! The worker pool only knows the [`PageProcessor`] trait; the default
//! [`SchemaProcessor`] fetches a URL and extracts schema.org records from
//! the three shapes sites publish them in: raw JSON documents, TSV exports
//! (`url<TAB>json` per line), and HTML pages carrying
//! `<script type="application/ld+json">` blocks.
//!
//! Records without an `@id` are ignored, `@graph` arrays nested in an
//! `@id`-less wrapper are flattened, and purely navigational types
//! (breadcrumbs, site chrome) are skipped. The first occurrence of an
//! `@id` wins.

use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;

use crate::models::HttpConfig;
use crate::utils::http::create_async_client;

/// Navigational schema.org types that are never worth indexing.
const SKIP_TYPES: &[&str] = &[
    "ListItem",
    "ItemList",
    "Organization",
    "BreadcrumbList",
    "Breadcrumb",
    "WebSite",
    "SearchAction",
    "SiteNavigationElement",
    "WebPageElement",
    "WebPage",
    "NewsMediaOrganization",
    "MerchantReturnPolicy",
    "ReturnPolicy",
    "CollectionPage",
    "Brand",
    "Corporation",
    "ReadAction",
];

/// Page processing failure, classified for retry policy.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Worth retrying: network trouble, timeouts, server errors.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help: the URL is gone or the payload unusable.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ProcessError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result of processing one URL: the raw page plus the extracted records.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// The URL that was fetched
    pub url: String,

    /// Content type reported by the server, if any
    pub content_type: Option<String>,

    /// Raw page bytes
    pub body: Vec<u8>,

    /// Extracted schema.org records, each carrying an `@id`
    pub records: Vec<Value>,
}

/// External collaborator that turns a URL into extracted content.
#[async_trait]
pub trait PageProcessor: Send + Sync {
    /// Fetch and process one URL. `content_type` is the discovery-time
    /// hint, if one was recorded.
    async fn process(
        &self,
        url: &str,
        content_type: Option<&str>,
    ) -> Result<ExtractedContent, ProcessError>;
}

/// Default processor: HTTP fetch plus schema.org extraction.
pub struct SchemaProcessor {
    client: reqwest::Client,
}

impl SchemaProcessor {
    /// Create a processor with the given HTTP settings.
    pub fn new(config: &HttpConfig) -> Self {
        let client = create_async_client(config).expect("Failed to build HTTP client");
        Self { client }
    }

    /// Create a processor around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl SchemaProcessor {
    fn classify_request_error(e: reqwest::Error) -> ProcessError {
        // Anything that failed before we saw a response is worth retrying.
        ProcessError::transient(e.to_string())
    }
}

#[async_trait]
impl PageProcessor for SchemaProcessor {
    async fn process(
        &self,
        url: &str,
        content_type: Option<&str>,
    ) -> Result<ExtractedContent, ProcessError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::classify_request_error)?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProcessError::transient(format!("HTTP {status} for {url}")));
        }
        if !status.is_success() {
            return Err(ProcessError::permanent(format!("HTTP {status} for {url}")));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(Self::classify_request_error)?;
        let text = String::from_utf8_lossy(&bytes);

        let hint = content_type
            .map(|s| s.to_string())
            .or_else(|| header_type.clone())
            .unwrap_or_default()
            .to_lowercase();

        let records = if hint.contains("tsv") {
            extract_from_tsv(&text)
        } else if hint.contains("html") || text.trim_start().starts_with('<') {
            extract_from_html(&text)
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(data) => extract_records(&data),
                Err(e) => {
                    return Err(ProcessError::permanent(format!(
                        "no schema data in {url}: {e}"
                    )));
                }
            }
        };

        log::info!("extracted {} records from {}", records.len(), url);
        if records.is_empty() {
            log::warn!("no schema.org objects with @id found in {url}");
        }

        Ok(ExtractedContent {
            url: url.to_string(),
            content_type: header_type,
            body: bytes.to_vec(),
            records,
        })
    }
}

/// Whether an object's `@type` marks it as navigational chrome.
fn should_skip(item: &Value) -> bool {
    match item.get("@type") {
        Some(Value::String(t)) => SKIP_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| SKIP_TYPES.contains(&t)),
        _ => false,
    }
}

fn collect(items: &[Value], seen: &mut HashSet<String>, out: &mut Vec<Value>) {
    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };

        if let Some(id) = obj.get("@id").and_then(|v| v.as_str()) {
            if !should_skip(item) && seen.insert(id.to_string()) {
                out.push(item.clone());
            }
            continue;
        }

        // An @id-less wrapper may still carry records in an @graph array.
        if let Some(Value::Array(graph)) = obj.get("@graph") {
            collect(graph, seen, out);
        }
    }
}

/// Extract identified records from a parsed JSON document.
pub fn extract_records(data: &Value) -> Vec<Value> {
    let items: Vec<Value> = match data {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![data.clone()],
        _ => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    collect(&items, &mut seen, &mut out);
    out
}

/// Extract records from a TSV export: `url<TAB>json` per line.
pub fn extract_from_tsv(text: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((_url, json)) = line.split_once('\t') else {
            log::warn!("TSV line {} has no tab separator, skipping", number + 1);
            continue;
        };
        match serde_json::from_str::<Value>(json) {
            Ok(Value::Array(items)) => collect(&items, &mut seen, &mut out),
            Ok(item) => collect(std::slice::from_ref(&item), &mut seen, &mut out),
            Err(e) => log::warn!("TSV line {} has invalid JSON: {}", number + 1, e),
        }
    }
    out
}

/// Extract records from JSON-LD blocks embedded in an HTML page.
pub fn extract_from_html(html: &str) -> Vec<Value> {
    let selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector");
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for script in document.select(&selector) {
        let text: String = script.text().collect();
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => collect(&items, &mut seen, &mut out),
            Ok(item) => collect(std::slice::from_ref(&item), &mut seen, &mut out),
            Err(e) => log::warn!("skipping unparsable ld+json block: {}", e),
        }
    }
    out
}
