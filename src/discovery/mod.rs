// src/discovery/mod.rs

//! Schema file discovery.
//!
//! Sites advertise their structured data exports through `schemaMap:`
//! directives in robots.txt, each pointing at a sitemap-style XML file
//! whose `<url>` entries carry a `contentType` attribute. Discovery
//! resolves a site URL into the list of schema file URLs to crawl:
//!
//! 1. Fetch `robots.txt` and collect `schemaMap:` directives.
//! 2. If none, try `<site>/schema_map.xml` directly.
//! 3. If the submitted URL itself is a schema map, fetch it as-is.
//!
//! Entries whose `contentType` does not mention schema.org are ignored.
//! Sitemap namespaces make strict XML parsing more trouble than it is
//! worth, so extraction is line-oriented pattern matching.

use std::sync::LazyLock;

use futures::stream::{self, StreamExt};
use regex::Regex;

use crate::error::Result;
use crate::models::DiscoveredUrl;
use crate::utils::resolve;

static URL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<url\b([^>]*)>(.*?)</url>").expect("valid regex"));
static LOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").expect("valid regex"));
static CONTENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)contentType\s*=\s*"([^"]*)""#).expect("valid regex"));

/// Unescape the XML entities that appear in sitemap URLs.
fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

/// Extract `schemaMap:` directive values from a robots.txt body.
pub fn parse_robots_directives(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("schemamap") {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty())
        .collect()
}

/// Extract schema file URLs from a schema map XML document.
///
/// Only `<url>` entries whose `contentType` mentions schema.org are kept;
/// relative locations are resolved against `base_url`.
pub fn parse_schema_map(xml: &str, base_url: &str) -> Vec<DiscoveredUrl> {
    let mut found = Vec::new();

    for block in URL_BLOCK.captures_iter(xml) {
        let attrs = &block[1];
        let inner = &block[2];

        let Some(content_type) = CONTENT_TYPE
            .captures(attrs)
            .map(|c| c[1].trim().to_string())
        else {
            continue;
        };
        if !content_type.to_lowercase().contains("schema.org") {
            continue;
        }

        let Some(loc) = LOC.captures(inner).map(|c| unescape(c[1].trim())) else {
            continue;
        };
        if loc.is_empty() {
            continue;
        }

        let absolute = resolve(base_url, &loc).unwrap_or(loc);
        found.push(DiscoveredUrl::new(absolute).with_content_type(content_type));
    }

    found
}

async fn fetch_text(client: &reqwest::Client, url: &str) -> Option<String> {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => response.text().await.ok(),
        Ok(response) => {
            log::debug!("{} returned HTTP {}", url, response.status());
            None
        }
        Err(e) => {
            log::debug!("failed to fetch {}: {}", url, e);
            None
        }
    }
}

/// Discover the schema file URLs for a site.
pub async fn discover_site(
    client: &reqwest::Client,
    site_url: &str,
) -> Result<Vec<DiscoveredUrl>> {
    // The submitted URL may itself be a schema map.
    if site_url.ends_with("schema_map.xml") {
        if let Some(xml) = fetch_text(client, site_url).await {
            let base = site_url.rsplit_once('/').map(|(b, _)| b).unwrap_or(site_url);
            return Ok(parse_schema_map(&xml, &format!("{base}/")));
        }
        return Ok(Vec::new());
    }

    // Prefer schemaMap directives in robots.txt.
    let mut map_urls = Vec::new();
    if let Some(robots_url) = resolve(site_url, "/robots.txt") {
        if let Some(robots) = fetch_text(client, &robots_url).await {
            for directive in parse_robots_directives(&robots) {
                map_urls.push(resolve(site_url, &directive).unwrap_or(directive));
            }
        }
    }

    // Fall back to the conventional location.
    if map_urls.is_empty() {
        if let Some(fallback) = resolve(site_url, "/schema_map.xml") {
            map_urls.push(fallback);
        }
    }

    // A site may advertise several maps; fetch them concurrently, bounded.
    let mut found = Vec::new();
    let mut maps = stream::iter(map_urls.iter())
        .map(|map_url| async move { (map_url, fetch_text(client, map_url).await) })
        .buffer_unordered(4);
    while let Some((map_url, xml)) = maps.next().await {
        match xml {
            Some(xml) => {
                let urls = parse_schema_map(&xml, site_url);
                log::info!("{}: {} schema files listed", map_url, urls.len());
                found.extend(urls);
            }
            None => log::warn!("could not fetch schema map {}", map_url),
        }
    }

    if found.is_empty() {
        log::warn!("no schema files found for {}", site_url);
    }
    Ok(found)
}
