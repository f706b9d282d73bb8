use std::collections::{HashSet, VecDeque};

use anyhow::Context as _;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SitemapKind {
    Index,
    UrlSet,
}

/// Collects page URLs from a sitemap, following sitemap indexes
/// breadth-first. Stops once `limit` unique URLs are collected. Any fetch or
/// parse failure aborts the whole walk.
pub async fn fetch_sitemap_urls(
    client: &reqwest::Client,
    root: &str,
    limit: usize,
    relay: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    let root = Url::parse(root.trim()).context("parse sitemap url")?;
    if root.scheme() != "http" && root.scheme() != "https" {
        anyhow::bail!("sitemap url must be http/https: {root}");
    }

    let mut queue: VecDeque<String> = VecDeque::from([root.to_string()]);
    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_pages: HashSet<String> = HashSet::new();
    let mut pages: Vec<String> = Vec::new();

    while let Some(sitemap_url) = queue.pop_front() {
        if pages.len() >= limit {
            break;
        }
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }

        let xml = fetch_text(client, &sitemap_url, relay)
            .await
            .with_context(|| format!("fetch sitemap {sitemap_url}"))?;
        let kind = sitemap_kind(&xml)
            .with_context(|| format!("parse sitemap {sitemap_url}"))?;
        let locs = extract_xml_locs(&xml);
        tracing::debug!(url = %sitemap_url, ?kind, locs = locs.len(), "sitemap fetched");

        match kind {
            SitemapKind::Index => {
                for loc in locs {
                    if !visited.contains(&loc) {
                        queue.push_back(loc);
                    }
                }
            }
            SitemapKind::UrlSet => {
                for loc in locs {
                    if pages.len() >= limit {
                        break;
                    }
                    if seen_pages.insert(loc.clone()) {
                        pages.push(loc);
                    }
                }
            }
        }
    }

    tracing::info!(urls = pages.len(), sitemaps = visited.len(), "sitemap collected");
    Ok(pages)
}

/// URL to request, routed through the relay prefix when one is configured.
pub fn relay_url(relay: Option<&str>, target: &str) -> String {
    match relay.map(str::trim).filter(|r| !r.is_empty()) {
        Some(prefix) => {
            let encoded = url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>();
            format!("{prefix}{encoded}")
        }
        None => target.to_owned(),
    }
}

async fn fetch_text(
    client: &reqwest::Client,
    url: &str,
    relay: Option<&str>,
) -> anyhow::Result<String> {
    let request_url = relay_url(relay, url);
    let response = client
        .get(&request_url)
        .header(reqwest::header::USER_AGENT, "postforge/0.1")
        .header(
            reqwest::header::ACCEPT,
            "application/xml,text/xml;q=0.9,*/*;q=0.8",
        )
        .send()
        .await
        .with_context(|| format!("GET {request_url}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("GET {request_url} returned {status}");
    }
    response.text().await.context("read sitemap body")
}

fn sitemap_kind(xml: &str) -> anyhow::Result<SitemapKind> {
    let lower = xml.to_ascii_lowercase();
    if lower.contains("<sitemapindex") {
        return Ok(SitemapKind::Index);
    }
    if lower.contains("<urlset") {
        return Ok(SitemapKind::UrlSet);
    }
    anyhow::bail!("document is neither a <sitemapindex> nor a <urlset>")
}

fn extract_xml_locs(xml: &str) -> Vec<String> {
    let lower = xml.to_ascii_lowercase();
    let mut locs = Vec::new();

    let mut pos = 0usize;
    loop {
        let Some(start_rel) = lower[pos..].find("<loc>") else {
            break;
        };
        let start = pos + start_rel + "<loc>".len();
        let Some(end_rel) = lower[start..].find("</loc>") else {
            break;
        };
        let end = start + end_rel;
        let raw = unescape_xml(strip_cdata(xml[start..end].trim()));
        if !raw.is_empty() {
            locs.push(raw);
        }
        pos = end + "</loc>".len();
    }

    locs
}

fn strip_cdata(text: &str) -> &str {
    text.strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(text)
        .trim()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
