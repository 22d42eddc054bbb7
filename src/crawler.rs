//! Offer-page crawler.
//!
//! Discovers page URLs for a site (sitemap.xml when present, otherwise
//! same-host links on the base page), honors robots.txt disallow rules, and
//! feeds each page through the ingestion pipeline. Pages whose extracted
//! content hashes to an already-stored checksum are skipped, so re-crawling
//! an unchanged site is cheap. Fetching is sequential with a per-page
//! navigation timeout; a failed page is recorded and does not abort the
//! crawl.

use anyhow::Result;
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

use crate::agents;
use crate::config::CrawlerConfig;
use crate::extract;
use crate::ingest::IngestPipeline;
use crate::models::SourceKind;

/// Summary of one crawl run.
#[derive(Debug, Default, Clone)]
pub struct CrawlReport {
    pub discovered: usize,
    pub ingested: usize,
    /// Unchanged (checksum match) or robots-disallowed pages.
    pub skipped: usize,
    pub failed: usize,
}

pub struct Crawler<'a> {
    pipeline: &'a IngestPipeline,
    config: &'a CrawlerConfig,
    http: reqwest::Client,
}

impl<'a> Crawler<'a> {
    pub fn new(pipeline: &'a IngestPipeline, config: &'a CrawlerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.page_timeout_secs))
            .build()?;

        Ok(Self {
            pipeline,
            config,
            http,
        })
    }

    /// Crawl a site and ingest its pages for `agent_id`.
    pub async fn crawl(&self, agent_id: &str, tenant: &str, base_url: &str) -> Result<CrawlReport> {
        let base = Url::parse(base_url)?;
        let robots = self.fetch_robots(&base).await;

        let mut urls = self.discover(&base).await?;
        urls.truncate(self.config.max_pages);

        let mut report = CrawlReport {
            discovered: urls.len(),
            ..Default::default()
        };

        for url in &urls {
            if !robots.allows(url.path()) {
                report.skipped += 1;
                continue;
            }

            let html = match self.fetch_page(url).await {
                Ok(body) => body,
                Err(e) => {
                    eprintln!("Warning: fetch failed for {}: {}", url, e);
                    report.failed += 1;
                    continue;
                }
            };

            let extracted = extract::extract_html(&html, self.config.max_page_bytes);

            let source = match self
                .pipeline
                .add_source(agent_id, tenant, SourceKind::Url, Some(url.to_string()), None)
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Warning: could not register {}: {}", url, e);
                    report.failed += 1;
                    continue;
                }
            };

            let agent = agents::get_required(self.pipeline.pool(), agent_id).await?;
            match self.pipeline.ingest_extracted(&agent, &source, extracted).await {
                Ok(outcome) if outcome.skipped => report.skipped += 1,
                Ok(_) => report.ingested += 1,
                Err(e) => {
                    eprintln!("Warning: ingest failed for {}: {}", url, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sitemap first; fall back to same-host links on the base page.
    async fn discover(&self, base: &Url) -> Result<Vec<Url>> {
        if let Ok(sitemap_url) = base.join("/sitemap.xml") {
            if let Ok(body) = self.fetch_page(&sitemap_url).await {
                let urls = parse_sitemap(&body, base);
                if !urls.is_empty() {
                    return Ok(urls);
                }
            }
        }

        let mut urls = vec![base.clone()];
        if let Ok(body) = self.fetch_page(base).await {
            for url in extract_links(&body, base) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        Ok(urls)
    }

    async fn fetch_robots(&self, base: &Url) -> RobotsRules {
        let Ok(robots_url) = base.join("/robots.txt") else {
            return RobotsRules::default();
        };
        match self.fetch_page(&robots_url).await {
            Ok(body) => RobotsRules::parse(&body, &self.config.user_agent),
            // Missing or unreachable robots.txt means allow all.
            Err(_) => RobotsRules::default(),
        }
    }

    async fn fetch_page(&self, url: &Url) -> Result<String> {
        let response = self.http.get(url.clone()).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

// ============ robots.txt ============

/// Disallow rules applying to our user agent (or `*`).
#[derive(Debug, Default, Clone)]
pub struct RobotsRules {
    disallow: Vec<String>,
}

impl RobotsRules {
    /// Minimal robots.txt parser: collects `Disallow:` prefixes from the
    /// `*` group and from any group naming our user agent token.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let ua_token = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .to_ascii_lowercase();

        let mut disallow = Vec::new();
        let mut group_applies = false;
        let mut in_rules = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A new agent line after rules starts a new group.
                    if in_rules {
                        group_applies = false;
                        in_rules = false;
                    }
                    let agent = value.to_ascii_lowercase();
                    if agent == "*" || agent == ua_token {
                        group_applies = true;
                    }
                }
                "disallow" => {
                    in_rules = true;
                    if group_applies && !value.is_empty() {
                        disallow.push(value.to_string());
                    }
                }
                _ => {
                    in_rules = true;
                }
            }
        }

        Self { disallow }
    }

    pub fn allows(&self, path: &str) -> bool {
        !self.disallow.iter().any(|prefix| path.starts_with(prefix))
    }
}

// ============ sitemap ============

/// Pull `<loc>` entries out of a sitemap, keeping same-host URLs only.
pub fn parse_sitemap(xml: &str, base: &Url) -> Vec<Url> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut urls = Vec::new();
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_loc = e.local_name().as_ref() == b"loc";
            }
            Ok(quick_xml::events::Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    if let Ok(mut url) = Url::parse(text.trim()) {
                        url.set_fragment(None);
                        if url.host_str() == base.host_str() && !urls.contains(&url) {
                            urls.push(url);
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::End(_)) => {
                in_loc = false;
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    urls
}

// ============ link discovery ============

/// Same-host links on a page, fragments stripped, in document order.
pub fn extract_links(html: &str, base: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut urls = Vec::new();
    for element in doc.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') {
            continue;
        }
        if let Ok(mut url) = base.join(href) {
            url.set_fragment(None);
            if url.host_str() == base.host_str() && !urls.contains(&url) {
                urls.push(url);
            }
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://shop.example/").unwrap()
    }

    #[test]
    fn test_robots_wildcard_disallow() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /admin\n", "ragmill/0.3");
        assert!(!rules.allows("/admin"));
        assert!(!rules.allows("/admin/users"));
        assert!(rules.allows("/offers"));
    }

    #[test]
    fn test_robots_specific_agent_group() {
        let body = "User-agent: otherbot\nDisallow: /\n\nUser-agent: ragmill\nDisallow: /private\n";
        let rules = RobotsRules::parse(body, "ragmill/0.3");
        assert!(rules.allows("/offers"), "otherbot's rules must not apply");
        assert!(!rules.allows("/private"));
    }

    #[test]
    fn test_robots_empty_disallow_allows_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n", "ragmill/0.3");
        assert!(rules.allows("/anything"));
    }

    #[test]
    fn test_robots_missing_means_allow() {
        let rules = RobotsRules::default();
        assert!(rules.allows("/anything"));
    }

    #[test]
    fn test_robots_comments_ignored() {
        let body = "# site rules\nUser-agent: * # everyone\nDisallow: /tmp # scratch\n";
        let rules = RobotsRules::parse(body, "ragmill/0.3");
        assert!(!rules.allows("/tmp"));
    }

    #[test]
    fn test_sitemap_parses_locs() {
        let xml = r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://shop.example/offers/1</loc></url>
              <url><loc>https://shop.example/offers/2</loc></url>
              <url><loc>https://elsewhere.example/x</loc></url>
            </urlset>"#;
        let urls = parse_sitemap(xml, &base());
        assert_eq!(urls.len(), 2, "foreign-host entries are dropped");
        assert_eq!(urls[0].path(), "/offers/1");
    }

    #[test]
    fn test_sitemap_garbage_yields_empty() {
        assert!(parse_sitemap("not xml at all", &base()).is_empty());
    }

    #[test]
    fn test_extract_links_same_host_only() {
        let html = r##"<body>
            <a href="/offers/1">One</a>
            <a href="https://shop.example/offers/2#frag">Two</a>
            <a href="https://elsewhere.example/three">Three</a>
            <a href="#top">Top</a>
        </body>"##;
        let urls = extract_links(html, &base());
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].path(), "/offers/1");
        assert_eq!(urls[1].path(), "/offers/2");
        assert!(urls[1].fragment().is_none());
    }

    #[test]
    fn test_extract_links_dedups() {
        let html = r#"<a href="/a">1</a><a href="/a">2</a>"#;
        assert_eq!(extract_links(html, &base()).len(), 1);
    }
}
