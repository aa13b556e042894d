use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
}

/// Injected search capability so the resolver can be tested against fixtures.
pub trait SearchProvider: Send + Sync {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

pub struct DuckDuckGo {
    client: Client,
}

impl DuckDuckGo {
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("failed to build search client")?;
        Ok(Self { client })
    }
}

impl SearchProvider for DuckDuckGo {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let mut url =
            Url::parse("https://html.duckduckgo.com/html/").context("invalid search endpoint")?;
        url.query_pairs_mut().append_pair("q", query);

        let response = self
            .client
            .get(url.as_str())
            .send()
            .with_context(|| format!("search request failed for query {query}"))?;
        if !response.status().is_success() {
            bail!("search returned status {}", response.status());
        }
        let body = response
            .text()
            .context("failed to read search response body")?;

        let parsed = Html::parse_document(&body);
        let result_selector = Selector::parse("div.result").expect("result selector must parse");
        let title_selector = Selector::parse("a.result__a").expect("title selector must parse");
        let snippet_selector =
            Selector::parse(".result__snippet").expect("snippet selector must parse");

        let mut hits = Vec::new();
        for result in parsed.select(&result_selector) {
            if hits.len() >= max_results {
                break;
            }
            let title = result
                .select(&title_selector)
                .next()
                .map(|el| squish(&el.text().collect::<Vec<_>>().join(" ")))
                .unwrap_or_default();
            let snippet = result
                .select(&snippet_selector)
                .next()
                .map(|el| squish(&el.text().collect::<Vec<_>>().join(" ")))
                .unwrap_or_default();
            if title.is_empty() && snippet.is_empty() {
                continue;
            }
            hits.push(SearchHit { title, snippet });
        }

        debug!(query, hits = hits.len(), "search complete");
        Ok(hits)
    }
}

/// Stands in when no configured source wants the web fallback.
pub struct SearchDisabled;

impl SearchProvider for SearchDisabled {
    fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }
}

fn squish(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
