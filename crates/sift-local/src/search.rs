use serde::Deserialize;
use sift_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};
use std::time::Duration;

const DUCKDUCKGO_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const RESULTS_PER_PAGE: u32 = 10;

// Search pages are small; keep a tighter cap than model calls get.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

/// DuckDuckGo's HTML endpoint: no API key, paginated by result offset.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(client: reqwest::Client) -> Self {
        let endpoint = crate::env("SIFT_DUCKDUCKGO_ENDPOINT")
            .unwrap_or_else(|| DUCKDUCKGO_HTML_ENDPOINT.to_string());
        Self { client, endpoint }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

/// Parse `.result` blocks out of a DuckDuckGo HTML results page.
pub fn parse_duckduckgo_html(html: &str) -> Vec<SearchResult> {
    let doc = html_scraper::Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        html_scraper::Selector::parse(".result"),
        html_scraper::Selector::parse(".result__title a"),
        html_scraper::Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for block in doc.select(&result_sel) {
        let Some(link) = block.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        let snippet = block
            .select(&snippet_sel)
            .next()
            .map(|s| s.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
        out.push(SearchResult {
            url: resolve_duckduckgo_href(href),
            title: Some(title).filter(|t| !t.is_empty()),
            snippet,
            source: "duckduckgo".to_string(),
        });
    }
    out
}

/// DuckDuckGo sometimes wraps targets as `//duckduckgo.com/l/?uddg=<encoded>`.
fn resolve_duckduckgo_href(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    if let Ok(u) = url::Url::parse(&absolute) {
        if u.path().starts_with("/l/") {
            if let Some((_, target)) = u.query_pairs().find(|(k, _)| k == "uddg") {
                return target.into_owned();
            }
        }
    }
    absolute
}

#[async_trait::async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let offset = (q.page.max(1) - 1) * RESULTS_PER_PAGE;
        let form = [("q", q.query.clone()), ("s", offset.to_string())];
        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::USER_AGENT, "Mozilla/5.0")
            .form(&form)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("duckduckgo search HTTP {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let mut results = parse_duckduckgo_html(&body);
        if let Some(n) = q.max_results {
            results.truncate(n);
        }
        Ok(SearchResponse {
            results,
            provider: "duckduckgo".to_string(),
        })
    }
}

/// SearXNG JSON API. Several endpoints may be configured; a query always goes to the same one.
#[derive(Debug, Clone)]
pub struct SearxngSearch {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearch {
    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "missing SIFT_SEARXNG_ENDPOINT (or SIFT_SEARXNG_ENDPOINTS)".to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    fn endpoint_search_for(base_endpoint: &str) -> String {
        // Accept either a base URL (…/), or a full /search endpoint.
        let mut base = base_endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    fn pick_endpoint(&self, q: &SearchQuery) -> &str {
        // FNV-1a: stable across runs, unlike HashMap's RandomState.
        let mut h: u64 = 1469598103934665603;
        for b in q.query.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        &self.endpoints[(h as usize) % self.endpoints.len()]
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearch {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let endpoint = Self::endpoint_search_for(self.pick_endpoint(q));
        let page = q.page.max(1).to_string();
        let resp = self
            .client
            .get(endpoint)
            .query(&[
                ("q", q.query.as_str()),
                ("format", "json"),
                ("pageno", page.as_str()),
            ])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("searxng search HTTP {status}")));
        }
        let parsed: SearxngSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let max_results = q.max_results.unwrap_or(RESULTS_PER_PAGE as usize);
        let results = parsed
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                Some(SearchResult {
                    url: r.url?,
                    title: r.title,
                    snippet: r.content,
                    source: "searxng".to_string(),
                })
            })
            .take(max_results)
            .collect();
        Ok(SearchResponse {
            results,
            provider: "searxng".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::extract::{Form, Query};
    use axum::{routing::get, routing::post, Json, Router};
    use std::collections::HashMap;

    const DDG_PAGE: &str = r#"
    <html><body>
      <div class="result">
        <h2 class="result__title"><a href="https://doc.rust-lang.org/book/ch04-02-references-and-borrowing.html">References and Borrowing</a></h2>
        <a class="result__snippet">The borrow checker enforces aliasing rules.</a>
      </div>
      <div class="result">
        <h2 class="result__title"><a href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fnll&amp;rut=x">Non-lexical lifetimes</a></h2>
      </div>
      <div class="result"><span>ad without a link</span></div>
    </body></html>
    "#;

    #[test]
    fn parses_duckduckgo_result_blocks() {
        let rs = parse_duckduckgo_html(DDG_PAGE);
        assert_eq!(rs.len(), 2);
        assert_eq!(
            rs[0].url,
            "https://doc.rust-lang.org/book/ch04-02-references-and-borrowing.html"
        );
        assert_eq!(rs[0].title.as_deref(), Some("References and Borrowing"));
        assert_eq!(
            rs[0].snippet.as_deref(),
            Some("The borrow checker enforces aliasing rules.")
        );
        assert_eq!(rs[1].url, "https://example.com/nll");
        assert!(rs[1].snippet.is_none());
    }

    #[tokio::test]
    async fn duckduckgo_posts_query_and_offset() {
        let app = Router::new().route(
            "/html/",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form.get("q").map(String::as_str), Some("rust borrow checker"));
                if form.get("s").map(String::as_str) == Some("10") {
                    DDG_PAGE.to_string()
                } else {
                    "<html></html>".to_string()
                }
            }),
        );
        let base = serve(app).await;
        let ddg = DuckDuckGoSearch::new(reqwest::Client::new())
            .with_endpoint(&format!("{base}/html/"));

        let page2 = ddg
            .search(&SearchQuery::page("rust borrow checker", 2))
            .await
            .unwrap();
        assert_eq!(page2.results.len(), 2);
        assert_eq!(page2.provider, "duckduckgo");

        let page1 = ddg
            .search(&SearchQuery::page("rust borrow checker", 1))
            .await
            .unwrap();
        assert!(page1.results.is_empty());
    }

    #[tokio::test]
    async fn searxng_sends_page_number_and_skips_urlless_results() {
        let app = Router::new().route(
            "/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("format").map(String::as_str), Some("json"));
                Json(serde_json::json!({
                    "results": [
                        {"url": "https://example.com/a", "title": "A", "content": "page " },
                        {"title": "no url"},
                        {"url": format!("https://example.com/p{}", q["pageno"]), "title": "P"}
                    ]
                }))
            }),
        );
        let base = serve(app).await;
        let s = SearxngSearch::new(reqwest::Client::new(), vec![format!("{base}/")]).unwrap();
        let resp = s.search(&SearchQuery::page("q", 3)).await.unwrap();
        let urls: Vec<&str> = resp.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/p3"]);
    }

    #[tokio::test]
    async fn http_errors_become_search_errors() {
        let app = Router::new().route(
            "/search",
            get(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = serve(app).await;
        let s = SearxngSearch::new(reqwest::Client::new(), vec![base]).unwrap();
        let err = s.search(&SearchQuery::page("q", 1)).await.unwrap_err();
        assert!(matches!(err, Error::Search(_)), "got {err:?}");
    }

    #[test]
    fn searxng_endpoint_choice_is_stable() {
        let s = SearxngSearch::new(
            reqwest::Client::new(),
            vec!["http://a".to_string(), "http://b".to_string()],
        )
        .unwrap();
        let q = SearchQuery::page("hello world", 1);
        assert_eq!(s.pick_endpoint(&q), s.pick_endpoint(&q));
        assert_eq!(
            SearxngSearch::endpoint_search_for("http://a/"),
            "http://a/search"
        );
        assert!(SearxngSearch::new(reqwest::Client::new(), Vec::new()).is_err());
    }
}
