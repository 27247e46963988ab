//! Paragraph-text scraper. Only `https://` URLs are fetched.

use sift_core::{require_https, Error, Result, Scraper};
use std::time::Duration;

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpsScraper {
    client: reqwest::Client,
}

impl HttpsScraper {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(5))
            .timeout(SCRAPE_TIMEOUT)
            .build()
            .map_err(|e| Error::Scrape(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch without the scheme check; `scrape` is the public entry point.
    async fn fetch_paragraphs(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Scrape(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Scrape(format!("HTTP {status} for {url}")));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| Error::Scrape(e.to_string()))?;
        let text = paragraph_text(&html);
        if text.is_empty() {
            return Err(Error::Scrape(format!("no content found for url: {url}")));
        }
        Ok(text)
    }
}

/// Text of every `<p>`, one paragraph per line.
pub fn paragraph_text(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("p") else {
        return String::new();
    };
    let mut out = String::new();
    for p in doc.select(&sel) {
        let t = p.text().collect::<String>();
        let t = t.trim();
        if t.is_empty() {
            continue;
        }
        out.push_str(t);
        out.push('\n');
    }
    out.trim().to_string()
}

#[async_trait::async_trait]
impl Scraper for HttpsScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        require_https(url)?;
        self.fetch_paragraphs(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{routing::get, Router};

    #[test]
    fn joins_paragraphs_and_ignores_chrome() {
        let html = r#"<html><head><title>t</title></head><body>
            <nav>Home | About</nav>
            <p>First <b>bold</b> paragraph.</p>
            <p>   </p>
            <div><p>Second paragraph.</p></div>
            <footer>© someone</footer>
        </body></html>"#;
        assert_eq!(
            paragraph_text(html),
            "First bold paragraph.\nSecond paragraph."
        );
    }

    #[tokio::test]
    async fn plain_http_is_refused_before_any_request() {
        let s = HttpsScraper::new().unwrap();
        let err = s.scrape("http://127.0.0.1:1/page").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn pages_without_paragraphs_are_errors() {
        let app = Router::new()
            .route(
                "/article",
                get(|| async {
                    axum::response::Html("<p>Ownership moves values.</p><p>Borrows don't.</p>")
                }),
            )
            .route("/empty", get(|| async { axum::response::Html("<div>nothing</div>") }));
        let base = serve(app).await;
        let s = HttpsScraper::new().unwrap();

        let text = s.fetch_paragraphs(&format!("{base}/article")).await.unwrap();
        assert_eq!(text, "Ownership moves values.\nBorrows don't.");

        let err = s.fetch_paragraphs(&format!("{base}/empty")).await.unwrap_err();
        assert!(matches!(err, Error::Scrape(_)));
        let err = s.fetch_paragraphs(&format!("{base}/missing")).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
