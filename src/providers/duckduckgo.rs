//! DuckDuckGo provider (HTML endpoint)

use super::selector;
use super::traits::*;
use crate::error::ProviderError;
use crate::network::HttpClient;
use crate::results::SearchResult;
use crate::search::ProgressReporter;
use async_trait::async_trait;
use scraper::Html;

/// DuckDuckGo web search provider
pub struct DuckDuckGo {
    id: String,
    client: HttpClient,
    html_url: String,
}

impl DuckDuckGo {
    pub const DEFAULT_HTML_URL: &'static str = "https://html.duckduckgo.com/html/";

    pub fn new(client: HttpClient) -> Self {
        Self::with_html_url(client, Self::DEFAULT_HTML_URL)
    }

    pub fn with_html_url(client: HttpClient, html_url: impl Into<String>) -> Self {
        Self {
            id: "duckduckgo".to_string(),
            client,
            html_url: html_url.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn parse_html_results(
        &self,
        html: &str,
        max_results: usize,
        progress: &ProgressReporter,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let document = Html::parse_document(html);
        let mut results = Vec::new();

        let result_selector = selector("div.result")?;
        let title_selector = selector("a.result__a")?;
        let snippet_selector = selector(".result__snippet")?;

        for element in document.select(&result_selector) {
            if results.len() >= max_results {
                break;
            }

            let title_elem = match element.select(&title_selector).next() {
                Some(t) => t,
                None => continue,
            };

            let title = title_elem.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                continue;
            }

            let url = title_elem
                .value()
                .attr("href")
                .map(resolve_redirect)
                .unwrap_or_default();

            // Ads and internal links point back at duckduckgo.com
            if url.is_empty() || url.contains("duckduckgo.com") {
                continue;
            }

            let snippet = element
                .select(&snippet_selector)
                .next()
                .map(|s| s.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            results.push(SearchResult::new(url, title, self.id.clone()).with_snippet(snippet));

            if results.len() % 5 == 0 {
                progress.progress(format!("Processed {} results", results.len()));
            }
        }

        Ok(results)
    }
}

/// Unwrap `//duckduckgo.com/l/?uddg=<encoded>&rut=...` links
fn resolve_redirect(href: &str) -> String {
    let Some(start) = href.find("uddg=") else {
        return href.to_string();
    };
    let encoded = href[start + 5..].split('&').next().unwrap_or_default();
    urlencoding::decode(encoded)
        .map(|u| u.into_owned())
        .unwrap_or_else(|_| href.to_string())
}

#[async_trait]
impl Provider for DuckDuckGo {
    fn id(&self) -> &str {
        &self.id
    }

    fn about(&self) -> ProviderAbout {
        ProviderAbout::new()
            .website("https://duckduckgo.com")
            .official_api(false)
            .results_format("HTML")
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        progress: &ProgressReporter,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let form = [("q", query), ("b", ""), ("kl", "wt-wt")];
        let response = self
            .client
            .post_form(&self.html_url, &form)
            .await?
            .error_for_status()?;

        progress.parsing("Parsing results...");
        let results = self.parse_html_results(&response.text, max_results, progress)?;

        if results.is_empty() && response.is_captcha() {
            return Err(ProviderError::Captcha);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"
        <html><body>
          <div class="result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fdoc.rust-lang.org%2Fbook%2F&amp;rut=abc">
              The Rust Book
            </a>
            <a class="result__snippet">Learn ownership and borrowing.</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://duckduckgo.com/y.js?ad=1">Sponsored</a>
          </div>
          <div class="result">
            <a class="result__a" href="https://crates.io/">crates.io</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_resolve_redirect() {
        assert_eq!(
            resolve_redirect("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa&rut=x"),
            "https://example.com/a"
        );
        assert_eq!(resolve_redirect("https://plain.org"), "https://plain.org");
    }

    #[test]
    fn parses_result_page() {
        let ddg = DuckDuckGo::new(HttpClient::new().unwrap());
        let results = ddg
            .parse_html_results(PAGE, 10, &ProgressReporter::silent("duckduckgo"))
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "The Rust Book");
        assert_eq!(results[0].url, "https://doc.rust-lang.org/book/");
        assert_eq!(results[0].snippet, "Learn ownership and borrowing.");
        assert_eq!(results[1].url, "https://crates.io/");
        assert!(results[1].snippet.is_empty());
    }

    #[tokio::test]
    async fn posts_query_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/html/"))
            .and(body_string_contains("q=rust+book"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let ddg = DuckDuckGo::with_html_url(
            HttpClient::new().unwrap(),
            format!("{}/html/", server.uri()),
        );
        let results = ddg
            .search("rust book", 1, &ProgressReporter::silent("duckduckgo"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_captcha_page_is_captcha_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html>Please complete the CAPTCHA</html>"),
            )
            .mount(&server)
            .await;

        let ddg = DuckDuckGo::with_html_url(HttpClient::new().unwrap(), server.uri());
        let err = ddg
            .search("rust", 10, &ProgressReporter::silent("duckduckgo"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Captcha);
    }
}
