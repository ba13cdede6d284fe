//! Ahmia provider (index of Tor hidden services)

use super::selector;
use super::traits::*;
use crate::error::ProviderError;
use crate::network::{HttpClient, OverlayNetwork};
use crate::results::SearchResult;
use crate::search::ProgressReporter;
use async_trait::async_trait;
use scraper::Html;
use url::Url;

/// Ahmia search provider
///
/// The clearnet gateway needs no overlay; an onion mirror requires Tor.
pub struct Ahmia {
    id: String,
    client: HttpClient,
    search_url: String,
    network: Option<OverlayNetwork>,
}

impl Ahmia {
    pub const DEFAULT_SEARCH_URL: &'static str = "https://ahmia.fi/search/";

    pub fn new(client: HttpClient) -> Self {
        Self::with_search_url(client, Self::DEFAULT_SEARCH_URL)
    }

    pub fn with_search_url(client: HttpClient, search_url: impl Into<String>) -> Self {
        let search_url = search_url.into();
        let network = is_onion(&search_url).then_some(OverlayNetwork::Tor);
        Self {
            id: "ahmia".to_string(),
            client,
            search_url,
            network,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_network(mut self, network: Option<OverlayNetwork>) -> Self {
        self.network = network;
        self
    }

    fn parse_html_results(
        &self,
        html: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let document = Html::parse_document(html);
        let item_selector = selector("li.result")?;
        let title_selector = selector("h4 a")?;
        let snippet_selector = selector("p")?;
        let cite_selector = selector("cite")?;

        let mut results = Vec::new();
        for item in document.select(&item_selector).take(max_results) {
            let Some(title_elem) = item.select(&title_selector).next() else {
                continue;
            };
            let title = title_elem.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                continue;
            }

            let href = title_elem.value().attr("href").unwrap_or_default();
            let url = redirect_target(href)
                .or_else(|| {
                    item.select(&cite_selector)
                        .next()
                        .map(|c| with_scheme(c.text().collect::<String>().trim()))
                })
                .unwrap_or_else(|| href.to_string());
            if url.is_empty() {
                continue;
            }

            let snippet = item
                .select(&snippet_selector)
                .next()
                .map(|p| p.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            results.push(SearchResult::new(url, title, self.id.clone()).with_snippet(snippet));
        }

        Ok(results)
    }
}

pub(super) fn is_onion(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with(".onion")))
        .unwrap_or(false)
}

/// `/search/redirect?search_term=x&redirect_url=http://abc.onion/` -> target
fn redirect_target(href: &str) -> Option<String> {
    let url = Url::parse("https://ahmia.fi").ok()?.join(href).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "redirect_url")
        .map(|(_, v)| v.into_owned())
}

fn with_scheme(address: &str) -> String {
    if address.is_empty() || address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[async_trait]
impl Provider for Ahmia {
    fn id(&self) -> &str {
        &self.id
    }

    fn about(&self) -> ProviderAbout {
        ProviderAbout::new()
            .website("https://ahmia.fi")
            .official_api(false)
            .results_format("HTML")
    }

    fn network(&self) -> Option<OverlayNetwork> {
        self.network
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        progress: &ProgressReporter,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let response = self
            .client
            .get(&self.search_url, &[("q", query)])
            .await?
            .error_for_status()?;

        progress.parsing("Parsing hidden service results...");
        self.parse_html_results(&response.text, max_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r##"
        <ol>
          <li class="result">
            <h4><a href="/search/redirect?search_term=forum&redirect_url=http://abcdefgh.onion/">Privacy forum</a></h4>
            <p>Discussion board about privacy tools.</p>
            <cite>abcdefgh.onion</cite>
          </li>
          <li class="result">
            <h4><a href="#">Mirror list</a></h4>
            <cite>mirrorxyz.onion/list</cite>
          </li>
        </ol>
    "##;

    #[test]
    fn onion_base_url_requires_tor() {
        let client = HttpClient::new().unwrap();
        assert_eq!(Ahmia::new(client.clone()).network(), None);
        let onion = Ahmia::with_search_url(client, "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/search/");
        assert_eq!(onion.network(), Some(OverlayNetwork::Tor));
    }

    #[test]
    fn parses_results_and_redirects() {
        let ahmia = Ahmia::new(HttpClient::new().unwrap());
        let results = ahmia.parse_html_results(PAGE, 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "http://abcdefgh.onion/");
        assert_eq!(results[0].snippet, "Discussion board about privacy tools.");
        assert_eq!(results[1].url, "http://mirrorxyz.onion/list");
    }

    #[tokio::test]
    async fn fetches_search_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/"))
            .and(query_param("q", "forum"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let ahmia = Ahmia::with_search_url(
            HttpClient::new().unwrap(),
            format!("{}/search/", server.uri()),
        );
        let results = ahmia
            .search("forum", 1, &ProgressReporter::silent("ahmia"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Privacy forum");
    }
}
