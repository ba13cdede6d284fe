//! HTTP client shared by the provider adapters

use super::reachability::OverlayNetwork;
use super::user_agent::{accept_html, generate_user_agent};
use crate::config::OutgoingSettings;
use crate::error::ProviderError;
use anyhow::Result;
use reqwest::{Client, Response};
use std::time::Duration;

/// Response body and status of a provider request
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub text: String,
    /// Response URL (after redirects)
    pub url: String,
}

impl HttpResponse {
    /// Parse response as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProviderError> {
        serde_json::from_str(&self.text).map_err(|e| ProviderError::Parse(e.to_string()))
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response indicates CAPTCHA
    pub fn is_captcha(&self) -> bool {
        self.text.contains("captcha")
            || self.text.contains("CAPTCHA")
            || self.text.contains("unusual traffic")
            || self.text.contains("automated requests")
    }

    /// Turn non-success responses into provider errors
    pub fn error_for_status(self) -> Result<Self, ProviderError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProviderError::from_status(self.status))
        }
    }
}

/// HTTP client wrapper
///
/// Plain collaborator handed to each adapter; clearnet and overlay
/// variants differ only in the proxy they route through.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    default_timeout: Duration,
    user_agent: String,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self> {
        Self::with_settings(&OutgoingSettings::default())
    }

    /// Create a clearnet client
    pub fn with_settings(settings: &OutgoingSettings) -> Result<Self> {
        Self::build(settings, settings.proxy.as_deref())
    }

    /// Create a client that routes everything through an overlay proxy
    pub fn for_overlay(settings: &OutgoingSettings, network: OverlayNetwork) -> Result<Self> {
        Self::build(settings, Some(settings.overlay_proxy(network)))
    }

    fn build(settings: &OutgoingSettings, proxy: Option<&str>) -> Result<Self> {
        let timeout = settings.request_timeout()?;
        let mut builder = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true);

        if !settings.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy_url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            default_timeout: timeout,
            user_agent: generate_user_agent(),
        })
    }

    /// GET request with query parameters
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, ProviderError> {
        let response = self
            .client
            .get(url)
            .timeout(self.default_timeout)
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept_html())
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("DNT", "1")
            .query(params)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// POST a form
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<HttpResponse, ProviderError> {
        let response = self
            .client
            .post(url)
            .timeout(self.default_timeout)
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept_html())
            .form(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn parse_response(response: Response) -> Result<HttpResponse, ProviderError> {
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let text = response.text().await?;

        Ok(HttpResponse { status, text, url })
    }

    /// Get a new user agent
    pub fn rotate_user_agent(&mut self) {
        self.user_agent = generate_user_agent();
    }

    /// Get current user agent
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        assert!(HttpClient::new().is_ok());
    }

    #[tokio::test]
    async fn overlay_client_accepts_socks_proxy() {
        let settings = OutgoingSettings::default();
        assert!(HttpClient::for_overlay(&settings, OverlayNetwork::Tor).is_ok());
        assert!(HttpClient::for_overlay(&settings, OverlayNetwork::I2p).is_ok());
    }

    #[test]
    fn non_success_maps_to_error() {
        let response = HttpResponse {
            status: 429,
            text: String::new(),
            url: "https://example.com".into(),
        };
        assert_eq!(
            response.error_for_status().unwrap_err(),
            ProviderError::TooManyRequests
        );
    }
}
