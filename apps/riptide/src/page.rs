//! Fetching the server-rendered page and deriving the live channel address.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, SET_COOKIE};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("cannot build http client: {0}")]
    Client(reqwest::Error),
    #[error("page request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("page request to {url} returned status {status}")]
    Status { url: Url, status: u16 },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("cannot derive a websocket address from scheme {0:?}")]
    UnsupportedScheme(String),
}

/// A fetched page: its final address, markup and the session cookie the
/// server set, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: Url,
    pub markup: String,
    pub session_cookie: Option<String>,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load(&self, url: &Url) -> Result<Page, PageError>;
}

pub struct HttpPageSource {
    client: Client,
    cookie_name: String,
}

impl HttpPageSource {
    pub fn new(cookie_name: impl Into<String>) -> Result<Self, PageError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(PageError::Client)?;
        Ok(Self {
            client,
            cookie_name: cookie_name.into(),
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn load(&self, url: &Url) -> Result<Page, PageError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PageError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let session_cookie = session_cookie_from(response.headers(), &self.cookie_name);
        let markup = response.text().await?;
        debug!(
            target: "riptide::session",
            url = %final_url,
            bytes = markup.len(),
            has_cookie = session_cookie.is_some(),
            "page loaded"
        );
        Ok(Page {
            url: final_url,
            markup,
            session_cookie,
        })
    }
}

/// Value of cookie `name` from the response's `Set-Cookie` headers.
pub fn session_cookie_from(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next()?.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// Same host and port as the page, `ws` or `wss` by the page's scheme, fixed
/// `path`.
pub fn channel_url(page: &Url, path: &str) -> Result<Url, PageError> {
    let scheme = match page.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(PageError::UnsupportedScheme(other.to_string())),
    };
    let mut url = page.clone();
    url.set_scheme(scheme)
        .map_err(|()| PageError::UnsupportedScheme(page.scheme().to_string()))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Resolves a navigation target against the current page.
pub fn resolve(page: &Url, target: &str) -> Result<Url, PageError> {
    Ok(page.join(target)?)
}
