use crate::config::FeedConfig;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use reqwest::header::COOKIE;
use std::time::Duration;
use tracing::debug;

/// Source of the raw notification panel response.
pub trait FeedSource {
    fn fetch(&self) -> Result<String>;
}

/// POSTs to the Phabricator notification panel endpoint.
pub struct HttpFeed {
    client: Client,
    url:    String,
    cookie: String,
}

impl HttpFeed {
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            url:    cfg.panel_url(),
            cookie: cfg.cookie.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FeedSource for HttpFeed {
    fn fetch(&self) -> Result<String> {
        let mut req = self.client.post(&self.url).form(&[("__ajax__", "true")]);
        if !self.cookie.is_empty() {
            req = req.header(COOKIE, &self.cookie);
        }

        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport {
                status:  Some(status.as_u16()),
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }

        let body = resp.text()?;
        debug!(bytes = body.len(), "notification panel fetched");
        Ok(body)
    }
}
