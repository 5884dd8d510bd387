use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CACHE_CONTROL, PRAGMA, USER_AGENT};

use crate::feed::FeedSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("read {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid feed JSON: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Something that can produce the current feed document.
pub trait FeedSource: Send + Sync {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<FeedSnapshot, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct HttpFeedSource {
    http: HttpClient,
    url: String,
    user_agent: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("feed client user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("build feed HTTP client")?,
        };

        Ok(Self {
            http,
            url: url.into(),
            user_agent: config.user_agent,
        })
    }
}

impl FeedSource for HttpFeedSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> Result<FeedSnapshot, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .header(CACHE_CONTROL, "no-store")
            .header(PRAGMA, "no-cache")
            .send()
            .map_err(|err| FetchError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(FeedSnapshot::from_json(&body)?)
    }
}

/// Reads the feed from a local file on every fetch.
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FeedSource for FileFeedSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<FeedSnapshot, FetchError> {
        let body = fs::read(&self.path).map_err(|err| FetchError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        Ok(FeedSnapshot::from_json(&body)?)
    }
}

/// Serves queued responses in order, repeating the last one. Used for demos
/// and tests.
pub struct StaticFeedSource {
    responses: Mutex<Vec<Result<FeedSnapshot, String>>>,
    fetches: Mutex<usize>,
}

impl StaticFeedSource {
    pub fn new(snapshot: FeedSnapshot) -> Self {
        Self::sequence(vec![Ok(snapshot)])
    }

    pub fn sequence(responses: Vec<Result<FeedSnapshot, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            fetches: Mutex::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock()
    }
}

impl FeedSource for StaticFeedSource {
    fn describe(&self) -> String {
        "static feed".to_string()
    }

    fn fetch(&self) -> Result<FeedSnapshot, FetchError> {
        *self.fetches.lock() += 1;
        let mut responses = self.responses.lock();
        let next = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses
                .first()
                .cloned()
                .unwrap_or_else(|| Ok(FeedSnapshot::default()))
        };
        next.map_err(FetchError::Network)
    }
}

/// Picks an HTTP or file source for a configured location.
pub fn open(location: &str, config: ClientConfig) -> Result<Arc<dyn FeedSource>> {
    let location = location.trim();
    if location.is_empty() {
        bail!("feed location is empty");
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        let source = HttpFeedSource::new(location, config)
            .with_context(|| format!("create feed client for {location}"))?;
        return Ok(Arc::new(source));
    }
    let path = location.strip_prefix("file://").unwrap_or(location);
    Ok(Arc::new(FileFeedSource::new(path)))
}
