use crate::config::{FeedSettings, FtpSettings, HttpSettings, RetrySettings};
use crate::http::build_client;
use crate::retry::{Transient, with_backoff};
use async_trait::async_trait;
use reqwest::Client;
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    sync::Arc,
};
use suppaftp::{FtpError, FtpStream, Mode};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unable to resolve {0}")]
    Resolve(String),
    #[error("ftp error: {0}")]
    Ftp(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("io error: {0}")]
    Io(String),
}

impl Transient for TransportError {
    fn is_transient(&self) -> bool {
        match self {
            TransportError::Resolve(_) | TransportError::Ftp(_) | TransportError::Request(_) => {
                true
            }
            TransportError::Status(code) => *code == 429 || *code >= 500,
            TransportError::Io(_) => false,
        }
    }
}

impl From<FtpError> for TransportError {
    fn from(value: FtpError) -> Self {
        TransportError::Ftp(value.to_string())
    }
}

/// Source of the raw listing feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns the complete feed payload.
    async fn fetch(&self) -> Result<Vec<u8>, TransportError>;

    fn describe(&self) -> String;
}

pub fn build_source(
    feed: &FeedSettings,
    http: &HttpSettings,
    retry: &RetrySettings,
) -> Arc<dyn FeedSource> {
    match feed {
        FeedSettings::Ftp(settings) => Arc::new(FtpFeedSource::new(settings.clone(), *http, *retry)),
        FeedSettings::Http { url } => Arc::new(HttpFeedSource::new(url.clone(), http, *retry)),
        FeedSettings::File { path } => Arc::new(FileFeedSource::new(path.clone())),
    }
}

pub struct FtpFeedSource {
    settings: FtpSettings,
    http: HttpSettings,
    retry: RetrySettings,
}

impl FtpFeedSource {
    pub fn new(settings: FtpSettings, http: HttpSettings, retry: RetrySettings) -> Self {
        Self {
            settings,
            http,
            retry,
        }
    }

    fn download(settings: &FtpSettings, http: &HttpSettings) -> Result<Vec<u8>, TransportError> {
        let target = format!("{}:{}", settings.host, settings.port);
        let addr: SocketAddr = target
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(target.clone()))?
            .next()
            .ok_or_else(|| TransportError::Resolve(target.clone()))?;

        let mut ftp = FtpStream::connect_timeout(addr, http.connect_timeout)?;
        ftp.get_ref()
            .set_read_timeout(Some(http.timeout))
            .map_err(|err| TransportError::Ftp(err.to_string()))?;
        ftp.login(&settings.user, &settings.password)?;
        if settings.passive {
            ftp.set_mode(Mode::Passive);
        } else {
            ftp.set_mode(Mode::Active);
        }
        let payload = ftp.retr_as_buffer(&settings.path)?.into_inner();
        // The payload is already in hand; a failed QUIT does not matter.
        let _ = ftp.quit();
        Ok(payload)
    }
}

#[async_trait]
impl FeedSource for FtpFeedSource {
    async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
        with_backoff(&self.retry, "ftp_feed_fetch", || {
            let settings = self.settings.clone();
            let http = self.http;
            async move {
                tokio::task::spawn_blocking(move || Self::download(&settings, &http))
                    .await
                    .map_err(|err| TransportError::Ftp(err.to_string()))?
            }
        })
        .await
        .inspect(|bytes| {
            info!(
                target = "propfeed.feed",
                host = %self.settings.host,
                bytes = bytes.len(),
                "ftp_feed_downloaded"
            );
        })
    }

    fn describe(&self) -> String {
        format!(
            "ftp://{}@{}:{}{}",
            self.settings.user, self.settings.host, self.settings.port, self.settings.path
        )
    }
}

pub struct HttpFeedSource {
    url: String,
    http: Client,
    retry: RetrySettings,
}

impl HttpFeedSource {
    pub fn new(url: String, http: &HttpSettings, retry: RetrySettings) -> Self {
        Self {
            url,
            http: build_client(http),
            retry,
        }
    }

    async fn download(&self) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| TransportError::Request(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
        let bytes = with_backoff(&self.retry, "http_feed_fetch", || self.download()).await?;
        debug!(target = "propfeed.feed", url = %self.url, bytes = bytes.len(), "http_feed_downloaded");
        Ok(bytes)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reads a feed previously saved to disk, for replays and dry runs.
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FeedSource for FileFeedSource {
    async fn fetch(&self) -> Result<Vec<u8>, TransportError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|err: io::Error| TransportError::Io(format!("{}: {err}", self.path.display())))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}
