use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

const LOG_TARGET: &str = "mushaf::fetch";

/// Trait for downloading recitation audio
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Get the fetcher name
    fn name(&self) -> &'static str;

    /// Download the file at `url`. A single attempt; callers decide on fallback.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP audio fetcher
pub struct HttpAudioFetcher {
    client: reqwest::Client,
}

impl HttpAudioFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("mushaf/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(target: LOG_TARGET, "Downloading {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!(target: LOG_TARGET, "Audio download returned status: {}", response.status());
            return Err(CoreError::AudioFetchFailed {
                url: url.to_string(),
                reason: format!("server returned status {}", response.status()),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(CoreError::AudioFetchFailed {
                url: url.to_string(),
                reason: "empty response body".to_string(),
            });
        }
        Ok(bytes.to_vec())
    }
}
