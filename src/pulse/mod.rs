pub mod carousel;
pub mod driver;
pub mod sse;
pub mod window;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use driver::{PulseHandle, PulseView};

/// One external legal-news headline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub tag: String,
    pub title: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqItem {
    pub q: String,
    pub a: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Push-channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PulseEvent {
    NewArticle(NewsItem),
    NewFaq(FaqItem),
}

pub type EventStream = BoxStream<'static, Result<PulseEvent, TransportError>>;

/// Snapshot endpoints plus the push subscription.
#[async_trait]
pub trait PulseSource: Send + Sync {
    async fn fetch_news(&self) -> Result<Vec<NewsItem>, TransportError>;

    async fn fetch_faqs(&self) -> Result<Vec<FaqItem>, TransportError>;

    /// Open the push channel. The returned stream ends when the server
    /// closes the connection.
    async fn subscribe(&self) -> Result<EventStream, TransportError>;
}

pub struct PulseConfig {
    /// Carousel autoplay period.
    pub interval: Duration,
    pub capacity: usize,
    /// Re-subscribe attempts after the push channel drops; 0 disables.
    pub reconnect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            capacity: 10,
            reconnect_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl PulseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = dotenv::var("CAROUSEL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);
        let capacity = dotenv::var("FEED_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.capacity);
        let reconnect_attempts = dotenv::var("PULSE_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.reconnect_attempts);

        Self {
            interval,
            capacity,
            reconnect_attempts,
            ..defaults
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}
