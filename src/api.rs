use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::types::AnalysisResult;
use crate::chat::stream::ByteStream;
use crate::chat::{AskTransport, StreamRequest};
use crate::error::TransportError;
use crate::pulse::sse::SseDecoder;
use crate::pulse::{EventStream, FaqItem, NewsItem, PulseEvent, PulseSource};

#[derive(Debug, Clone, Deserialize)]
pub struct ClauseExplanation {
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub highlights_html: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatuteMapping {
    #[serde(default)]
    pub act: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurgeReceipt {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize)]
struct AskBody<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct AskReply {
    #[serde(default)]
    answer: String,
}

#[derive(Serialize)]
struct ExplainBody<'a> {
    text: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct MapBody<'a> {
    clause: &'a str,
}

/// HTTP client for the contract-review backend.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    jurisdiction: String,
    timeout: Duration,
    stream_idle: Option<Duration>,
}

impl ApiClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let jurisdiction =
            dotenv::var("JURISDICTION").unwrap_or_else(|_| "india".to_string());
        let timeout = dotenv::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(120);
        let stream_idle = dotenv::var("STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self::new(&base_url, &jurisdiction, Duration::from_secs(timeout), stream_idle)
    }

    pub fn new(
        base_url: &str,
        jurisdiction: &str,
        timeout: Duration,
        stream_idle: Option<Duration>,
    ) -> Result<Self> {
        // No client-wide timeout: streamed bodies may legitimately run long.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            jurisdiction: jurisdiction.to_string(),
            timeout,
            stream_idle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload a contract for analysis.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<AnalysisResult, TransportError> {
        info!(file = %file_name, bytes = bytes.len(), "uploading contract");

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(self.url("/upload"))
            .query(&[("jurisdiction", self.jurisdiction.as_str())])
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;
        let text = checked(resp).await?.text().await?;
        let analysis: AnalysisResult = serde_json::from_str(&text)?;
        Ok(analysis.normalized())
    }

    pub async fn explain_clause(
        &self,
        text: &str,
        reason: &str,
    ) -> Result<ClauseExplanation, TransportError> {
        self.post_json("/explain-clause", &ExplainBody { text, reason })
            .await
    }

    pub async fn map_statute(&self, clause: &str) -> Result<StatuteMapping, TransportError> {
        self.post_json("/map-statute", &MapBody { clause }).await
    }

    /// Render the analysis as a PDF report; returns the raw bytes.
    pub async fn download_report(
        &self,
        analysis: &AnalysisResult,
    ) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .client
            .post(self.url("/download-report"))
            .json(analysis)
            .timeout(self.timeout)
            .send()
            .await?;
        let bytes = checked(resp).await?.bytes().await?;
        debug!(bytes = bytes.len(), "report downloaded");
        Ok(bytes.to_vec())
    }

    /// Ask the backend to forget the uploaded contract.
    pub async fn purge(&self) -> Result<PurgeReceipt, TransportError> {
        let resp = self
            .client
            .delete(self.url("/session"))
            .timeout(self.timeout)
            .send()
            .await?;
        let text = checked(resp).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;
        let text = checked(resp).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, TransportError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let resp = self
            .client
            .get(self.url(path))
            .timeout(self.timeout)
            .send()
            .await?;
        let text = checked(resp).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl AskTransport for ApiClient {
    async fn ask(&self, query: &str) -> Result<String, TransportError> {
        let reply: AskReply = self.post_json("/ask-contract", &AskBody { query }).await?;
        Ok(reply.answer)
    }

    async fn ask_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let resp = self
            .client
            .post(self.url("/ask-contract-stream"))
            .json(request)
            .send()
            .await?;
        let resp = checked(resp).await?;

        let body = resp
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::Interrupted(e.to_string()))
            })
            .boxed();

        Ok(match self.stream_idle {
            Some(idle) => with_idle_timeout(body, idle),
            None => body,
        })
    }
}

#[async_trait]
impl PulseSource for ApiClient {
    async fn fetch_news(&self) -> Result<Vec<NewsItem>, TransportError> {
        self.get_json("/legal-news").await
    }

    async fn fetch_faqs(&self) -> Result<Vec<FaqItem>, TransportError> {
        self.get_json("/legal-faqs").await
    }

    async fn subscribe(&self) -> Result<EventStream, TransportError> {
        let resp = self
            .client
            .get(self.url("/pulse"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = checked(resp).await?;

        let mut decoder = SseDecoder::default();
        let events = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .into_iter()
                    .map(|data| serde_json::from_str::<PulseEvent>(&data).map_err(TransportError::from))
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(TransportError::Interrupted(e.to_string()))],
            })
            .flat_map(futures::stream::iter)
            .boxed();
        Ok(events)
    }
}

/// Turn a non-success response into [`TransportError::Status`], keeping the
/// server's `detail` message when it sent one.
async fn checked(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let raw = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body: error_detail(&raw),
    })
}

fn error_detail(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| raw.trim().to_string())
}

/// End the stream with [`TransportError::Stalled`] if no chunk arrives
/// within `idle`.
fn with_idle_timeout(body: ByteStream, idle: Duration) -> ByteStream {
    futures::stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(item)) => Some((item, Some(body))),
            Ok(None) => None,
            Err(_) => Some((Err(TransportError::Stalled(idle.as_secs())), None)),
        }
    })
    .boxed()
}
