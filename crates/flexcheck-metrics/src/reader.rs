use std::time::Duration;

use async_trait::async_trait;
use flexcheck_core::{HarnessError, HarnessResult};
use tracing::debug;

use crate::document::MetricsDocument;

/// Source of metrics documents, one fresh read per call.
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    /// Fetches the metrics document published at `host:port`.
    ///
    /// Fails with `Unreachable` when the endpoint cannot be contacted and
    /// with `MalformedDocument` when the answer is not a metrics document.
    async fn fetch(&self, host: &str, port: u16) -> HarnessResult<MetricsDocument>;
}

/// Reads `GET http://{host}:{port}/metrics` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetricsReader {
    client: reqwest::Client,
}

impl HttpMetricsReader {
    /// Creates a reader whose requests give up after `request_timeout`.
    pub fn new(request_timeout: Duration) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn url(host: &str, port: u16) -> String {
        format!("http://{host}:{port}/metrics")
    }
}

#[async_trait]
impl MetricsFetcher for HttpMetricsReader {
    async fn fetch(&self, host: &str, port: u16) -> HarnessResult<MetricsDocument> {
        let url = Self::url(host, port);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HarnessError::unreachable(&url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::malformed(&url, format!("HTTP status {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| HarnessError::unreachable(&url, e.to_string()))?;

        let doc = MetricsDocument::from_json(&body)
            .map_err(|e| HarnessError::malformed(&url, e.to_string()))?;

        debug!(url = %url, entities = doc.entities.len(), "fetched metrics");
        Ok(doc)
    }
}
