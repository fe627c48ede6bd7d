//! Periodic ambient environment scan
//!
//! Every period the scanner is asked for a report; high-severity findings are
//! pushed into the conversation as an urgent user turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use url::Url;

use super::MonitorAction;
use crate::{Error, Result};

/// HTTP timeout for scan requests
const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// How serious a scan finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "LOW")]
    Low,
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "HIGH")]
    High,
}

/// Result of one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub severity: Severity,
    pub summary: String,
}

impl ScanReport {
    /// Text injected into the conversation for urgent findings
    #[must_use]
    pub fn urgent_text(&self) -> String {
        format!("URGENT: {}", self.summary)
    }
}

/// External analysis service
#[async_trait]
pub trait EnvironmentScanner: Send + Sync {
    /// Run one scan
    async fn scan(&self) -> Result<ScanReport>;
}

/// Scanner backed by an HTTP endpoint returning a JSON `ScanReport`
pub struct HttpScanner {
    client: reqwest::Client,
    url: Url,
}

impl HttpScanner {
    /// Create a scanner polling `url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(url: Url) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(SCAN_TIMEOUT).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EnvironmentScanner for HttpScanner {
    async fn scan(&self) -> Result<ScanReport> {
        let response = self.client.get(self.url.clone()).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Scan(format!("scan service returned {status}: {body}")));
        }

        response
            .json::<ScanReport>()
            .await
            .map_err(|e| Error::Scan(format!("invalid scan report: {e}")))
    }
}

/// Periodic scan monitor
pub struct AmbientScan {
    pub scanner: Arc<dyn EnvironmentScanner>,
    pub period: Duration,
}

impl AmbientScan {
    /// Scan every `period` until the action channel closes
    ///
    /// The first scan happens one full period after start.
    pub async fn run(self, actions: mpsc::Sender<MonitorAction>) {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.period,
            self.period,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(period_secs = self.period.as_secs(), "ambient scan started");

        loop {
            interval.tick().await;

            match self.scanner.scan().await {
                Ok(report) if report.severity == Severity::High => {
                    tracing::warn!(summary = %report.summary, "high severity ambient finding");
                    if actions.send(MonitorAction::Urgent(report)).await.is_err() {
                        break;
                    }
                }
                Ok(report) => {
                    tracing::debug!(severity = ?report.severity, summary = %report.summary, "ambient scan");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ambient scan failed");
                }
            }

            if actions.is_closed() {
                break;
            }
        }

        tracing::debug!("ambient scan stopped");
    }
}
