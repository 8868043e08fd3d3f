//! Execution outcomes and the append-only sinks they are written to.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::Serialize;
use strum::{AsRefStr, Display};
use time::OffsetDateTime;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::BotError;
use crate::scanner::{Opportunity, OpportunitySummary};

/// Terminal status of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStatus {
    /// Confirmed.
    Success,
    /// Rejected at submission or reverted.
    Failed,
    /// Not confirmed within the horizon; result unknown.
    Timeout,
}

/// Result of one settlement attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Opportunity that was settled.
    pub opportunity: Opportunity,
    /// Terminal status.
    pub status: ExecutionStatus,
    /// Settlement cost when known.
    pub cost: Option<U256>,
    /// Failure or timeout detail.
    pub error_detail: Option<String>,
    /// Receipt identifier, if submission got that far.
    pub receipt_id: Option<String>,
    /// Submission path label.
    pub route: String,
    /// When the outcome became final.
    pub completed_at: OffsetDateTime,
}

impl ExecutionOutcome {
    /// Serializable record for sinks and status.
    pub fn record(&self) -> OutcomeRecord {
        OutcomeRecord {
            opportunity: self.opportunity.summary(),
            status: self.status,
            cost: self.cost.map(|c| c.to_string()),
            error_detail: self.error_detail.clone(),
            receipt_id: self.receipt_id.clone(),
            route: self.route.clone(),
            completed_at: self.completed_at.unix_timestamp(),
        }
    }
}

/// Flat form of an [`ExecutionOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub opportunity: OpportunitySummary,
    pub status: ExecutionStatus,
    pub cost: Option<String>,
    pub error_detail: Option<String>,
    pub receipt_id: Option<String>,
    pub route: String,
    /// Unix seconds.
    pub completed_at: i64,
}

/// Append-only destination for outcome records. Never read back by the agent.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn append(&self, record: &OutcomeRecord) -> Result<(), BotError>;
}

/// Writes each outcome as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl OutcomeSink for TracingSink {
    async fn append(&self, record: &OutcomeRecord) -> Result<(), BotError> {
        let o = &record.opportunity;
        match record.status {
            ExecutionStatus::Success => info!(
                pair = %o.pair,
                buy = %o.venue_buy,
                sell = %o.venue_sell,
                cost = record.cost.as_deref().unwrap_or("unknown"),
                receipt = record.receipt_id.as_deref().unwrap_or("-"),
                route = %record.route,
                "Settlement succeeded"
            ),
            status => warn!(
                pair = %o.pair,
                buy = %o.venue_buy,
                sell = %o.venue_sell,
                status = %status,
                error = record.error_detail.as_deref().unwrap_or("-"),
                receipt = record.receipt_id.as_deref().unwrap_or("-"),
                route = %record.route,
                "Settlement did not succeed"
            ),
        }
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<OutcomeRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far.
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl OutcomeSink for MemorySink {
    async fn append(&self, record: &OutcomeRecord) -> Result<(), BotError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutcomeSink for JsonLinesSink {
    async fn append(&self, record: &OutcomeRecord) -> Result<(), BotError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::fixtures;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn outcome(status: ExecutionStatus) -> ExecutionOutcome {
        ExecutionOutcome {
            opportunity: Opportunity {
                pair: fixtures::pair(),
                venue_buy: fixtures::venue("quickswap", 0xa1),
                venue_sell: fixtures::venue("sushiswap", 0xa2),
                price_buy: dec!(100),
                price_sell: dec!(101.5),
                spread_ratio: dec!(0.015),
                estimated_profit: dec!(0.54),
                observed_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            },
            status,
            cost: Some(U256::from(21_000u64)),
            error_detail: None,
            receipt_id: Some("0xabc".to_string()),
            route: "direct:endpoint-0".to_string(),
            completed_at: OffsetDateTime::from_unix_timestamp(1_700_000_030).unwrap(),
        }
    }

    #[test]
    fn record_serializes_flat() {
        let json = serde_json::to_value(outcome(ExecutionStatus::Success).record()).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["cost"], "21000");
        assert_eq!(json["opportunity"]["pair"], "WETH/USDC");
        assert_eq!(json["opportunity"]["spread_ratio"], "0.015");
        assert_eq!(json["completed_at"], 1_700_000_030);
    }

    #[tokio::test]
    async fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.append(&outcome(ExecutionStatus::Timeout).record()).await.unwrap();
        sink.append(&outcome(ExecutionStatus::Failed).record()).await.unwrap();
        let statuses: Vec<_> = sink.records().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ExecutionStatus::Timeout, ExecutionStatus::Failed]);
    }

    #[tokio::test]
    async fn json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");

        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.append(&outcome(ExecutionStatus::Success).record()).await.unwrap();
        drop(sink);

        // Reopening must not truncate.
        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.append(&outcome(ExecutionStatus::Failed).record()).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "failed");
    }

    #[tokio::test]
    async fn tracing_sink_accepts_every_status() {
        for status in [ExecutionStatus::Success, ExecutionStatus::Failed, ExecutionStatus::Timeout] {
            TracingSink.append(&outcome(status).record()).await.unwrap();
        }
    }
}
