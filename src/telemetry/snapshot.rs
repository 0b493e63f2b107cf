//! Telemetry snapshot records
//!
//! The ingestion endpoint takes a flat JSON array, so every record is
//! serialized with the snapshot's node, observer and generation time inlined.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{MetricKind, Severity};
use crate::error::Result;

/// One aggregated metric for one entity in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub id: Uuid,
    pub entity_id: String,
    pub metric: MetricKind,
    pub unit: String,
    /// Aggregate the severity was derived from
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
    pub severity: Severity,
    /// Processes in the family, root included; absent for node metrics
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub process_count: Option<usize>,
}

/// Records produced by one observer cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub node_name: String,
    pub observer: String,
    pub generated_at: DateTime<Utc>,
    pub records: Vec<MetricRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayloadRow<'a> {
    node_name: &'a str,
    observer: &'a str,
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    record: &'a MetricRecord,
}

impl TelemetrySnapshot {
    pub fn new(node_name: impl Into<String>, observer: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            observer: observer.into(),
            generated_at: Utc::now(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: MetricRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// JSON array body for the ingestion endpoint.
    pub fn to_payload(&self) -> Result<String> {
        let rows: Vec<PayloadRow<'_>> = self
            .records
            .iter()
            .map(|record| PayloadRow {
                node_name: &self.node_name,
                observer: &self.observer,
                generated_at: self.generated_at,
                record,
            })
            .collect();
        Ok(serde_json::to_string(&rows)?)
    }
}
