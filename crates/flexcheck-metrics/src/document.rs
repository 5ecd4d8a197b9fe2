use std::fmt;

use flexcheck_core::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of entity a block of metrics belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Server,
    Cluster,
    Table,
    Tablet,
    /// Any entity type this harness does not inspect.
    #[serde(other)]
    Other,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Server => "server",
            Self::Cluster => "cluster",
            Self::Table => "table",
            Self::Tablet => "tablet",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// One named metric inside an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,

    /// Set on histograms and counters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,

    /// Set on gauges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl MetricEntry {
    /// Counter with a `total_count` reading.
    #[must_use]
    pub fn counter(name: impl Into<String>, total_count: i64) -> Self {
        Self {
            name: name.into(),
            total_count: Some(total_count),
            value: None,
        }
    }

    /// Gauge with an integral `value` reading.
    #[must_use]
    pub fn gauge(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            total_count: None,
            value: Some(Value::from(value)),
        }
    }

    /// Integral reading: `total_count` if present, else an integral `value`.
    #[must_use]
    pub fn reading(&self) -> Option<i64> {
        if let Some(count) = self.total_count {
            return Some(count);
        }
        match self.value.as_ref()? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            _ => None,
        }
    }
}

/// A block of metrics published by one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub metrics: Vec<MetricEntry>,
}

impl MetricsEntity {
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<String>, metrics: Vec<MetricEntry>) -> Self {
        Self {
            kind,
            id: id.into(),
            attributes: Map::new(),
            metrics,
        }
    }
}

/// Parsed payload of a `GET /metrics` request, in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsDocument {
    pub entities: Vec<MetricsEntity>,
}

impl MetricsDocument {
    #[must_use]
    pub fn new(entities: Vec<MetricsEntity>) -> Self {
        Self { entities }
    }

    /// Parses a JSON payload.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Renders the document as a JSON payload.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn readings<P>(&self, kind: EntityKind, entity_predicate: P, metric_name: &str) -> Vec<i64>
    where
        P: Fn(&MetricsEntity) -> bool,
    {
        self.entities
            .iter()
            .filter(|entity| entity.kind == kind && entity_predicate(*entity))
            .flat_map(|entity| entity.metrics.iter())
            .filter(|metric| metric.name == metric_name)
            .filter_map(MetricEntry::reading)
            .collect()
    }

    /// Reading of the first metric named `metric_name` on an entity of `kind`
    /// accepted by `entity_predicate`.
    pub fn find_counter<P>(
        &self,
        kind: EntityKind,
        entity_predicate: P,
        metric_name: &str,
    ) -> HarnessResult<i64>
    where
        P: Fn(&MetricsEntity) -> bool,
    {
        self.readings(kind, entity_predicate, metric_name)
            .first()
            .copied()
            .ok_or_else(|| HarnessError::metric_not_found(kind.to_string(), metric_name))
    }

    /// Sum of every metric named `metric_name` across the matching entities.
    pub fn sum_counter<P>(
        &self,
        kind: EntityKind,
        entity_predicate: P,
        metric_name: &str,
    ) -> HarnessResult<i64>
    where
        P: Fn(&MetricsEntity) -> bool,
    {
        let readings = self.readings(kind, entity_predicate, metric_name);
        if readings.is_empty() {
            return Err(HarnessError::metric_not_found(kind.to_string(), metric_name));
        }
        Ok(readings.iter().sum())
    }
}

/// Free-function form of [`MetricsDocument::find_counter`].
pub fn find_counter<P>(
    doc: &MetricsDocument,
    kind: EntityKind,
    entity_predicate: P,
    metric_name: &str,
) -> HarnessResult<i64>
where
    P: Fn(&MetricsEntity) -> bool,
{
    doc.find_counter(kind, entity_predicate, metric_name)
}
