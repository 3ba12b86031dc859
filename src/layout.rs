//! Advisory table layout: a partitioning column and clustering columns for
//! a mapped schema.
//!
//! Only top-level, non-repeated columns are candidates. Nothing here changes
//! the target schema; the suggestions ride along with the mapping plan.

use serde::{Deserialize, Serialize};

use crate::{
    classify::{self, ColumnClassification, Confidence, Sensitivity},
    target::{BqType, Mode, TargetField, TargetSchema},
};

pub const MAX_CLUSTER_COLUMNS: usize = 4;

const BUSINESS_TIME_HINTS: &[&str] = &["date", "time", "created", "event", "order", "transaction"];
const METRIC_HINTS: &[&str] = &["amount", "price", "score", "metric", "value", "total", "avg", "sum"];
const LOW_CARDINALITY_HINTS: &[&str] = &["status", "type", "flag", "category", "level"];
const IDENTIFIER_HINTS: &[&str] = &["id", "uuid", "key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionStrategy {
    Column,
    IngestionTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSuggestion {
    pub strategy: PartitionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<BqType>,
    pub confidence: Confidence,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterColumn {
    pub name: String,
    pub reason: String,
}

/// Everything advisory about one mapped schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableAdvice {
    pub partitioning: PartitionSuggestion,
    #[serde(default)]
    pub clustering: Vec<ClusterColumn>,
    #[serde(default)]
    pub classifications: Vec<ColumnClassification>,
}

impl TableAdvice {
    pub fn for_schema(schema: &TargetSchema) -> Self {
        let partitioning = suggest_partitioning(schema);
        let clustering = suggest_clustering(schema, partitioning.column.as_deref());
        Self {
            partitioning,
            clustering,
            classifications: classify::classify_schema(schema),
        }
    }

    pub fn has_pii(&self) -> bool {
        self.has_category(Sensitivity::Pii)
    }

    pub fn has_sensitive(&self) -> bool {
        self.has_category(Sensitivity::Sensitive)
    }

    fn has_category(&self, category: Sensitivity) -> bool {
        self.classifications
            .iter()
            .any(|column| column.category == category)
    }
}

fn words(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn has_word(name: &str, hints: &[&str]) -> bool {
    words(name).iter().any(|word| hints.contains(&word.as_str()))
}

fn candidates(schema: &TargetSchema) -> impl Iterator<Item = &TargetField> {
    schema
        .fields()
        .iter()
        .filter(|column| column.mode != Mode::Repeated)
}

/// First the column with the most business-time words; ties keep schema order.
fn best_time_column<'a>(columns: &[&'a TargetField]) -> Option<&'a TargetField> {
    let score = |column: &TargetField| {
        let lowered = column.name.to_ascii_lowercase();
        BUSINESS_TIME_HINTS
            .iter()
            .filter(|hint| lowered.contains(*hint))
            .count()
    };
    columns
        .iter()
        .copied()
        .fold(None, |best: Option<&TargetField>, column| match best {
            Some(current) if score(current) >= score(column) => Some(current),
            _ => Some(column),
        })
}

/// DATE columns win over TIMESTAMP and DATETIME; without either, suggests
/// ingestion-time partitioning.
pub fn suggest_partitioning(schema: &TargetSchema) -> PartitionSuggestion {
    let dates: Vec<&TargetField> = candidates(schema)
        .filter(|column| column.bq_type == BqType::Date)
        .collect();
    if let Some(column) = best_time_column(&dates) {
        return PartitionSuggestion {
            strategy: PartitionStrategy::Column,
            column: Some(column.name.clone()),
            column_type: Some(column.bq_type),
            confidence: Confidence::High,
            reasons: vec![
                "DATE column with business meaning detected".to_string(),
                "daily partitions match the date grain".to_string(),
            ],
        };
    }

    let timestamps: Vec<&TargetField> = candidates(schema)
        .filter(|column| matches!(column.bq_type, BqType::Timestamp | BqType::Datetime))
        .collect();
    if let Some(column) = best_time_column(&timestamps) {
        return PartitionSuggestion {
            strategy: PartitionStrategy::Column,
            column: Some(column.name.clone()),
            column_type: Some(column.bq_type),
            confidence: Confidence::Medium,
            reasons: vec![
                format!("{} column detected", column.bq_type),
                "partition on its date with daily granularity".to_string(),
            ],
        };
    }

    PartitionSuggestion {
        strategy: PartitionStrategy::IngestionTime,
        column: None,
        column_type: None,
        confidence: Confidence::Low,
        reasons: vec![
            "no DATE, TIMESTAMP, or DATETIME column found".to_string(),
            "ingestion-time partitioning still prunes scans on append-only tables".to_string(),
        ],
    }
}

fn clusterable(column: &TargetField, partition_column: Option<&str>) -> bool {
    if partition_column == Some(column.name.as_str()) {
        return false;
    }
    if !matches!(column.bq_type, BqType::String | BqType::Int64) {
        return false;
    }
    !has_word(&column.name, METRIC_HINTS)
}

/// Up to [`MAX_CLUSTER_COLUMNS`] identifier-like STRING or INT64 columns.
/// Metric-like and low-cardinality names are left out.
pub fn suggest_clustering(schema: &TargetSchema, partition_column: Option<&str>) -> Vec<ClusterColumn> {
    let mut scored: Vec<(i32, ClusterColumn)> = candidates(schema)
        .filter(|column| clusterable(column, partition_column))
        .filter_map(|column| {
            let (score, reason) = if has_word(&column.name, IDENTIFIER_HINTS) {
                (1, "identifier-like name")
            } else if has_word(&column.name, LOW_CARDINALITY_HINTS) {
                (-1, "low-cardinality name")
            } else {
                (0, "low signal")
            };
            (score > 0).then(|| {
                (
                    score,
                    ClusterColumn {
                        name: column.name.clone(),
                        reason: reason.to_string(),
                    },
                )
            })
        })
        .collect();
    scored.sort_by(|left, right| right.0.cmp(&left.0));
    scored
        .into_iter()
        .take(MAX_CLUSTER_COLUMNS)
        .map(|(_, column)| column)
        .collect()
}
