//! BigQuery-shaped target type system.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::types::join_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BqType {
    Bool,
    Int64,
    Float64,
    Numeric,
    Bignumeric,
    String,
    Bytes,
    Timestamp,
    Date,
    Time,
    Datetime,
    Struct,
}

impl BqType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BqType::Bool => "BOOL",
            BqType::Int64 => "INT64",
            BqType::Float64 => "FLOAT64",
            BqType::Numeric => "NUMERIC",
            BqType::Bignumeric => "BIGNUMERIC",
            BqType::String => "STRING",
            BqType::Bytes => "BYTES",
            BqType::Timestamp => "TIMESTAMP",
            BqType::Date => "DATE",
            BqType::Time => "TIME",
            BqType::Datetime => "DATETIME",
            BqType::Struct => "STRUCT",
        }
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self, BqType::Numeric | BqType::Bignumeric)
    }

    /// Maximum (precision, scale) the type can hold.
    pub fn decimal_limits(&self) -> Option<(u8, u8)> {
        match self {
            BqType::Numeric => Some((38, 9)),
            BqType::Bignumeric => Some((76, 38)),
            _ => None,
        }
    }
}

impl fmt::Display for BqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BqType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Ok(BqType::Bool),
            "INT64" | "INTEGER" => Ok(BqType::Int64),
            "FLOAT64" | "FLOAT" => Ok(BqType::Float64),
            "NUMERIC" | "DECIMAL" => Ok(BqType::Numeric),
            "BIGNUMERIC" | "BIGDECIMAL" => Ok(BqType::Bignumeric),
            "STRING" => Ok(BqType::String),
            "BYTES" => Ok(BqType::Bytes),
            "TIMESTAMP" => Ok(BqType::Timestamp),
            "DATE" => Ok(BqType::Date),
            "TIME" => Ok(BqType::Time),
            "DATETIME" => Ok(BqType::Datetime),
            "STRUCT" | "RECORD" => Ok(BqType::Struct),
            other => Err(format!("Unknown BigQuery type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Required,
    Nullable,
    Repeated,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Required => "REQUIRED",
            Mode::Nullable => "NULLABLE",
            Mode::Repeated => "REPEATED",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetField {
    pub name: String,
    #[serde(rename = "type")]
    pub bq_type: BqType,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<TargetField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Canonical path this column was produced from.
    pub source_path: String,
}

impl TargetField {
    fn to_bigquery_json(&self) -> JsonValue {
        let mut entry = JsonMap::new();
        entry.insert("name".to_string(), json!(self.name));
        entry.insert("type".to_string(), json!(self.bq_type.as_str()));
        entry.insert("mode".to_string(), json!(self.mode.as_str()));
        if let Some(precision) = self.precision {
            entry.insert("precision".to_string(), json!(precision.to_string()));
        }
        if let Some(scale) = self.scale {
            entry.insert("scale".to_string(), json!(scale.to_string()));
        }
        if let Some(description) = &self.description {
            entry.insert("description".to_string(), json!(description));
        }
        if !self.fields.is_empty() {
            entry.insert(
                "fields".to_string(),
                JsonValue::Array(self.fields.iter().map(TargetField::to_bigquery_json).collect()),
            );
        }
        JsonValue::Object(entry)
    }
}

/// The mapped schema. Produced once per mapping run and read-only after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSchema {
    dataset_id: String,
    fields: Vec<TargetField>,
}

impl TargetSchema {
    pub fn new(dataset_id: impl Into<String>, fields: Vec<TargetField>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            fields,
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn fields(&self) -> &[TargetField] {
        &self.fields
    }

    /// Visits every column depth-first with its dotted target path and
    /// STRUCT level (top-level columns are level 1).
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&str, &'a TargetField, usize),
    {
        fn inner<'a, F>(fields: &'a [TargetField], parent: &str, level: usize, visit: &mut F)
        where
            F: FnMut(&str, &'a TargetField, usize),
        {
            for field in fields {
                let path = join_path(parent, &field.name);
                visit(&path, field, level);
                inner(&field.fields, &path, level + 1, visit);
            }
        }
        inner(&self.fields, "", 1, visit);
    }

    /// Every column including nested STRUCT members.
    pub fn column_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_, _, _| count += 1);
        count
    }

    pub fn max_depth(&self) -> usize {
        let mut depth = 0;
        self.walk(&mut |_, _, level| depth = depth.max(level));
        depth
    }

    pub fn field(&self, path: &str) -> Option<&TargetField> {
        let mut current = self.fields.as_slice();
        let mut found = None;
        for segment in path.split('.') {
            let field = current.iter().find(|field| field.name == segment)?;
            found = Some(field);
            current = &field.fields;
        }
        found
    }

    /// BigQuery API schema form: an array of `{name, type, mode, fields}`.
    pub fn to_bigquery_json(&self) -> JsonValue {
        JsonValue::Array(
            self.fields
                .iter()
                .map(TargetField::to_bigquery_json)
                .collect(),
        )
    }
}
