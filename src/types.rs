//! Canonical type system shared by every stage of the pipeline.
//!
//! This module owns [`CanonicalType`] (the closed set of cloud-agnostic
//! types), [`FieldSpec`] and [`CanonicalSchema`], the content digest used for
//! equality checks, and the compatibility lattice:
//!
//! - [`lub`] computes the least upper bound of two types and drives inference
//!   when observed values disagree.
//! - [`widens_to`] decides whether a type change moves strictly up the
//!   lattice, which is what drift classification calls a widening.
//!
//! The numeric chain is `Integer ⊂ Float ⊂ Decimal ⊂ String`; scalars of
//! unrelated categories meet at `String`, while mixing a scalar with a
//! struct, array, or map has no upper bound.

use std::{cmp, collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SchemaInferenceError, TypeError};

pub const DECIMAL_MAX_PRECISION: u8 = 76;
pub const DECIMAL_MAX_SCALE: u8 = 38;
/// Integer digits needed to hold any signed 64-bit value.
const INT64_DIGITS: u8 = 19;
/// Integer digits a float is assumed to need when widened into a decimal.
const FLOAT_DECIMAL_DIGITS: u8 = 29;
const FLOAT_DECIMAL_SCALE: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Millis => "ms",
            TimeUnit::Micros => "us",
            TimeUnit::Nanos => "ns",
        }
    }

    /// Smallest unit able to carry `digits` fractional-second digits.
    pub fn for_fraction_digits(digits: usize) -> Self {
        match digits {
            0 => TimeUnit::Seconds,
            1..=3 => TimeUnit::Millis,
            4..=6 => TimeUnit::Micros,
            _ => TimeUnit::Nanos,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Ok(TimeUnit::Seconds),
            "ms" | "milli" | "millis" | "milliseconds" => Ok(TimeUnit::Millis),
            "us" | "micro" | "micros" | "microseconds" => Ok(TimeUnit::Micros),
            "ns" | "nano" | "nanos" | "nanoseconds" => Ok(TimeUnit::Nanos),
            other => Err(TypeError::InvalidTimeUnit(other.to_string())),
        }
    }
}

/// Coarse grouping of canonical types used by the lattice and by consumers
/// that only care about the shape of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Null,
    Boolean,
    Numeric,
    String,
    Bytes,
    Temporal,
    Struct,
    Array,
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalType {
    Null,
    Boolean,
    Integer {
        bits: u8,
    },
    Float {
        bits: u8,
    },
    Decimal {
        precision: u8,
        scale: u8,
    },
    String,
    Bytes,
    Timestamp {
        unit: TimeUnit,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    Date,
    Time,
    Struct {
        fields: Vec<FieldSpec>,
    },
    Array {
        element: Box<CanonicalType>,
    },
    Map {
        key: Box<CanonicalType>,
        value: Box<CanonicalType>,
    },
}

impl CanonicalType {
    pub const fn int64() -> Self {
        CanonicalType::Integer { bits: 64 }
    }

    pub const fn float64() -> Self {
        CanonicalType::Float { bits: 64 }
    }

    pub fn decimal(precision: u8, scale: u8) -> Result<Self, TypeError> {
        if precision == 0
            || precision > DECIMAL_MAX_PRECISION
            || scale > DECIMAL_MAX_SCALE
            || scale > precision
        {
            return Err(TypeError::DecimalOutOfRange {
                precision: precision.into(),
                scale: scale.into(),
            });
        }
        Ok(CanonicalType::Decimal { precision, scale })
    }

    pub fn timestamp_utc(unit: TimeUnit) -> Self {
        CanonicalType::Timestamp {
            unit,
            tz: Some("UTC".to_string()),
        }
    }

    pub fn naive_timestamp(unit: TimeUnit) -> Self {
        CanonicalType::Timestamp { unit, tz: None }
    }

    pub fn array(element: CanonicalType) -> Self {
        CanonicalType::Array {
            element: Box::new(element),
        }
    }

    pub fn map(key: CanonicalType, value: CanonicalType) -> Self {
        CanonicalType::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            CanonicalType::Null => TypeCategory::Null,
            CanonicalType::Boolean => TypeCategory::Boolean,
            CanonicalType::Integer { .. }
            | CanonicalType::Float { .. }
            | CanonicalType::Decimal { .. } => TypeCategory::Numeric,
            CanonicalType::String => TypeCategory::String,
            CanonicalType::Bytes => TypeCategory::Bytes,
            CanonicalType::Timestamp { .. } | CanonicalType::Date | CanonicalType::Time => {
                TypeCategory::Temporal
            }
            CanonicalType::Struct { .. } => TypeCategory::Struct,
            CanonicalType::Array { .. } => TypeCategory::Array,
            CanonicalType::Map { .. } => TypeCategory::Map,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(
            self.category(),
            TypeCategory::Struct | TypeCategory::Array | TypeCategory::Map
        )
    }

    /// Position in the numeric widening chain; `String` sits above all of it.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            CanonicalType::Integer { .. } => Some(0),
            CanonicalType::Float { .. } => Some(1),
            CanonicalType::Decimal { .. } => Some(2),
            CanonicalType::String => Some(3),
            _ => None,
        }
    }

    /// Number of container levels below this type. Scalars are 0.
    pub fn nesting_depth(&self) -> usize {
        match self {
            CanonicalType::Struct { fields } => {
                1 + fields
                    .iter()
                    .map(|field| field.field_type.nesting_depth())
                    .max()
                    .unwrap_or(0)
            }
            CanonicalType::Array { element } => 1 + element.nesting_depth(),
            CanonicalType::Map { key, value } => {
                1 + cmp::max(key.nesting_depth(), value.nesting_depth())
            }
            _ => 0,
        }
    }

    pub fn struct_fields(&self) -> Option<&[FieldSpec]> {
        match self {
            CanonicalType::Struct { fields } => Some(fields),
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Null => f.write_str("null"),
            CanonicalType::Boolean => f.write_str("boolean"),
            CanonicalType::Integer { bits: 64 } => f.write_str("integer"),
            CanonicalType::Integer { bits } => write!(f, "int{bits}"),
            CanonicalType::Float { bits: 64 } => f.write_str("float"),
            CanonicalType::Float { bits } => write!(f, "float{bits}"),
            CanonicalType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            CanonicalType::String => f.write_str("string"),
            CanonicalType::Bytes => f.write_str("bytes"),
            CanonicalType::Timestamp { unit, tz: Some(tz) } => {
                if *unit == TimeUnit::Micros && tz == "UTC" {
                    f.write_str("timestamp")
                } else {
                    write!(f, "timestamp({},{tz})", unit.as_str())
                }
            }
            CanonicalType::Timestamp { unit, tz: None } => {
                if *unit == TimeUnit::Micros {
                    f.write_str("datetime")
                } else {
                    write!(f, "datetime({})", unit.as_str())
                }
            }
            CanonicalType::Date => f.write_str("date"),
            CanonicalType::Time => f.write_str("time"),
            CanonicalType::Struct { fields } => {
                f.write_str("struct<")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", field.name, field.field_type)?;
                }
                f.write_str(">")
            }
            CanonicalType::Array { element } => write!(f, "array<{element}>"),
            CanonicalType::Map { key, value } => write!(f, "map<{key},{value}>"),
        }
    }
}

impl FromStr for CanonicalType {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lowered = trimmed.to_ascii_lowercase();
        let simple = match lowered.as_str() {
            "null" => Some(CanonicalType::Null),
            "bool" | "boolean" => Some(CanonicalType::Boolean),
            "int" | "integer" | "int64" | "long" => Some(CanonicalType::int64()),
            "int8" => Some(CanonicalType::Integer { bits: 8 }),
            "int16" => Some(CanonicalType::Integer { bits: 16 }),
            "int32" => Some(CanonicalType::Integer { bits: 32 }),
            "float" | "float64" | "double" => Some(CanonicalType::float64()),
            "float32" => Some(CanonicalType::Float { bits: 32 }),
            "numeric" => Some(CanonicalType::Decimal {
                precision: 38,
                scale: 9,
            }),
            "bignumeric" => Some(CanonicalType::Decimal {
                precision: DECIMAL_MAX_PRECISION,
                scale: DECIMAL_MAX_SCALE,
            }),
            "string" | "str" | "text" => Some(CanonicalType::String),
            "bytes" | "binary" => Some(CanonicalType::Bytes),
            "timestamp" => Some(CanonicalType::timestamp_utc(TimeUnit::Micros)),
            "datetime" => Some(CanonicalType::naive_timestamp(TimeUnit::Micros)),
            "date" => Some(CanonicalType::Date),
            "time" => Some(CanonicalType::Time),
            _ => None,
        };
        if let Some(parsed) = simple {
            return Ok(parsed);
        }

        if let Some(args) = parenthesized(trimmed, "decimal") {
            let parts = split_top_level(args);
            if parts.len() != 2 {
                return Err(TypeError::InvalidSignature(trimmed.to_string()));
            }
            let precision = parse_u8(parts[0], trimmed)?;
            let scale = parse_u8(parts[1], trimmed)?;
            return CanonicalType::decimal(precision, scale);
        }
        if let Some(args) = parenthesized(trimmed, "timestamp") {
            let parts = split_top_level(args);
            return match parts.as_slice() {
                [unit] => Ok(CanonicalType::timestamp_utc(unit.parse()?)),
                [unit, tz] => Ok(CanonicalType::Timestamp {
                    unit: unit.parse()?,
                    tz: Some(tz.trim().to_string()),
                }),
                _ => Err(TypeError::InvalidSignature(trimmed.to_string())),
            };
        }
        if let Some(args) = parenthesized(trimmed, "datetime") {
            return Ok(CanonicalType::naive_timestamp(args.parse()?));
        }
        if let Some(inner) = angled(trimmed, "array") {
            return Ok(CanonicalType::array(inner.parse()?));
        }
        if let Some(inner) = angled(trimmed, "map") {
            let parts = split_top_level(inner);
            if let [key, value] = parts.as_slice() {
                return Ok(CanonicalType::map(key.parse()?, value.parse()?));
            }
        }
        Err(TypeError::InvalidSignature(trimmed.to_string()))
    }
}

fn parse_u8(token: &str, signature: &str) -> Result<u8, TypeError> {
    token
        .trim()
        .parse::<u8>()
        .map_err(|_| TypeError::InvalidSignature(signature.to_string()))
}

fn parenthesized<'a>(value: &'a str, keyword: &str) -> Option<&'a str> {
    wrapped(value, keyword, '(', ')')
}

fn angled<'a>(value: &'a str, keyword: &str) -> Option<&'a str> {
    wrapped(value, keyword, '<', '>')
}

fn wrapped<'a>(value: &'a str, keyword: &str, open: char, close: char) -> Option<&'a str> {
    let head = value.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    value[keyword.len()..]
        .trim_start()
        .strip_prefix(open)?
        .strip_suffix(close)
}

/// Splits on commas that are not inside `<...>` or `(...)`.
fn split_top_level(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in value.char_indices() {
        match ch {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CanonicalType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl FieldSpec {
    /// A required, non-repeated field.
    pub fn new(name: impl Into<String>, field_type: CanonicalType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            repeated: false,
            description: None,
            source_path: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Required in the warehouse sense: present, non-null, single-valued.
    pub fn is_required(&self) -> bool {
        !self.nullable && !self.repeated
    }
}

/// Joins a parent path and a child name with `.`.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Fields nested directly below `field_type`, looking through arrays and map values.
pub fn child_fields(field_type: &CanonicalType) -> Option<&[FieldSpec]> {
    match field_type {
        CanonicalType::Struct { fields } => Some(fields),
        CanonicalType::Array { element } => child_fields(element),
        CanonicalType::Map { value, .. } => child_fields(value),
        _ => None,
    }
}

/// Visits every field in depth-first order with its dotted path and level
/// (top-level fields are level 1).
pub fn walk_fields<'a, F>(fields: &'a [FieldSpec], visit: &mut F)
where
    F: FnMut(&str, &'a FieldSpec, usize),
{
    walk_inner(fields, "", 1, visit);
}

fn walk_inner<'a, F>(fields: &'a [FieldSpec], parent: &str, level: usize, visit: &mut F)
where
    F: FnMut(&str, &'a FieldSpec, usize),
{
    for field in fields {
        let path = join_path(parent, &field.name);
        visit(&path, field, level);
        if let Some(children) = child_fields(&field.field_type) {
            walk_inner(children, &path, level + 1, visit);
        }
    }
}

/// A validated field tree with its content hash.
///
/// Deserialization goes through [`CanonicalSchema::new`]: names are checked
/// and the hash is recomputed, so a stored `schema_hash` is never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCanonicalSchema")]
pub struct CanonicalSchema {
    dataset_id: String,
    fields: Vec<FieldSpec>,
    schema_hash: String,
}

#[derive(Deserialize)]
struct RawCanonicalSchema {
    dataset_id: String,
    fields: Vec<FieldSpec>,
}

impl TryFrom<RawCanonicalSchema> for CanonicalSchema {
    type Error = SchemaInferenceError;

    fn try_from(raw: RawCanonicalSchema) -> Result<Self, Self::Error> {
        CanonicalSchema::new(raw.dataset_id, raw.fields)
    }
}

impl CanonicalSchema {
    pub fn new(
        dataset_id: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<Self, SchemaInferenceError> {
        ensure_unique_names(&fields, "")?;
        let schema_hash = compute_schema_hash(&fields);
        Ok(Self {
            dataset_id: dataset_id.into(),
            fields,
            schema_hash,
        })
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn schema_hash(&self) -> &str {
        &self.schema_hash
    }

    pub fn into_fields(self) -> Vec<FieldSpec> {
        self.fields
    }

    /// Looks up a field by dotted path.
    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        let mut current: &[FieldSpec] = &self.fields;
        let mut found = None;
        for segment in path.split('.') {
            let field = current.iter().find(|field| field.name == segment)?;
            found = Some(field);
            current = child_fields(&field.field_type).unwrap_or(&[]);
        }
        found
    }

    /// Deepest field level; a flat schema has depth 1, an empty one 0.
    pub fn max_depth(&self) -> usize {
        self.fields
            .iter()
            .map(|field| 1 + field.field_type.nesting_depth())
            .max()
            .unwrap_or(0)
    }

    /// Every field path in depth-first order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        walk_fields(&self.fields, &mut |path, _, _| paths.push(path.to_string()));
        paths
    }
}

fn ensure_unique_names(fields: &[FieldSpec], parent: &str) -> Result<(), SchemaInferenceError> {
    let mut seen = HashSet::new();
    for field in fields {
        let path = join_path(parent, &field.name);
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaInferenceError::DuplicateField { path });
        }
        if let Some(children) = child_fields(&field.field_type) {
            ensure_unique_names(children, &path)?;
        }
    }
    Ok(())
}

/// SHA-256 over the normalized field list: names, types, nullability, and
/// repetition only, with fields sorted by name at every level.
pub fn compute_schema_hash(fields: &[FieldSpec]) -> String {
    let normalized = normalize_fields(fields);
    let payload = serde_json::to_vec(&normalized).unwrap_or_default();
    let digest = Sha256::digest(&payload);
    format!("{digest:x}")
}

fn normalize_fields(fields: &[FieldSpec]) -> Vec<FieldSpec> {
    let mut normalized: Vec<FieldSpec> = fields
        .iter()
        .map(|field| FieldSpec {
            name: field.name.clone(),
            field_type: normalize_type(&field.field_type),
            nullable: field.nullable,
            repeated: field.repeated,
            description: None,
            source_path: None,
        })
        .collect();
    normalized.sort_by(|a, b| a.name.cmp(&b.name));
    normalized
}

fn normalize_type(field_type: &CanonicalType) -> CanonicalType {
    match field_type {
        CanonicalType::Struct { fields } => CanonicalType::Struct {
            fields: normalize_fields(fields),
        },
        CanonicalType::Array { element } => CanonicalType::array(normalize_type(element)),
        CanonicalType::Map { key, value } => {
            CanonicalType::map(normalize_type(key), normalize_type(value))
        }
        other => other.clone(),
    }
}

/// The two sides of a failed [`lub`], with the path below the starting
/// point where they met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConflict {
    pub path: Vec<String>,
    pub left: CanonicalType,
    pub right: CanonicalType,
}

impl TypeConflict {
    fn at(left: &CanonicalType, right: &CanonicalType) -> Self {
        Self {
            path: Vec::new(),
            left: left.clone(),
            right: right.clone(),
        }
    }

    fn under(mut self, segment: &str) -> Self {
        self.path.insert(0, segment.to_string());
        self
    }
}

/// Least upper bound of two canonical types.
pub fn lub(a: &CanonicalType, b: &CanonicalType) -> Result<CanonicalType, TypeConflict> {
    if a == b {
        return Ok(a.clone());
    }
    match (a, b) {
        (CanonicalType::Null, other) | (other, CanonicalType::Null) => Ok(other.clone()),
        (CanonicalType::Struct { fields: left }, CanonicalType::Struct { fields: right }) => {
            Ok(CanonicalType::Struct {
                fields: merge_struct_fields(left, right)?,
            })
        }
        (CanonicalType::Array { element: left }, CanonicalType::Array { element: right }) => {
            let element = lub(left, right).map_err(|conflict| conflict.under("[]"))?;
            Ok(CanonicalType::array(element))
        }
        (
            CanonicalType::Map {
                key: left_key,
                value: left_value,
            },
            CanonicalType::Map {
                key: right_key,
                value: right_value,
            },
        ) => {
            let key = lub(left_key, right_key).map_err(|conflict| conflict.under("{key}"))?;
            let value =
                lub(left_value, right_value).map_err(|conflict| conflict.under("{value}"))?;
            Ok(CanonicalType::map(key, value))
        }
        (left, right) if left.is_scalar() && right.is_scalar() => Ok(scalar_lub(left, right)),
        (left, right) => Err(TypeConflict::at(left, right)),
    }
}

fn merge_struct_fields(
    left: &[FieldSpec],
    right: &[FieldSpec],
) -> Result<Vec<FieldSpec>, TypeConflict> {
    let mut merged: Vec<FieldSpec> = Vec::with_capacity(cmp::max(left.len(), right.len()));
    for field in left {
        match right.iter().find(|candidate| candidate.name == field.name) {
            Some(other) => {
                let field_type = lub(&field.field_type, &other.field_type)
                    .map_err(|conflict| conflict.under(&field.name))?;
                merged.push(FieldSpec {
                    field_type,
                    nullable: field.nullable || other.nullable,
                    repeated: field.repeated || other.repeated,
                    ..field.clone()
                });
            }
            None => merged.push(FieldSpec {
                nullable: true,
                ..field.clone()
            }),
        }
    }
    for field in right {
        if !left.iter().any(|candidate| candidate.name == field.name) {
            merged.push(FieldSpec {
                nullable: true,
                ..field.clone()
            });
        }
    }
    Ok(merged)
}

fn scalar_lub(a: &CanonicalType, b: &CanonicalType) -> CanonicalType {
    use CanonicalType as T;
    match (a, b) {
        (T::Integer { bits: left }, T::Integer { bits: right }) => T::Integer {
            bits: cmp::max(*left, *right),
        },
        (T::Float { bits: left }, T::Float { bits: right }) => T::Float {
            bits: cmp::max(*left, *right),
        },
        (T::Integer { .. }, T::Float { .. }) | (T::Float { .. }, T::Integer { .. }) => {
            T::float64()
        }
        (
            T::Decimal {
                precision: lp,
                scale: ls,
            },
            T::Decimal {
                precision: rp,
                scale: rs,
            },
        ) => widen_decimal(
            cmp::max(lp.saturating_sub(*ls), rp.saturating_sub(*rs)),
            cmp::max(*ls, *rs),
        ),
        (T::Integer { .. }, T::Decimal { precision, scale })
        | (T::Decimal { precision, scale }, T::Integer { .. }) => {
            widen_decimal(cmp::max(precision.saturating_sub(*scale), INT64_DIGITS), *scale)
        }
        (T::Float { .. }, T::Decimal { precision, scale })
        | (T::Decimal { precision, scale }, T::Float { .. }) => widen_decimal(
            cmp::max(precision.saturating_sub(*scale), FLOAT_DECIMAL_DIGITS),
            cmp::max(*scale, FLOAT_DECIMAL_SCALE),
        ),
        (T::Date, T::Timestamp { .. }) => b.clone(),
        (T::Timestamp { .. }, T::Date) => a.clone(),
        (
            T::Timestamp {
                unit: left_unit,
                tz: left_tz,
            },
            T::Timestamp {
                unit: right_unit,
                tz: right_tz,
            },
        ) => {
            let unit = cmp::max(*left_unit, *right_unit);
            match (left_tz, right_tz) {
                (None, None) => T::naive_timestamp(unit),
                (Some(left), Some(right)) if left == right => T::Timestamp {
                    unit,
                    tz: Some(left.clone()),
                },
                (Some(_), Some(_)) => T::timestamp_utc(unit),
                _ => T::String,
            }
        }
        _ => T::String,
    }
}

fn widen_decimal(integer_digits: u8, scale: u8) -> CanonicalType {
    let precision = u16::from(integer_digits) + u16::from(scale);
    if precision > u16::from(DECIMAL_MAX_PRECISION) || scale > DECIMAL_MAX_SCALE {
        return CanonicalType::String;
    }
    CanonicalType::Decimal {
        precision: precision as u8,
        scale,
    }
}

/// True when `to` sits strictly above `from`: `Null` is below every scalar,
/// the numeric chain runs integer → float → decimal → string, and within one
/// kind the bound decides (wider integers, larger decimals, finer units).
pub fn widens_to(from: &CanonicalType, to: &CanonicalType) -> bool {
    if from == to || !from.is_scalar() || !to.is_scalar() {
        return false;
    }
    match (from, to) {
        (CanonicalType::Null, _) => return true,
        (_, CanonicalType::Null) => return false,
        _ => {}
    }
    if let (Some(from_rank), Some(to_rank)) = (from.numeric_rank(), to.numeric_rank()) {
        if from_rank != to_rank {
            return to_rank > from_rank;
        }
    }
    if from.category() != to.category() {
        return false;
    }
    matches!(lub(from, to), Ok(ref bound) if bound == to)
}
