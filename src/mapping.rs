//! Canonical → target schema mapping.
//!
//! [`MappingEngine::map_schema`] is a pure function of the canonical schema
//! and the [`MappingRuleSet`]. Resolution per field:
//!
//! 1. The canonical name passes through the naming policy and the
//!    illegal-character policy, then is re-validated as a target identifier.
//! 2. A path override, when present, decides the target type of a scalar.
//! 3. Otherwise the default table applies, with `type_defaults` taking
//!    precedence over the built-in choice for each scalar kind.
//!
//! A list becomes `REPEATED`; a list directly inside a list has no target
//! form. Maps become `REPEATED STRUCT<key, value>`. Structs nested deeper than
//! `max_nesting_depth` fail or collapse to a JSON-encoded `STRING`, depending
//! on the [`DepthPolicy`].

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    builder::DEFAULT_MAX_NESTING_DEPTH,
    error::MappingError,
    naming::{self, IllegalCharacterPolicy, MAX_IDENTIFIER_LENGTH, NamingPolicy},
    target::{BqType, Mode, TargetField, TargetSchema},
    types::{CanonicalSchema, CanonicalType, FieldSpec, join_path},
    validate::ValidationResult,
};

/// Scalar kinds a default target type can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Null,
    Boolean,
    Integer,
    Float,
    Decimal,
    String,
    Bytes,
    Timestamp,
    Datetime,
    Date,
    Time,
}

impl ScalarKind {
    pub fn of(field_type: &CanonicalType) -> Option<Self> {
        Some(match field_type {
            CanonicalType::Null => ScalarKind::Null,
            CanonicalType::Boolean => ScalarKind::Boolean,
            CanonicalType::Integer { .. } => ScalarKind::Integer,
            CanonicalType::Float { .. } => ScalarKind::Float,
            CanonicalType::Decimal { .. } => ScalarKind::Decimal,
            CanonicalType::String => ScalarKind::String,
            CanonicalType::Bytes => ScalarKind::Bytes,
            CanonicalType::Timestamp { tz: Some(_), .. } => ScalarKind::Timestamp,
            CanonicalType::Timestamp { tz: None, .. } => ScalarKind::Datetime,
            CanonicalType::Date => ScalarKind::Date,
            CanonicalType::Time => ScalarKind::Time,
            CanonicalType::Struct { .. }
            | CanonicalType::Array { .. }
            | CanonicalType::Map { .. } => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Null => "null",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Integer => "integer",
            ScalarKind::Float => "float",
            ScalarKind::Decimal => "decimal",
            ScalarKind::String => "string",
            ScalarKind::Bytes => "bytes",
            ScalarKind::Timestamp => "timestamp",
            ScalarKind::Datetime => "datetime",
            ScalarKind::Date => "date",
            ScalarKind::Time => "time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DepthPolicy {
    #[default]
    #[serde(alias = "Fail")]
    Fail,
    #[serde(alias = "CollapseToString")]
    CollapseToString,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRuleSet {
    #[serde(default)]
    pub type_defaults: BTreeMap<ScalarKind, BqType>,
    #[serde(default)]
    pub path_overrides: BTreeMap<String, BqType>,
    pub naming: NamingPolicy,
    pub illegal_characters: IllegalCharacterPolicy,
    pub max_nesting_depth: usize,
    pub depth_policy: DepthPolicy,
    pub max_name_length: usize,
    /// Fill missing column descriptions from the field's name and type.
    #[serde(default)]
    pub generate_descriptions: bool,
}

impl Default for MappingRuleSet {
    fn default() -> Self {
        Self {
            type_defaults: BTreeMap::new(),
            path_overrides: BTreeMap::new(),
            naming: NamingPolicy::default(),
            illegal_characters: IllegalCharacterPolicy::default(),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            depth_policy: DepthPolicy::default(),
            max_name_length: MAX_IDENTIFIER_LENGTH,
            generate_descriptions: false,
        }
    }
}

/// Built-in target type for a scalar.
pub fn default_target_type(field_type: &CanonicalType) -> BqType {
    match field_type {
        CanonicalType::Null | CanonicalType::String => BqType::String,
        CanonicalType::Boolean => BqType::Bool,
        CanonicalType::Integer { .. } => BqType::Int64,
        CanonicalType::Float { .. } => BqType::Float64,
        CanonicalType::Decimal { precision, scale } => {
            if fits_decimal(BqType::Numeric, *precision, *scale) {
                BqType::Numeric
            } else {
                BqType::Bignumeric
            }
        }
        CanonicalType::Bytes => BqType::Bytes,
        CanonicalType::Timestamp { tz: Some(_), .. } => BqType::Timestamp,
        CanonicalType::Timestamp { tz: None, .. } => BqType::Datetime,
        CanonicalType::Date => BqType::Date,
        CanonicalType::Time => BqType::Time,
        CanonicalType::Struct { .. } | CanonicalType::Map { .. } => BqType::Struct,
        CanonicalType::Array { element } => default_target_type(element),
    }
}

/// Whether a `decimal(precision, scale)` fits a parameterised NUMERIC or
/// BIGNUMERIC column without losing digits.
///
/// Both scale and integer digits are bounded separately: NUMERIC(38, 9)
/// leaves 29 digits left of the point, so `decimal(38, 0)` needs BIGNUMERIC.
pub fn fits_decimal(target: BqType, precision: u8, scale: u8) -> bool {
    let Some((max_precision, max_scale)) = target.decimal_limits() else {
        return false;
    };
    scale <= max_scale && precision.saturating_sub(scale) <= max_precision - max_scale
}

/// The outcome of one mapping run.
///
/// The canonical and target schemas are fixed at construction. The
/// validation result can be attached exactly once; after that the record is
/// final.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    canonical_schema: CanonicalSchema,
    target_schema: TargetSchema,
    rules: MappingRuleSet,
    validation: Option<ValidationResult>,
    generated_at: DateTime<Utc>,
}

impl MappingRecord {
    pub fn canonical_schema(&self) -> &CanonicalSchema {
        &self.canonical_schema
    }

    pub fn target_schema(&self) -> &TargetSchema {
        &self.target_schema
    }

    pub fn rules(&self) -> &MappingRuleSet {
        &self.rules
    }

    pub fn validation(&self) -> Option<&ValidationResult> {
        self.validation.as_ref()
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn is_validated(&self) -> bool {
        self.validation.is_some()
    }

    /// Hands the result back if the record was already validated.
    pub fn attach_validation(&mut self, result: ValidationResult) -> Result<(), ValidationResult> {
        if self.validation.is_some() {
            return Err(result);
        }
        self.validation = Some(result);
        Ok(())
    }

    pub fn into_parts(self) -> (CanonicalSchema, TargetSchema) {
        (self.canonical_schema, self.target_schema)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MappingEngine {
    rules: MappingRuleSet,
}

impl MappingEngine {
    pub fn new(rules: MappingRuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &MappingRuleSet {
        &self.rules
    }

    /// Maps and wraps the result in an unvalidated [`MappingRecord`].
    pub fn map(&self, schema: &CanonicalSchema) -> Result<MappingRecord, MappingError> {
        let target_schema = self.map_schema(schema)?;
        Ok(MappingRecord {
            canonical_schema: schema.clone(),
            target_schema,
            rules: self.rules.clone(),
            validation: None,
            generated_at: Utc::now(),
        })
    }

    pub fn map_schema(&self, schema: &CanonicalSchema) -> Result<TargetSchema, MappingError> {
        self.check_rules(schema)?;
        let fields = self.map_fields(schema.fields(), "", 1)?;
        debug!(
            "Mapped {} canonical field(s) of '{}' onto {} top-level column(s)",
            schema.paths().len(),
            schema.dataset_id(),
            fields.len()
        );
        Ok(TargetSchema::new(schema.dataset_id(), fields))
    }

    fn check_rules(&self, schema: &CanonicalSchema) -> Result<(), MappingError> {
        if let Some((kind, _)) = self
            .rules
            .type_defaults
            .iter()
            .find(|(_, target)| **target == BqType::Struct)
        {
            return Err(MappingError::InvalidOverride {
                path: kind.as_str().to_string(),
                message: "a scalar kind cannot default to STRUCT".to_string(),
            });
        }
        let known: HashSet<String> = schema.paths().into_iter().collect();
        if let Some(path) = self
            .rules
            .path_overrides
            .keys()
            .find(|path| !known.contains(*path))
        {
            return Err(MappingError::UnknownOverridePath { path: path.clone() });
        }
        Ok(())
    }

    fn map_fields(
        &self,
        fields: &[FieldSpec],
        parent: &str,
        level: usize,
    ) -> Result<Vec<TargetField>, MappingError> {
        let mut columns = Vec::with_capacity(fields.len());
        for field in fields {
            let path = join_path(parent, &field.name);
            let name = naming::target_identifier(
                &path,
                &field.name,
                self.rules.naming,
                self.rules.illegal_characters,
                self.rules.max_name_length,
            )?;
            let mut column = self.map_member(
                name,
                Member {
                    source_path: path.clone(),
                    children_parent: &path,
                    field_type: &field.field_type,
                    nullable: field.nullable,
                    repeated: field.repeated,
                },
                level,
            )?;
            column.description = field.description.clone();
            if column.description.is_none() && self.rules.generate_descriptions {
                column.description = Some(generated_description(field));
            }
            columns.push(column);
        }
        ensure_distinct_names(&columns)?;
        Ok(columns)
    }

    fn map_member(
        &self,
        name: String,
        member: Member<'_>,
        level: usize,
    ) -> Result<TargetField, MappingError> {
        let path = member.source_path.as_str();
        let mut repeated = member.repeated;
        let mut value_type = member.field_type;
        if let CanonicalType::Array { element } = value_type {
            if repeated {
                return Err(MappingError::NestedRepetition {
                    path: path.to_string(),
                });
            }
            repeated = true;
            value_type = element;
        }
        if repeated && matches!(value_type, CanonicalType::Array { .. } | CanonicalType::Map { .. })
        {
            return Err(MappingError::NestedRepetition {
                path: path.to_string(),
            });
        }

        let mut column = TargetField {
            name,
            bq_type: BqType::String,
            mode: Mode::Nullable,
            fields: Vec::new(),
            precision: None,
            scale: None,
            description: None,
            source_path: path.to_string(),
        };

        if let Some(target) = self.rules.path_overrides.get(path) {
            if !value_type.is_scalar() {
                return Err(MappingError::InvalidOverride {
                    path: path.to_string(),
                    message: format!("only scalar fields can be overridden, found {value_type}"),
                });
            }
            if *target == BqType::Struct {
                return Err(MappingError::InvalidOverride {
                    path: path.to_string(),
                    message: "a scalar field cannot become a STRUCT".to_string(),
                });
            }
            column.bq_type = *target;
            set_decimal_parameters(&mut column, value_type);
        } else {
            match value_type {
                CanonicalType::Struct { fields } => {
                    if !self.within_depth(path, level)? {
                        column.bq_type = BqType::String;
                    } else {
                        column.bq_type = BqType::Struct;
                        column.fields = self.map_fields(fields, member.children_parent, level + 1)?;
                    }
                }
                CanonicalType::Map { key, value } => {
                    if !self.within_depth(path, level)? {
                        column.bq_type = BqType::String;
                    } else {
                        column.bq_type = BqType::Struct;
                        repeated = true;
                        let key_member = self.map_member(
                            "key".to_string(),
                            Member {
                                source_path: format!("{path}.{{key}}"),
                                children_parent: member.children_parent,
                                field_type: key,
                                nullable: false,
                                repeated: false,
                            },
                            level + 1,
                        )?;
                        let value_member = self.map_member(
                            "value".to_string(),
                            Member {
                                source_path: format!("{path}.{{value}}"),
                                children_parent: member.children_parent,
                                field_type: value,
                                nullable: true,
                                repeated: false,
                            },
                            level + 1,
                        )?;
                        column.fields = vec![key_member, value_member];
                    }
                }
                scalar => {
                    let kind = ScalarKind::of(scalar);
                    column.bq_type = kind
                        .and_then(|kind| self.rules.type_defaults.get(&kind).copied())
                        .unwrap_or_else(|| default_target_type(scalar));
                    set_decimal_parameters(&mut column, scalar);
                }
            }
        }

        column.mode = if repeated {
            Mode::Repeated
        } else if member.nullable || matches!(value_type, CanonicalType::Null) {
            Mode::Nullable
        } else {
            Mode::Required
        };
        Ok(column)
    }

    /// False when the struct at `level` must collapse; errors under
    /// [`DepthPolicy::Fail`].
    fn within_depth(&self, path: &str, level: usize) -> Result<bool, MappingError> {
        if level < self.rules.max_nesting_depth {
            return Ok(true);
        }
        match self.rules.depth_policy {
            DepthPolicy::Fail => Err(MappingError::NestingTooDeep {
                path: path.to_string(),
                limit: self.rules.max_nesting_depth,
            }),
            DepthPolicy::CollapseToString => {
                debug!("Collapsing '{path}' to a JSON-encoded STRING column");
                Ok(false)
            }
        }
    }
}

struct Member<'a> {
    source_path: String,
    /// Parent path for nested canonical fields; map members share the map's.
    children_parent: &'a str,
    field_type: &'a CanonicalType,
    nullable: bool,
    repeated: bool,
}

/// `unit_price` → "Unit price stored as decimal(10,2) value. Required field."
fn generated_description(field: &FieldSpec) -> String {
    let words = field.name.replace('_', " ").to_lowercase();
    let mut chars = words.chars();
    let label: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    let presence = if field.repeated {
        "Repeated"
    } else if field.nullable {
        "Nullable"
    } else {
        "Required"
    };
    format!("{label} stored as {} value. {presence} field.", field.field_type)
}

fn set_decimal_parameters(column: &mut TargetField, canonical: &CanonicalType) {
    if let CanonicalType::Decimal { precision, scale } = canonical {
        if fits_decimal(column.bq_type, *precision, *scale) {
            column.precision = Some(*precision);
            column.scale = Some(*scale);
        }
    }
}

/// Target identifiers are case-insensitive, so siblings may not differ by
/// case alone.
fn ensure_distinct_names(columns: &[TargetField]) -> Result<(), MappingError> {
    let groups = columns
        .iter()
        .map(|column| (column.name.to_ascii_lowercase(), column))
        .into_group_map();
    let collision = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .sorted_by(|(left, _), (right, _)| left.cmp(right))
        .next();
    match collision {
        Some((_, members)) => Err(MappingError::NameCollision {
            name: members[0].name.clone(),
            paths: members
                .iter()
                .map(|column| column.source_path.clone())
                .collect(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeUnit;
    use proptest::prelude::*;

    fn schema(fields: Vec<FieldSpec>) -> CanonicalSchema {
        CanonicalSchema::new("orders", fields).unwrap()
    }

    fn engine() -> MappingEngine {
        MappingEngine::default()
    }

    #[test]
    fn default_table_covers_scalars() {
        let mapped = engine()
            .map_schema(&schema(vec![
                FieldSpec::new("flag", CanonicalType::Boolean),
                FieldSpec::new("count", CanonicalType::int64()),
                FieldSpec::new("ratio", CanonicalType::float64()).nullable(),
                FieldSpec::new("price", CanonicalType::decimal(12, 2).unwrap()),
                FieldSpec::new("huge", CanonicalType::decimal(50, 20).unwrap()),
                FieldSpec::new("seen_at", CanonicalType::timestamp_utc(TimeUnit::Micros)),
                FieldSpec::new("local_at", CanonicalType::naive_timestamp(TimeUnit::Micros)),
                FieldSpec::new("day", CanonicalType::Date),
                FieldSpec::new("clock", CanonicalType::Time),
                FieldSpec::new("unknown", CanonicalType::Null),
            ]))
            .unwrap();
        let types: Vec<(BqType, Mode)> = mapped
            .fields()
            .iter()
            .map(|column| (column.bq_type, column.mode))
            .collect();
        assert_eq!(
            types,
            vec![
                (BqType::Bool, Mode::Required),
                (BqType::Int64, Mode::Required),
                (BqType::Float64, Mode::Nullable),
                (BqType::Numeric, Mode::Required),
                (BqType::Bignumeric, Mode::Required),
                (BqType::Timestamp, Mode::Required),
                (BqType::Datetime, Mode::Required),
                (BqType::Date, Mode::Required),
                (BqType::Time, Mode::Required),
                (BqType::String, Mode::Nullable),
            ]
        );
        assert_eq!(mapped.fields()[3].precision, Some(12));
        assert_eq!(mapped.fields()[4].precision, None);
    }

    #[test]
    fn numeric_needs_room_left_of_the_point() {
        let mapped = engine()
            .map_schema(&schema(vec![
                FieldSpec::new("wide", CanonicalType::decimal(38, 9).unwrap()),
                FieldSpec::new("whole", CanonicalType::decimal(38, 0).unwrap()),
                FieldSpec::new("edge", CanonicalType::decimal(29, 0).unwrap()),
            ]))
            .unwrap();
        let types: Vec<BqType> = mapped.fields().iter().map(|column| column.bq_type).collect();
        assert_eq!(types, vec![BqType::Numeric, BqType::Bignumeric, BqType::Numeric]);
        assert_eq!(mapped.fields()[1].precision, Some(38));
        assert_eq!(mapped.fields()[1].scale, Some(0));
    }

    #[test]
    fn date_and_time_literals_map_to_date_and_time_columns() {
        use crate::builder::SchemaBuilder;
        use crate::document::GenericDocument;
        use serde_json::json;

        let document = GenericDocument::from_json(json!([
            {"day": "2024-02-29", "opens": "08:30:00"},
            {"day": "2024-03-01", "opens": "09:15:30.250"},
        ]));
        let (canonical, _) = SchemaBuilder::default().build("shops", &document).unwrap();
        assert_eq!(canonical.field("day").unwrap().field_type, CanonicalType::Date);
        assert_eq!(canonical.field("opens").unwrap().field_type, CanonicalType::Time);

        let mapped = engine().map_schema(&canonical).unwrap();
        assert_eq!(mapped.fields()[0].bq_type, BqType::Date);
        assert_eq!(mapped.fields()[1].bq_type, BqType::Time);
    }

    #[test]
    fn descriptions_are_generated_only_when_missing_and_enabled() {
        let fields = vec![
            FieldSpec::new("unit_price", CanonicalType::decimal(10, 2).unwrap()),
            FieldSpec::new("note", CanonicalType::String)
                .nullable()
                .with_description("Free text"),
            FieldSpec::new("tags", CanonicalType::String).repeated(),
        ];
        let plain = engine().map_schema(&schema(fields.clone())).unwrap();
        assert_eq!(plain.fields()[0].description, None);

        let rules = MappingRuleSet {
            generate_descriptions: true,
            ..MappingRuleSet::default()
        };
        let described = MappingEngine::new(rules).map_schema(&schema(fields)).unwrap();
        let descriptions: Vec<&str> = described
            .fields()
            .iter()
            .map(|column| column.description.as_deref().unwrap())
            .collect();
        assert_eq!(
            descriptions,
            vec![
                "Unit price stored as decimal(10,2) value. Required field.",
                "Free text",
                "Tags stored as string value. Repeated field.",
            ]
        );
    }

    #[test]
    fn lists_become_repeated_and_maps_become_key_value_structs() {
        let mapped = engine()
            .map_schema(&schema(vec![
                FieldSpec::new("tags", CanonicalType::String).repeated(),
                FieldSpec::new(
                    "attributes",
                    CanonicalType::map(CanonicalType::String, CanonicalType::int64()),
                ),
            ]))
            .unwrap();
        assert_eq!(mapped.fields()[0].mode, Mode::Repeated);
        let attributes = &mapped.fields()[1];
        assert_eq!(attributes.bq_type, BqType::Struct);
        assert_eq!(attributes.mode, Mode::Repeated);
        assert_eq!(attributes.fields[0].name, "key");
        assert_eq!(attributes.fields[0].mode, Mode::Required);
        assert_eq!(attributes.fields[1].mode, Mode::Nullable);
    }

    #[test]
    fn list_of_lists_is_rejected() {
        let err = engine()
            .map_schema(&schema(vec![
                FieldSpec::new("matrix", CanonicalType::array(CanonicalType::int64())).repeated(),
            ]))
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::NestedRepetition {
                path: "matrix".to_string()
            }
        );
    }

    #[test]
    fn case_insensitive_collisions_list_all_paths() {
        let err = engine()
            .map_schema(&schema(vec![
                FieldSpec::new("Order Id", CanonicalType::int64()),
                FieldSpec::new("order_id", CanonicalType::int64()),
            ]))
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::NameCollision {
                name: "order_id".to_string(),
                paths: vec!["Order Id".to_string(), "order_id".to_string()],
            }
        );
    }

    #[test]
    fn overrides_apply_to_scalars_only() {
        let rules = MappingRuleSet {
            path_overrides: BTreeMap::from([("amount".to_string(), BqType::Bignumeric)]),
            ..MappingRuleSet::default()
        };
        let mapped = MappingEngine::new(rules)
            .map_schema(&schema(vec![FieldSpec::new(
                "amount",
                CanonicalType::decimal(10, 2).unwrap(),
            )]))
            .unwrap();
        assert_eq!(mapped.fields()[0].bq_type, BqType::Bignumeric);

        let struct_rules = MappingRuleSet {
            path_overrides: BTreeMap::from([("customer".to_string(), BqType::String)]),
            ..MappingRuleSet::default()
        };
        let err = MappingEngine::new(struct_rules)
            .map_schema(&schema(vec![FieldSpec::new(
                "customer",
                CanonicalType::Struct {
                    fields: vec![FieldSpec::new("id", CanonicalType::int64())],
                },
            )]))
            .unwrap_err();
        assert!(matches!(err, MappingError::InvalidOverride { .. }));

        let unknown_rules = MappingRuleSet {
            path_overrides: BTreeMap::from([("missing".to_string(), BqType::String)]),
            ..MappingRuleSet::default()
        };
        let err = MappingEngine::new(unknown_rules)
            .map_schema(&schema(vec![FieldSpec::new("id", CanonicalType::int64())]))
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::UnknownOverridePath {
                path: "missing".to_string()
            }
        );
    }

    #[test]
    fn deep_structs_fail_or_collapse() {
        let nested = FieldSpec::new(
            "outer",
            CanonicalType::Struct {
                fields: vec![FieldSpec::new(
                    "inner",
                    CanonicalType::Struct {
                        fields: vec![FieldSpec::new("leaf", CanonicalType::int64())],
                    },
                )],
            },
        );
        let strict = MappingRuleSet {
            max_nesting_depth: 2,
            ..MappingRuleSet::default()
        };
        let err = MappingEngine::new(strict.clone())
            .map_schema(&schema(vec![nested.clone()]))
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::NestingTooDeep {
                path: "outer.inner".to_string(),
                limit: 2
            }
        );

        let collapsing = MappingRuleSet {
            depth_policy: DepthPolicy::CollapseToString,
            ..strict
        };
        let mapped = MappingEngine::new(collapsing)
            .map_schema(&schema(vec![nested]))
            .unwrap();
        let inner = mapped.field("outer.inner").unwrap();
        assert_eq!(inner.bq_type, BqType::String);
        assert!(inner.fields.is_empty());
    }

    #[test]
    fn validation_attaches_once() {
        let mut record = engine()
            .map(&schema(vec![FieldSpec::new("id", CanonicalType::int64())]))
            .unwrap();
        assert!(record.attach_validation(ValidationResult::default()).is_ok());
        assert!(record.attach_validation(ValidationResult::default()).is_err());
    }

    fn any_type() -> impl Strategy<Value = CanonicalType> {
        let scalar = prop_oneof![
            Just(CanonicalType::Null),
            Just(CanonicalType::Boolean),
            Just(CanonicalType::int64()),
            Just(CanonicalType::float64()),
            (1u8..=76, 0u8..=38).prop_filter_map("scale within precision", |(p, s)| {
                CanonicalType::decimal(p, s).ok()
            }),
            Just(CanonicalType::String),
            Just(CanonicalType::Bytes),
            Just(CanonicalType::timestamp_utc(TimeUnit::Nanos)),
            Just(CanonicalType::naive_timestamp(TimeUnit::Millis)),
            Just(CanonicalType::Date),
            Just(CanonicalType::Time),
        ];
        scalar.prop_recursive(3, 12, 3, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 1..3).prop_map(|types| {
                    CanonicalType::Struct {
                        fields: types
                            .into_iter()
                            .enumerate()
                            .map(|(idx, ty)| FieldSpec::new(format!("f{idx}"), ty))
                            .collect(),
                    }
                }),
                inner.clone().prop_map(|value| CanonicalType::map(CanonicalType::String, value)),
            ]
        })
    }

    proptest! {
        #[test]
        fn every_type_maps_to_exactly_one_target(field_type in any_type()) {
            let mapped = engine()
                .map_schema(&schema(vec![FieldSpec::new("value", field_type.clone())]))
                .expect("default rules map every non-nested type");
            prop_assert_eq!(mapped.fields().len(), 1);
            prop_assert_eq!(mapped.fields()[0].bq_type, default_target_type(&field_type));
        }

        #[test]
        fn mapping_is_deterministic(field_type in any_type()) {
            let canonical = schema(vec![FieldSpec::new("value", field_type)]);
            prop_assert_eq!(
                engine().map_schema(&canonical).expect("first mapping"),
                engine().map_schema(&canonical).expect("second mapping")
            );
        }
    }
}
