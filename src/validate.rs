//! Soundness checks over a [`MappingRecord`].
//!
//! Every check runs; the result carries all errors in discovery order.
//! Errors block acceptance. Warnings flag mappings that keep the data
//! loadable but lose or reshape information (narrower numerics, truncated
//! timestamp precision, collapsed structures) and are recorded without
//! blocking.

use std::collections::{HashMap, HashSet};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    builder::DEFAULT_MAX_NESTING_DEPTH,
    mapping::{MappingRecord, fits_decimal},
    naming,
    target::{BqType, Mode, TargetField, TargetSchema},
    types::{CanonicalSchema, CanonicalType, FieldSpec, TimeUnit, walk_fields},
};

pub const DEFAULT_MAX_COLUMNS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationLimits {
    pub max_columns: usize,
    pub max_nesting_depth: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_columns: DEFAULT_MAX_COLUMNS,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationErrorKind {
    UnmappedField,
    DuplicateMapping,
    ColumnLimitExceeded,
    NestingDepthExceeded,
    IncompatibleTargetType,
    InvalidIdentifier,
    EmptySchema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationWarningKind {
    PrecisionLoss,
    TimestampTruncation,
    TimezoneNormalized,
    StructureCollapsed,
    UntypedField,
    MapEncoded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub kind: ValidationWarningKind,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_blocking(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn has_error(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|error| error.kind == kind)
    }

    pub fn has_warning(&self, kind: ValidationWarningKind) -> bool {
        self.warnings.iter().any(|warning| warning.kind == kind)
    }

    fn error(&mut self, kind: ValidationErrorKind, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            kind,
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn warning(&mut self, kind: ValidationWarningKind, path: &str, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            kind,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: ValidationLimits,
}

impl Validator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    pub fn validate(&self, record: &MappingRecord) -> ValidationResult {
        self.check(record.canonical_schema(), record.target_schema())
    }

    /// [`Validator::validate`] plus checks against the previously accepted
    /// canonical schema. A numeric field that now maps to a decimal too
    /// narrow for values the old type could carry gets a `PrecisionLoss`
    /// warning; the drift itself stays a compatible widening.
    pub fn validate_against(
        &self,
        record: &MappingRecord,
        previous: Option<&CanonicalSchema>,
    ) -> ValidationResult {
        let mut result = self.validate(record);
        if let Some(previous) = previous {
            let before = result.warnings.len();
            check_decimal_range(previous, record.canonical_schema(), &mut result);
            for warning in &result.warnings[before..] {
                warn!("{:?} at '{}': {}", warning.kind, warning.path, warning.message);
            }
        }
        result
    }

    pub fn check(&self, canonical: &CanonicalSchema, target: &TargetSchema) -> ValidationResult {
        let mut result = ValidationResult::default();
        if canonical.fields().is_empty() || target.fields().is_empty() {
            result.error(
                ValidationErrorKind::EmptySchema,
                "",
                "schema has no fields",
            );
        }

        let mut by_source: HashMap<&str, Vec<(String, &TargetField)>> = HashMap::new();
        target.walk(&mut |path, column, _| {
            by_source
                .entry(column.source_path.as_str())
                .or_default()
                .push((path.to_string(), column));
        });

        let mut collapsed: Vec<String> = Vec::new();
        let mut canonical_paths = HashSet::new();
        walk_fields(canonical.fields(), &mut |path, field, _| {
            canonical_paths.insert(path.to_string());
            if collapsed
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
            {
                return;
            }
            match by_source.get(path).map(Vec::as_slice) {
                None | Some([]) => result.error(
                    ValidationErrorKind::UnmappedField,
                    path,
                    "canonical field has no target column",
                ),
                Some([(_, column)]) => {
                    if check_field(path, field, column, &mut result) {
                        collapsed.push(format!("{path}."));
                    }
                }
                Some(columns) => result.error(
                    ValidationErrorKind::DuplicateMapping,
                    path,
                    format!(
                        "canonical field maps to {} target columns: {}",
                        columns.len(),
                        columns
                            .iter()
                            .map(|(target_path, _)| target_path.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ),
            }
        });

        self.check_target_shape(target, &canonical_paths, &mut result);

        for warning in &result.warnings {
            warn!("{:?} at '{}': {}", warning.kind, warning.path, warning.message);
        }
        result
    }

    fn check_target_shape(
        &self,
        target: &TargetSchema,
        canonical_paths: &HashSet<String>,
        result: &mut ValidationResult,
    ) {
        let column_count = target.column_count();
        if column_count > self.limits.max_columns {
            result.error(
                ValidationErrorKind::ColumnLimitExceeded,
                "",
                format!(
                    "{column_count} columns exceed the limit of {}",
                    self.limits.max_columns
                ),
            );
        }

        let mut siblings: HashMap<String, HashSet<String>> = HashMap::new();
        target.walk(&mut |path, column, level| {
            if level > self.limits.max_nesting_depth {
                result.error(
                    ValidationErrorKind::NestingDepthExceeded,
                    path,
                    format!(
                        "column sits at depth {level}, above the limit of {}",
                        self.limits.max_nesting_depth
                    ),
                );
            }
            if !naming::is_valid_identifier(&column.name) {
                result.error(
                    ValidationErrorKind::InvalidIdentifier,
                    path,
                    format!("'{}' is not a valid column name", column.name),
                );
            }
            let parent = path.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("");
            if !siblings
                .entry(parent.to_string())
                .or_default()
                .insert(column.name.to_ascii_lowercase())
            {
                result.error(
                    ValidationErrorKind::DuplicateMapping,
                    path,
                    format!("column name '{}' is used twice at this level", column.name),
                );
            }
            let synthetic = column.source_path.contains('{');
            if !synthetic && !canonical_paths.contains(&column.source_path) {
                result.error(
                    ValidationErrorKind::UnmappedField,
                    path,
                    format!(
                        "target column refers to unknown canonical field '{}'",
                        column.source_path
                    ),
                );
            }
            if column.bq_type == BqType::Struct && column.fields.is_empty() {
                result.error(
                    ValidationErrorKind::IncompatibleTargetType,
                    path,
                    "STRUCT column has no members",
                );
            }
        });
    }
}

/// Checks one canonical/target pair. Returns true when the target collapsed
/// the canonical structure, so nested canonical fields have no columns.
fn check_field(
    path: &str,
    field: &FieldSpec,
    column: &TargetField,
    result: &mut ValidationResult,
) -> bool {
    let (value_type, repeated) = match &field.field_type {
        CanonicalType::Array { element } if !field.repeated => (element.as_ref(), true),
        other => (other, field.repeated),
    };

    if field.nullable && column.mode == Mode::Required {
        result.error(
            ValidationErrorKind::IncompatibleTargetType,
            path,
            "nullable field is mapped to a REQUIRED column",
        );
    }
    let is_map = matches!(value_type, CanonicalType::Map { .. });
    if repeated != (column.mode == Mode::Repeated) && !(is_map && column.bq_type == BqType::Struct)
    {
        result.error(
            ValidationErrorKind::IncompatibleTargetType,
            path,
            format!("repetition differs: canonical repeated={repeated}, column mode {}", column.mode),
        );
    }

    match value_type {
        CanonicalType::Struct { .. } => match column.bq_type {
            BqType::Struct => false,
            BqType::String => {
                result.warning(
                    ValidationWarningKind::StructureCollapsed,
                    path,
                    "struct is stored as a JSON-encoded STRING",
                );
                true
            }
            other => {
                incompatible(result, path, value_type, other);
                false
            }
        },
        CanonicalType::Map { .. } => match column.bq_type {
            BqType::Struct => {
                result.warning(
                    ValidationWarningKind::MapEncoded,
                    path,
                    "map is stored as a REPEATED STRUCT of key/value pairs",
                );
                false
            }
            BqType::String => {
                result.warning(
                    ValidationWarningKind::StructureCollapsed,
                    path,
                    "map is stored as a JSON-encoded STRING",
                );
                true
            }
            other => {
                incompatible(result, path, value_type, other);
                false
            }
        },
        scalar => {
            check_scalar(path, scalar, column, result);
            false
        }
    }
}

/// Decimal digits needed left of the point for any value of `bits`.
fn integer_digits(bits: u8) -> u8 {
    match bits {
        0..=8 => 3,
        9..=16 => 5,
        17..=32 => 10,
        _ => 19,
    }
}

fn check_decimal_range(previous: &CanonicalSchema, current: &CanonicalSchema, result: &mut ValidationResult) {
    walk_fields(current.fields(), &mut |path, field, _| {
        let CanonicalType::Decimal { precision, scale } = field.field_type else {
            return;
        };
        let Some(old) = previous.field(path) else {
            return;
        };
        let room = precision.saturating_sub(scale);
        let message = match old.field_type {
            CanonicalType::Integer { bits } if room < integer_digits(bits) => format!(
                "decimal({precision},{scale}) keeps {room} integer digit(s); earlier {} values may need {}",
                old.field_type,
                integer_digits(bits)
            ),
            CanonicalType::Float { .. } => format!(
                "earlier {} values outside the range of decimal({precision},{scale}) fail to load",
                old.field_type
            ),
            _ => return,
        };
        result.warning(ValidationWarningKind::PrecisionLoss, path, message);
    });
}

fn incompatible(result: &mut ValidationResult, path: &str, canonical: &CanonicalType, target: BqType) {
    result.error(
        ValidationErrorKind::IncompatibleTargetType,
        path,
        format!("{canonical} cannot be stored as {target}"),
    );
}

fn check_scalar(path: &str, canonical: &CanonicalType, column: &TargetField, result: &mut ValidationResult) {
    use ValidationWarningKind::*;
    let target = column.bq_type;
    if target == BqType::Struct {
        incompatible(result, path, canonical, target);
        return;
    }
    match canonical {
        CanonicalType::Null => result.warning(
            UntypedField,
            path,
            format!("only null values were observed; stored as {target}"),
        ),
        CanonicalType::Boolean => {
            if !matches!(target, BqType::Bool | BqType::Int64 | BqType::String) {
                incompatible(result, path, canonical, target);
            }
        }
        CanonicalType::Integer { .. } => match target {
            BqType::Int64 | BqType::Numeric | BqType::Bignumeric | BqType::String => {}
            BqType::Float64 => result.warning(
                PrecisionLoss,
                path,
                "integers beyond 2^53 lose precision in FLOAT64",
            ),
            other => incompatible(result, path, canonical, other),
        },
        CanonicalType::Float { .. } => match target {
            BqType::Float64 | BqType::String => {}
            BqType::Numeric | BqType::Bignumeric => result.warning(
                PrecisionLoss,
                path,
                format!("binary floating point values are rounded into {target}"),
            ),
            BqType::Int64 => result.warning(
                PrecisionLoss,
                path,
                "fractional parts are dropped in INT64",
            ),
            other => incompatible(result, path, canonical, other),
        },
        CanonicalType::Decimal { precision, scale } => match target {
            BqType::String => {}
            decimal if decimal.is_decimal() => {
                if !fits_decimal(decimal, *precision, *scale) {
                    result.warning(
                        PrecisionLoss,
                        path,
                        format!("decimal({precision},{scale}) exceeds the range of {target}"),
                    );
                }
            }
            BqType::Float64 => result.warning(
                PrecisionLoss,
                path,
                format!("decimal({precision},{scale}) is approximated by FLOAT64"),
            ),
            BqType::Int64 => {
                if *scale > 0 || *precision > 18 {
                    result.warning(
                        PrecisionLoss,
                        path,
                        format!("decimal({precision},{scale}) does not fit INT64 exactly"),
                    );
                }
            }
            other => incompatible(result, path, canonical, other),
        },
        CanonicalType::String => {
            if !matches!(target, BqType::String | BqType::Bytes) {
                incompatible(result, path, canonical, target);
            }
        }
        CanonicalType::Bytes => {
            if !matches!(target, BqType::Bytes | BqType::String) {
                incompatible(result, path, canonical, target);
            }
        }
        CanonicalType::Timestamp { unit, tz } => {
            match (target, tz) {
                (BqType::Timestamp, Some(zone)) if zone != "UTC" => result.warning(
                    TimezoneNormalized,
                    path,
                    format!("values in zone {zone} are normalised to UTC"),
                ),
                (BqType::Timestamp, None) => result.warning(
                    TimezoneNormalized,
                    path,
                    "zone-less values are interpreted as UTC",
                ),
                (BqType::Datetime, Some(zone)) => result.warning(
                    TimezoneNormalized,
                    path,
                    format!("zone {zone} is dropped in DATETIME"),
                ),
                (BqType::Date, _) => result.warning(
                    PrecisionLoss,
                    path,
                    "time of day is dropped in DATE",
                ),
                (BqType::Timestamp | BqType::Datetime | BqType::String, _) => {}
                (other, _) => {
                    incompatible(result, path, canonical, other);
                    return;
                }
            }
            if *unit == TimeUnit::Nanos && matches!(target, BqType::Timestamp | BqType::Datetime) {
                result.warning(
                    TimestampTruncation,
                    path,
                    format!("nanosecond precision is truncated to microseconds in {target}"),
                );
            }
        }
        CanonicalType::Date => {
            if !matches!(
                target,
                BqType::Date | BqType::Datetime | BqType::Timestamp | BqType::String
            ) {
                incompatible(result, path, canonical, target);
            }
        }
        CanonicalType::Time => {
            if !matches!(target, BqType::Time | BqType::String) {
                incompatible(result, path, canonical, target);
            }
        }
        CanonicalType::Struct { .. } | CanonicalType::Array { .. } | CanonicalType::Map { .. } => {
            incompatible(result, path, canonical, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{DepthPolicy, MappingEngine, MappingRuleSet};
    use std::collections::BTreeMap;

    fn validate(fields: Vec<FieldSpec>, rules: MappingRuleSet) -> ValidationResult {
        let canonical = CanonicalSchema::new("orders", fields).unwrap();
        let record = MappingEngine::new(rules).map(&canonical).unwrap();
        Validator::default().validate(&record)
    }

    #[test]
    fn clean_mapping_has_no_findings() {
        let result = validate(
            vec![
                FieldSpec::new("id", CanonicalType::int64()),
                FieldSpec::new("name", CanonicalType::String).nullable(),
            ],
            MappingRuleSet::default(),
        );
        assert!(result.is_clean(), "{result:?}");
    }

    #[test]
    fn lossy_mappings_warn_without_blocking() {
        let result = validate(
            vec![
                FieldSpec::new("amount", CanonicalType::decimal(12, 2).unwrap()),
                FieldSpec::new("seen_at", CanonicalType::Timestamp {
                    unit: TimeUnit::Nanos,
                    tz: Some("Europe/Paris".to_string()),
                }),
                FieldSpec::new("blank", CanonicalType::Null).nullable(),
                FieldSpec::new(
                    "labels",
                    CanonicalType::map(CanonicalType::String, CanonicalType::String),
                ),
            ],
            MappingRuleSet {
                path_overrides: BTreeMap::from([("amount".to_string(), BqType::Float64)]),
                ..MappingRuleSet::default()
            },
        );
        assert!(!result.is_blocking(), "{result:?}");
        assert!(result.has_warning(ValidationWarningKind::PrecisionLoss));
        assert!(result.has_warning(ValidationWarningKind::TimestampTruncation));
        assert!(result.has_warning(ValidationWarningKind::TimezoneNormalized));
        assert!(result.has_warning(ValidationWarningKind::UntypedField));
        assert!(result.has_warning(ValidationWarningKind::MapEncoded));
    }

    #[test]
    fn narrow_decimals_after_integers_warn_against_the_previous_version() {
        let previous = CanonicalSchema::new(
            "orders",
            vec![
                FieldSpec::new("qty", CanonicalType::int64()),
                FieldSpec::new("small", CanonicalType::Integer { bits: 16 }),
            ],
        )
        .unwrap();
        let current = CanonicalSchema::new(
            "orders",
            vec![
                FieldSpec::new("qty", CanonicalType::decimal(10, 2).unwrap()),
                FieldSpec::new("small", CanonicalType::decimal(10, 2).unwrap()),
            ],
        )
        .unwrap();
        let record = MappingEngine::default().map(&current).unwrap();
        let validator = Validator::default();

        assert!(validator.validate_against(&record, None).is_clean());
        let result = validator.validate_against(&record, Some(&previous));
        assert!(!result.is_blocking());
        let paths: Vec<&str> = result.warnings.iter().map(|warning| warning.path.as_str()).collect();
        assert_eq!(paths, vec!["qty"]);
        assert_eq!(result.warnings[0].kind, ValidationWarningKind::PrecisionLoss);
        assert!(result.warnings[0].message.contains("need 19"));
    }

    #[test]
    fn collapsed_structs_cover_their_children() {
        let result = validate(
            vec![FieldSpec::new(
                "outer",
                CanonicalType::Struct {
                    fields: vec![FieldSpec::new(
                        "inner",
                        CanonicalType::Struct {
                            fields: vec![FieldSpec::new("leaf", CanonicalType::int64())],
                        },
                    )],
                },
            )],
            MappingRuleSet {
                max_nesting_depth: 2,
                depth_policy: DepthPolicy::CollapseToString,
                ..MappingRuleSet::default()
            },
        );
        assert!(!result.is_blocking(), "{result:?}");
        assert!(result.has_warning(ValidationWarningKind::StructureCollapsed));
    }

    #[test]
    fn all_errors_are_reported_together() {
        let canonical = CanonicalSchema::new(
            "orders",
            vec![
                FieldSpec::new("id", CanonicalType::int64()),
                FieldSpec::new("name", CanonicalType::String),
                FieldSpec::new("note", CanonicalType::String),
            ],
        )
        .unwrap();
        let column = |name: &str, bq_type: BqType, source: &str| TargetField {
            name: name.to_string(),
            bq_type,
            mode: Mode::Required,
            fields: Vec::new(),
            precision: None,
            scale: None,
            description: None,
            source_path: source.to_string(),
        };
        let target = TargetSchema::new(
            "orders",
            vec![
                column("id", BqType::Date, "id"),
                column("name", BqType::String, "name"),
                column("name_copy", BqType::String, "name"),
                column("1bad", BqType::String, "ghost"),
            ],
        );
        let limits = ValidationLimits {
            max_columns: 3,
            ..ValidationLimits::default()
        };
        let result = Validator::new(limits).check(&canonical, &target);
        assert!(result.is_blocking());
        for kind in [
            ValidationErrorKind::IncompatibleTargetType,
            ValidationErrorKind::DuplicateMapping,
            ValidationErrorKind::UnmappedField,
            ValidationErrorKind::ColumnLimitExceeded,
            ValidationErrorKind::InvalidIdentifier,
        ] {
            assert!(result.has_error(kind), "missing {kind:?} in {result:?}");
        }
        assert_eq!(result.errors[0].path, "id");
    }

    #[test]
    fn empty_schema_is_an_error() {
        let canonical = CanonicalSchema::new("orders", Vec::new()).unwrap();
        let target = TargetSchema::new("orders", Vec::new());
        let result = Validator::default().check(&canonical, &target);
        assert!(result.has_error(ValidationErrorKind::EmptySchema));
    }

    #[test]
    fn depth_limit_is_enforced_on_the_target() {
        let canonical = CanonicalSchema::new(
            "orders",
            vec![FieldSpec::new(
                "a",
                CanonicalType::Struct {
                    fields: vec![FieldSpec::new("b", CanonicalType::int64())],
                },
            )],
        )
        .unwrap();
        let record = MappingEngine::default().map(&canonical).unwrap();
        let result = Validator::new(ValidationLimits {
            max_nesting_depth: 1,
            ..ValidationLimits::default()
        })
        .validate(&record);
        assert!(result.has_error(ValidationErrorKind::NestingDepthExceeded));
        assert_eq!(result.errors[0].path, "a.b");
    }
}
