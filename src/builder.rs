//! Canonical schema inference from generic documents.
//!
//! The builder walks the first `sample_size` records of a document and keeps
//! one observation tree per field path: how often the field was present,
//! how often it was null, and the shape seen so far. Scalars meet through
//! [`crate::types::lub`]; objects merge their field sets; lists merge their
//! elements. A field whose observations disagree across categories (text in
//! one record, an object in another) fails inference with the offending path.
//!
//! Type precedence per path is: explicit hint, then observed literal shape,
//! then `String`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    document::{GenericDocument, Node},
    error::SchemaInferenceError,
    literal,
    types::{CanonicalSchema, CanonicalType, FieldSpec, join_path, lub},
};

pub const DEFAULT_SAMPLE_SIZE: usize = 1000;
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 15;

#[derive(Debug, Clone, Default)]
pub struct BuildHints {
    /// Path → type, taking precedence over anything observed.
    pub type_overrides: BTreeMap<String, CanonicalType>,
    /// Paths forced to `nullable = false`.
    pub required_fields: BTreeSet<String>,
    pub descriptions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub sample_size: usize,
    pub max_nesting_depth: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

/// How much of the document inference actually looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// True when records beyond the sample bound were skipped.
    pub sampled: bool,
    pub sample_size: usize,
    pub records_seen: usize,
    pub records_inspected: usize,
}

#[derive(Debug, Clone, Default)]
enum Shape {
    #[default]
    Unknown,
    Scalar(CanonicalType),
    Fixed(CanonicalType),
    Object(ObjectShape),
    List(Box<ListShape>),
}

impl Shape {
    fn describe(&self) -> String {
        match self {
            Shape::Unknown => "null".to_string(),
            Shape::Scalar(ty) | Shape::Fixed(ty) => ty.to_string(),
            Shape::Object(_) => "struct".to_string(),
            Shape::List(_) => "array".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ObjectShape {
    instances: usize,
    fields: Vec<FieldObservation>,
}

#[derive(Debug, Clone)]
struct FieldObservation {
    name: String,
    present: usize,
    nulls: usize,
    shape: Shape,
}

#[derive(Debug, Clone, Default)]
struct ListShape {
    element: Shape,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    options: BuildOptions,
    hints: BuildHints,
}

impl SchemaBuilder {
    pub fn new(options: BuildOptions, hints: BuildHints) -> Self {
        Self { options, hints }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub fn build(
        &self,
        dataset_id: &str,
        document: &GenericDocument,
    ) -> Result<(CanonicalSchema, BuildReport), SchemaInferenceError> {
        if document.is_empty() {
            return Err(SchemaInferenceError::EmptyDocument);
        }
        let limit = self.options.sample_size.max(1);
        let mut root = ObjectShape::default();
        let mut inspected = 0usize;
        for (index, record) in document.records.iter().take(limit).enumerate() {
            let Node::Map(entries) = record else {
                return Err(SchemaInferenceError::NotARecord { index });
            };
            self.observe_object(&mut root, entries, "", 1)?;
            inspected += 1;
        }

        let fields = self.finalize_object(root, "")?;
        self.ensure_required_present(&fields)?;
        let schema = CanonicalSchema::new(dataset_id, fields)?;
        let report = BuildReport {
            sampled: document.len() > inspected,
            sample_size: self.options.sample_size,
            records_seen: document.len(),
            records_inspected: inspected,
        };
        debug!(
            "Inferred {} top-level field(s) for '{}' from {} of {} record(s)",
            schema.fields().len(),
            dataset_id,
            report.records_inspected,
            report.records_seen
        );
        Ok((schema, report))
    }

    /// `level` is the level of the fields held by `shape`.
    fn observe_object(
        &self,
        shape: &mut ObjectShape,
        entries: &[(String, Node)],
        parent: &str,
        level: usize,
    ) -> Result<(), SchemaInferenceError> {
        shape.instances += 1;
        let mut seen_here = HashSet::with_capacity(entries.len());
        for (name, value) in entries {
            let path = join_path(parent, name);
            if !seen_here.insert(name.as_str()) {
                return Err(SchemaInferenceError::DuplicateField { path });
            }
            let idx = match shape.fields.iter().position(|field| &field.name == name) {
                Some(idx) => idx,
                None => {
                    shape.fields.push(FieldObservation {
                        name: name.clone(),
                        present: 0,
                        nulls: 0,
                        shape: Shape::Unknown,
                    });
                    shape.fields.len() - 1
                }
            };
            let field = &mut shape.fields[idx];
            field.present += 1;
            if value.is_null() {
                field.nulls += 1;
                continue;
            }
            if let Some(fixed) = self.hints.type_overrides.get(&path) {
                field.shape = Shape::Fixed(fixed.clone());
                continue;
            }
            self.observe_value(&mut field.shape, value, &path, level)?;
        }
        Ok(())
    }

    fn observe_value(
        &self,
        shape: &mut Shape,
        value: &Node,
        path: &str,
        level: usize,
    ) -> Result<(), SchemaInferenceError> {
        if level > self.options.max_nesting_depth {
            return Err(SchemaInferenceError::NestingTooDeep {
                path: path.to_string(),
                limit: self.options.max_nesting_depth,
            });
        }
        match value {
            Node::Null => Ok(()),
            Node::Map(entries) => {
                if matches!(shape, Shape::Unknown) {
                    *shape = Shape::Object(ObjectShape::default());
                }
                match shape {
                    Shape::Object(object) => self.observe_object(object, entries, path, level + 1),
                    Shape::Fixed(_) => Ok(()),
                    other => Err(conflict(path, &other.describe(), "struct")),
                }
            }
            Node::List(items) => {
                if matches!(shape, Shape::Unknown) {
                    *shape = Shape::List(Box::default());
                }
                match shape {
                    Shape::List(list) => {
                        for item in items.iter().filter(|item| !item.is_null()) {
                            // A list directly inside a list is its own level.
                            let item_level = if matches!(item, Node::List(_)) {
                                level + 1
                            } else {
                                level
                            };
                            self.observe_value(&mut list.element, item, path, item_level)?;
                        }
                        Ok(())
                    }
                    Shape::Fixed(_) => Ok(()),
                    other => Err(conflict(path, &other.describe(), "array")),
                }
            }
            scalar => {
                let observed = scalar_type(scalar);
                match shape {
                    Shape::Unknown => {
                        *shape = Shape::Scalar(observed);
                        Ok(())
                    }
                    Shape::Scalar(current) => {
                        let merged = lub(current, &observed).map_err(|failure| {
                            conflict(path, &failure.left.to_string(), &failure.right.to_string())
                        })?;
                        *current = merged;
                        Ok(())
                    }
                    Shape::Fixed(_) => Ok(()),
                    other => Err(conflict(path, &other.describe(), &observed.to_string())),
                }
            }
        }
    }

    fn finalize_object(
        &self,
        shape: ObjectShape,
        parent: &str,
    ) -> Result<Vec<FieldSpec>, SchemaInferenceError> {
        let instances = shape.instances;
        let mut fields = Vec::with_capacity(shape.fields.len());
        for observation in shape.fields {
            let path = join_path(parent, &observation.name);
            let shape = match self.hints.type_overrides.get(&path) {
                Some(fixed) => Shape::Fixed(fixed.clone()),
                None => observation.shape,
            };
            let (field_type, repeated) = self.finalize_field_shape(shape, &path)?;
            let mut field = FieldSpec::new(observation.name, field_type).with_source_path(&path);
            field.repeated = repeated;
            field.nullable = observation.nulls > 0 || observation.present < instances;
            if self.hints.required_fields.contains(&path) {
                field.nullable = false;
            }
            if let Some(description) = self.hints.descriptions.get(&path) {
                field.description = Some(description.clone());
            }
            fields.push(field);
        }
        Ok(fields)
    }

    /// Field-level lists become `repeated` with the element type.
    fn finalize_field_shape(
        &self,
        shape: Shape,
        path: &str,
    ) -> Result<(CanonicalType, bool), SchemaInferenceError> {
        match shape {
            Shape::Fixed(CanonicalType::Array { element }) => Ok((*element, true)),
            Shape::List(list) => Ok((self.finalize_element(list.element, path)?, true)),
            other => Ok((self.finalize_element(other, path)?, false)),
        }
    }

    fn finalize_element(
        &self,
        shape: Shape,
        path: &str,
    ) -> Result<CanonicalType, SchemaInferenceError> {
        match shape {
            Shape::Unknown => Ok(CanonicalType::Null),
            Shape::Scalar(ty) | Shape::Fixed(ty) => Ok(ty),
            Shape::Object(object) => Ok(CanonicalType::Struct {
                fields: self.finalize_object(object, path)?,
            }),
            Shape::List(list) => Ok(CanonicalType::array(
                self.finalize_element(list.element, path)?,
            )),
        }
    }

    fn ensure_required_present(&self, fields: &[FieldSpec]) -> Result<(), SchemaInferenceError> {
        let mut paths = HashSet::new();
        crate::types::walk_fields(fields, &mut |path, _, _| {
            paths.insert(path.to_string());
        });
        match self
            .hints
            .required_fields
            .iter()
            .find(|required| !paths.contains(*required))
        {
            Some(missing) => Err(SchemaInferenceError::MissingRequiredField {
                path: missing.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn conflict(path: &str, left: &str, right: &str) -> SchemaInferenceError {
    SchemaInferenceError::IncompatibleTypes {
        path: path.to_string(),
        left: left.to_string(),
        right: right.to_string(),
    }
}

fn scalar_type(node: &Node) -> CanonicalType {
    match node {
        Node::Bool(_) => CanonicalType::Boolean,
        Node::Integer(_) => CanonicalType::int64(),
        Node::Float(_) => CanonicalType::float64(),
        Node::Decimal(value) => literal::classify_decimal(value),
        Node::String(text) => {
            literal::classify_temporal(text.trim()).unwrap_or(CanonicalType::String)
        }
        Node::Text(text) => literal::classify_text(text),
        Node::Bytes(_) => CanonicalType::Bytes,
        Node::Null | Node::List(_) | Node::Map(_) => CanonicalType::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(value: serde_json::Value) -> Result<CanonicalSchema, SchemaInferenceError> {
        SchemaBuilder::default()
            .build("orders", &GenericDocument::from_json(value))
            .map(|(schema, _)| schema)
    }

    #[test]
    fn missing_and_null_fields_become_nullable() {
        let schema = build(json!([{"id": 1, "name": "a"}, {"id": 2, "name": null}])).unwrap();
        let id = schema.field("id").unwrap();
        let name = schema.field("name").unwrap();
        assert_eq!(id.field_type, CanonicalType::int64());
        assert!(!id.nullable);
        assert_eq!(name.field_type, CanonicalType::String);
        assert!(name.nullable);

        let sparse = build(json!([{"id": 1, "note": "x"}, {"id": 2}])).unwrap();
        assert!(sparse.field("note").unwrap().nullable);
    }

    #[test]
    fn list_elements_meet_at_their_upper_bound() {
        let schema = build(json!([{"values": [1, 2.5]}, {"values": [3]}])).unwrap();
        let values = schema.field("values").unwrap();
        assert!(values.repeated);
        assert_eq!(values.field_type, CanonicalType::float64());
    }

    #[test]
    fn nested_objects_merge_across_records() {
        let schema = build(json!([
            {"customer": {"id": 1}},
            {"customer": {"id": 2, "email": "a@b.c"}}
        ]))
        .unwrap();
        assert!(!schema.field("customer.id").unwrap().nullable);
        assert!(schema.field("customer.email").unwrap().nullable);
        assert_eq!(
            schema.field("customer.email").unwrap().source_path.as_deref(),
            Some("customer.email")
        );
    }

    #[test]
    fn text_versus_object_names_the_path() {
        let err = build(json!([{"customer": {"id": 1}}, {"customer": "anonymous"}])).unwrap_err();
        assert_eq!(
            err,
            SchemaInferenceError::IncompatibleTypes {
                path: "customer".to_string(),
                left: "struct".to_string(),
                right: "string".to_string(),
            }
        );
    }

    #[test]
    fn explicit_hint_beats_observed_shape() {
        let mut hints = BuildHints::default();
        hints
            .type_overrides
            .insert("payload".to_string(), CanonicalType::String);
        hints.required_fields.insert("id".to_string());
        let builder = SchemaBuilder::new(BuildOptions::default(), hints);
        let document =
            GenericDocument::from_json(json!([{"id": 1, "payload": {"a": 1}}, {"payload": "x"}]));
        let (schema, _) = builder.build("events", &document).unwrap();
        assert_eq!(
            schema.field("payload").unwrap().field_type,
            CanonicalType::String
        );
        assert!(!schema.field("id").unwrap().nullable);
    }

    #[test]
    fn hinted_type_survives_a_field_that_is_always_null() {
        let mut hints = BuildHints::default();
        hints
            .type_overrides
            .insert("note".to_string(), CanonicalType::String);
        let builder = SchemaBuilder::new(BuildOptions::default(), hints);
        let document = GenericDocument::from_json(json!([{"id": 1, "note": null}]));
        let (schema, _) = builder.build("orders", &document).unwrap();
        let note = schema.field("note").unwrap();
        assert_eq!(note.field_type, CanonicalType::String);
        assert!(note.nullable);
    }

    #[test]
    fn json_key_order_is_kept() {
        let schema = build(json!({"zeta": 1, "alpha": 2, "mid": {"y": 1, "b": 2}})).unwrap();
        assert_eq!(schema.paths(), vec!["zeta", "alpha", "mid", "mid.y", "mid.b"]);
    }

    #[test]
    fn sampling_is_reported() {
        let builder = SchemaBuilder::new(
            BuildOptions {
                sample_size: 2,
                ..BuildOptions::default()
            },
            BuildHints::default(),
        );
        let document = GenericDocument::from_json(json!([
            {"id": 1}, {"id": 2}, {"id": "late-string"}
        ]));
        let (schema, report) = builder.build("events", &document).unwrap();
        assert!(report.sampled);
        assert_eq!(report.records_inspected, 2);
        assert_eq!(report.records_seen, 3);
        assert_eq!(schema.field("id").unwrap().field_type, CanonicalType::int64());
    }

    #[test]
    fn nesting_bound_stops_adversarial_depth() {
        let builder = SchemaBuilder::new(
            BuildOptions {
                max_nesting_depth: 2,
                ..BuildOptions::default()
            },
            BuildHints::default(),
        );
        let document = GenericDocument::from_json(json!([{"a": {"b": {"c": 1}}}]));
        let err = builder.build("deep", &document).unwrap_err();
        assert_eq!(
            err,
            SchemaInferenceError::NestingTooDeep {
                path: "a.b.c".to_string(),
                limit: 2
            }
        );
    }

    #[test]
    fn untyped_text_is_classified() {
        let document = GenericDocument::new(vec![
            Node::map([
                ("amount", Node::Text("12.50".to_string())),
                ("ordered_at", Node::Text("2024-01-01".to_string())),
            ]),
            Node::map([
                ("amount", Node::Text("7".to_string())),
                ("ordered_at", Node::Null),
            ]),
        ]);
        let (schema, _) = SchemaBuilder::default().build("orders", &document).unwrap();
        assert!(matches!(
            schema.field("amount").unwrap().field_type,
            CanonicalType::Decimal { scale: 2, .. }
        ));
        assert_eq!(
            schema.field("ordered_at").unwrap().field_type,
            CanonicalType::Date
        );
    }

    #[test]
    fn unknown_required_field_is_reported() {
        let mut hints = BuildHints::default();
        hints.required_fields.insert("missing".to_string());
        let builder = SchemaBuilder::new(BuildOptions::default(), hints);
        let err = builder
            .build("orders", &GenericDocument::from_json(json!([{"id": 1}])))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaInferenceError::MissingRequiredField {
                path: "missing".to_string()
            }
        );
    }

    #[test]
    fn empty_document_is_rejected() {
        let err = SchemaBuilder::default()
            .build("orders", &GenericDocument::default())
            .unwrap_err();
        assert_eq!(err, SchemaInferenceError::EmptyDocument);
    }
}
