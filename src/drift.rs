//! Structural drift between a candidate schema and the latest accepted version.
//!
//! The diff walks both field trees by path. A path present only on one side
//! is `Added` or `Removed`; a path present on both compares repetition, type,
//! and nullability in that order. Type changes between scalars are classified
//! through the compatibility lattice: moving up is a widening, moving down a
//! narrowing, anything else a change. Structs, arrays, and maps are compared
//! member by member rather than as a whole.
//!
//! Rename detection is advisory. A `Renamed` entry is added next to the
//! `Removed`/`Added` pair it explains and never replaces it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    store::SchemaVersion,
    types::{CanonicalSchema, CanonicalType, FieldSpec, join_path, widens_to},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    TypeWidened,
    TypeNarrowed,
    TypeChanged,
    NullabilityRelaxed,
    NullabilityTightened,
    Renamed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Impact {
    Compatible,
    CompatibleWithDefault,
    Breaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Compatible,
    Breaking,
    RequiresApproval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub path: String,
    pub kind: ChangeKind,
    pub impact: Impact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub dataset_id: String,
    pub from_version: Option<u32>,
    pub to_version: u32,
    pub changes: Vec<FieldChange>,
    pub verdict: Verdict,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn breaking_changes(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes
            .iter()
            .filter(|change| change.impact == Impact::Breaking)
    }

    pub fn summary(&self) -> DriftSummary {
        let count = |kinds: &[ChangeKind]| {
            self.changes
                .iter()
                .filter(|change| kinds.contains(&change.kind))
                .count()
        };
        DriftSummary {
            from_version: self.from_version,
            verdict: self.verdict,
            added: count(&[ChangeKind::Added]),
            removed: count(&[ChangeKind::Removed]),
            changed: count(&[
                ChangeKind::TypeWidened,
                ChangeKind::TypeNarrowed,
                ChangeKind::TypeChanged,
                ChangeKind::NullabilityRelaxed,
                ChangeKind::NullabilityTightened,
            ]),
            breaking: self.breaking_changes().count(),
        }
    }
}

/// Compact drift record stored alongside an accepted version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSummary {
    pub from_version: Option<u32>,
    pub verdict: Verdict,
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    pub breaking: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenameDetection {
    pub enabled: bool,
    /// Share of identical leaf types a rename must exceed, in `0.0..=1.0`.
    pub min_type_identity: f64,
    pub max_edit_distance: usize,
}

impl Default for RenameDetection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_type_identity: 0.9,
            max_edit_distance: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriftDetector {
    /// Path → default value that makes tightening nullability (or adding a
    /// required field) safe for existing rows.
    pub defaults_for_tightened_nullability: BTreeMap<String, JsonValue>,
    pub rename: RenameDetection,
}

impl DriftDetector {
    pub fn new(
        defaults_for_tightened_nullability: BTreeMap<String, JsonValue>,
        rename: RenameDetection,
    ) -> Self {
        Self {
            defaults_for_tightened_nullability,
            rename,
        }
    }

    /// Diffs `candidate` against the latest accepted version, if any.
    pub fn detect(&self, candidate: &CanonicalSchema, latest: Option<&SchemaVersion>) -> DriftReport {
        let Some(latest) = latest else {
            return DriftReport {
                dataset_id: candidate.dataset_id().to_string(),
                from_version: None,
                to_version: 1,
                changes: Vec::new(),
                verdict: Verdict::Compatible,
            };
        };
        let changes = self.diff(&latest.canonical_schema, candidate);
        DriftReport {
            dataset_id: candidate.dataset_id().to_string(),
            from_version: Some(latest.version_number),
            to_version: latest.version_number + 1,
            verdict: verdict(&changes),
            changes,
        }
    }

    /// Diffs two stored versions.
    pub fn compare_versions(&self, from: &SchemaVersion, to: &SchemaVersion) -> DriftReport {
        let changes = self.diff(&from.canonical_schema, &to.canonical_schema);
        DriftReport {
            dataset_id: to.dataset_id.clone(),
            from_version: Some(from.version_number),
            to_version: to.version_number,
            verdict: verdict(&changes),
            changes,
        }
    }

    pub fn diff(&self, previous: &CanonicalSchema, candidate: &CanonicalSchema) -> Vec<FieldChange> {
        if previous.schema_hash() == candidate.schema_hash() {
            return Vec::new();
        }
        let mut changes = Vec::new();
        self.diff_fields(previous.fields(), candidate.fields(), "", &mut changes);
        if self.rename.enabled {
            let suggestions = self.rename_suggestions(previous, candidate, &changes);
            changes.extend(suggestions);
        }
        changes
    }

    fn diff_fields(
        &self,
        previous: &[FieldSpec],
        candidate: &[FieldSpec],
        parent: &str,
        changes: &mut Vec<FieldChange>,
    ) {
        for old in previous {
            let path = join_path(parent, &old.name);
            match candidate.iter().find(|field| field.name == old.name) {
                Some(new) => self.diff_field(&path, old, new, changes),
                None => changes.push(FieldChange {
                    path,
                    kind: ChangeKind::Removed,
                    impact: Impact::Breaking,
                    before: Some(field_label(old)),
                    after: None,
                    renamed_from: None,
                    detail: "field no longer present".to_string(),
                }),
            }
        }
        for new in candidate {
            if previous.iter().any(|field| field.name == new.name) {
                continue;
            }
            let path = join_path(parent, &new.name);
            let (impact, detail) = if !new.is_required() {
                (Impact::Compatible, "optional field added".to_string())
            } else if self.defaults_for_tightened_nullability.contains_key(&path) {
                (
                    Impact::CompatibleWithDefault,
                    "required field added; existing rows take the configured default".to_string(),
                )
            } else {
                (
                    Impact::Breaking,
                    "required field added without a default".to_string(),
                )
            };
            changes.push(FieldChange {
                path,
                kind: ChangeKind::Added,
                impact,
                before: None,
                after: Some(field_label(new)),
                renamed_from: None,
                detail,
            });
        }
    }

    fn diff_field(&self, path: &str, old: &FieldSpec, new: &FieldSpec, changes: &mut Vec<FieldChange>) {
        if old.repeated != new.repeated {
            changes.push(FieldChange {
                path: path.to_string(),
                kind: ChangeKind::TypeChanged,
                impact: Impact::Breaking,
                before: Some(field_label(old)),
                after: Some(field_label(new)),
                renamed_from: None,
                detail: if new.repeated {
                    "single value became a list".to_string()
                } else {
                    "list became a single value".to_string()
                },
            });
        } else if old.field_type != new.field_type {
            self.diff_types(path, &old.field_type, &new.field_type, changes);
        }

        if old.nullable && !new.nullable {
            let has_default = self.defaults_for_tightened_nullability.contains_key(path);
            changes.push(FieldChange {
                path: path.to_string(),
                kind: ChangeKind::NullabilityTightened,
                impact: if has_default {
                    Impact::CompatibleWithDefault
                } else {
                    Impact::Breaking
                },
                before: Some("nullable".to_string()),
                after: Some("required".to_string()),
                renamed_from: None,
                detail: if has_default {
                    "nulls are replaced by the configured default".to_string()
                } else {
                    "existing null values would violate the new constraint".to_string()
                },
            });
        } else if !old.nullable && new.nullable {
            changes.push(FieldChange {
                path: path.to_string(),
                kind: ChangeKind::NullabilityRelaxed,
                impact: Impact::Compatible,
                before: Some("required".to_string()),
                after: Some("nullable".to_string()),
                renamed_from: None,
                detail: "field may now be null".to_string(),
            });
        }
    }

    fn diff_types(
        &self,
        path: &str,
        old: &CanonicalType,
        new: &CanonicalType,
        changes: &mut Vec<FieldChange>,
    ) {
        match (old, new) {
            (CanonicalType::Struct { fields: before }, CanonicalType::Struct { fields: after }) => {
                self.diff_fields(before, after, path, changes);
            }
            (CanonicalType::Array { element: before }, CanonicalType::Array { element: after }) => {
                if before != after {
                    self.diff_types(path, before, after, changes);
                }
            }
            (
                CanonicalType::Map {
                    key: old_key,
                    value: old_value,
                },
                CanonicalType::Map {
                    key: new_key,
                    value: new_value,
                },
            ) => {
                if old_key != new_key {
                    self.diff_types(&format!("{path}.{{key}}"), old_key, new_key, changes);
                }
                if old_value != new_value {
                    self.diff_types(path, old_value, new_value, changes);
                }
            }
            _ => {
                let (kind, impact, detail) = if widens_to(old, new) {
                    (ChangeKind::TypeWidened, Impact::Compatible, "type widened")
                } else if widens_to(new, old) {
                    (ChangeKind::TypeNarrowed, Impact::Breaking, "type narrowed")
                } else {
                    (
                        ChangeKind::TypeChanged,
                        Impact::Breaking,
                        "type changed to an incomparable type",
                    )
                };
                changes.push(FieldChange {
                    path: path.to_string(),
                    kind,
                    impact,
                    before: Some(old.to_string()),
                    after: Some(new.to_string()),
                    renamed_from: None,
                    detail: detail.to_string(),
                });
            }
        }
    }

    fn rename_suggestions(
        &self,
        previous: &CanonicalSchema,
        candidate: &CanonicalSchema,
        changes: &[FieldChange],
    ) -> Vec<FieldChange> {
        let removed: Vec<&str> = changes
            .iter()
            .filter(|change| change.kind == ChangeKind::Removed)
            .map(|change| change.path.as_str())
            .collect();
        let added: Vec<&str> = changes
            .iter()
            .filter(|change| change.kind == ChangeKind::Added)
            .map(|change| change.path.as_str())
            .collect();

        let mut claimed = BTreeSet::new();
        let mut suggestions = Vec::new();
        for old_path in removed {
            let Some(old) = previous.field(old_path) else {
                continue;
            };
            let best = added
                .iter()
                .filter(|new_path| !claimed.contains(**new_path))
                .filter(|new_path| depth_of(new_path) == depth_of(old_path))
                .filter_map(|new_path| {
                    let new = candidate.field(new_path)?;
                    let distance = strsim::levenshtein(&old.name, &new.name);
                    let identity = type_identity(old, new);
                    (distance <= self.rename.max_edit_distance
                        && identity > self.rename.min_type_identity)
                        .then_some((*new_path, new, distance, identity))
                })
                .min_by(|left, right| {
                    left.2
                        .cmp(&right.2)
                        .then(right.3.total_cmp(&left.3))
                });
            if let Some((new_path, new, distance, identity)) = best {
                claimed.insert(new_path);
                suggestions.push(FieldChange {
                    path: new_path.to_string(),
                    kind: ChangeKind::Renamed,
                    impact: Impact::Compatible,
                    before: Some(field_label(old)),
                    after: Some(field_label(new)),
                    renamed_from: Some(old_path.to_string()),
                    detail: format!(
                        "possible rename: edit distance {distance}, {:.0}% type identity",
                        identity * 100.0
                    ),
                });
            }
        }
        suggestions
    }
}

/// Breaking wins over additions; additions need approval.
pub fn verdict(changes: &[FieldChange]) -> Verdict {
    if changes.iter().any(|change| change.impact == Impact::Breaking) {
        Verdict::Breaking
    } else if changes.iter().any(|change| change.kind == ChangeKind::Added) {
        Verdict::RequiresApproval
    } else {
        Verdict::Compatible
    }
}

fn depth_of(path: &str) -> usize {
    path.split('.').count()
}

fn field_label(field: &FieldSpec) -> String {
    let base = if field.repeated {
        format!("array<{}>", field.field_type)
    } else {
        field.field_type.to_string()
    };
    if field.nullable {
        format!("{base} (nullable)")
    } else {
        base
    }
}

/// Share of leaf signatures two fields have in common, ignoring names at the
/// top level and nullability everywhere.
fn type_identity(left: &FieldSpec, right: &FieldSpec) -> f64 {
    let left_leaves = leaf_signatures(left);
    let right_leaves = leaf_signatures(right);
    let union = left_leaves.union(&right_leaves).count();
    if union == 0 {
        return 1.0;
    }
    left_leaves.intersection(&right_leaves).count() as f64 / union as f64
}

fn leaf_signatures(field: &FieldSpec) -> BTreeSet<String> {
    fn collect(prefix: &str, field_type: &CanonicalType, repeated: bool, out: &mut BTreeSet<String>) {
        match field_type {
            CanonicalType::Struct { fields } => {
                for child in fields {
                    collect(
                        &join_path(prefix, &child.name),
                        &child.field_type,
                        child.repeated,
                        out,
                    );
                }
            }
            other => {
                out.insert(format!("{prefix}:{other}:{repeated}"));
            }
        }
    }
    let mut out = BTreeSet::new();
    collect("", &field.field_type, field.repeated, &mut out);
    out
}
