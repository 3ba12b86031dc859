//! Governance configuration file (YAML or JSON) and the component settings
//! derived from it.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    builder::{BuildHints, BuildOptions, DEFAULT_MAX_NESTING_DEPTH, DEFAULT_SAMPLE_SIZE},
    drift::{DriftDetector, RenameDetection},
    governance::{BreakingChangePolicy, CoordinatorConfig},
    mapping::{DepthPolicy, MappingRuleSet, ScalarKind},
    naming::{IllegalCharacterPolicy, MAX_IDENTIFIER_LENGTH, NamingPolicy},
    target::BqType,
    types::CanonicalType,
    validate::{DEFAULT_MAX_COLUMNS, ValidationLimits},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GovernanceConfig {
    pub sample_size: usize,
    pub naming_policy: NamingPolicy,
    pub illegal_character_policy: IllegalCharacterPolicy,
    pub max_nesting_depth: usize,
    pub depth_policy: DepthPolicy,
    pub max_columns: usize,
    pub max_name_length: usize,
    pub breaking_change_policy: BreakingChangePolicy,
    /// Field path → canonical type signature, e.g. `decimal(18,2)`.
    pub type_overrides: BTreeMap<String, String>,
    pub type_defaults: BTreeMap<ScalarKind, BqType>,
    pub target_overrides: BTreeMap<String, BqType>,
    pub required_fields: BTreeSet<String>,
    pub descriptions: BTreeMap<String, String>,
    pub default_for_tightened_nullability: BTreeMap<String, JsonValue>,
    pub skip_identical_resubmission: bool,
    pub rename_detection: RenameDetection,
    /// Table named in migration DDL; the dataset id when unset.
    pub target_table: Option<String>,
    pub generate_descriptions: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            naming_policy: NamingPolicy::default(),
            illegal_character_policy: IllegalCharacterPolicy::default(),
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            depth_policy: DepthPolicy::default(),
            max_columns: DEFAULT_MAX_COLUMNS,
            max_name_length: MAX_IDENTIFIER_LENGTH,
            breaking_change_policy: BreakingChangePolicy::default(),
            type_overrides: BTreeMap::new(),
            type_defaults: BTreeMap::new(),
            target_overrides: BTreeMap::new(),
            required_fields: BTreeSet::new(),
            descriptions: BTreeMap::new(),
            default_for_tightened_nullability: BTreeMap::new(),
            skip_identical_resubmission: true,
            rename_detection: RenameDetection::default(),
            target_table: None,
            generate_descriptions: false,
        }
    }
}

impl GovernanceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: GovernanceConfig = if is_json {
            serde_json::from_reader(reader)
                .with_context(|| format!("Parsing JSON config {path:?}"))?
        } else {
            serde_yaml::from_reader(reader)
                .with_context(|| format!("Parsing YAML config {path:?}"))?
        };
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.sample_size > 0, "sampleSize must be greater than zero");
        ensure!(
            self.max_nesting_depth > 0,
            "maxNestingDepth must be greater than zero"
        );
        ensure!(self.max_columns > 0, "maxColumns must be greater than zero");
        ensure!(
            (1..=MAX_IDENTIFIER_LENGTH).contains(&self.max_name_length),
            "maxNameLength must be between 1 and {MAX_IDENTIFIER_LENGTH}"
        );
        let identity = self.rename_detection.min_type_identity;
        ensure!(
            (0.0..=1.0).contains(&identity),
            "renameDetection.minTypeIdentity must be within 0.0..=1.0"
        );
        if let Some(kind) = self
            .type_defaults
            .iter()
            .find_map(|(kind, target)| (*target == BqType::Struct).then_some(kind))
        {
            return Err(anyhow!(
                "typeDefaults cannot map {} to STRUCT",
                kind.as_str()
            ));
        }
        for (path, signature) in &self.type_overrides {
            signature
                .parse::<CanonicalType>()
                .with_context(|| format!("typeOverrides entry for '{path}'"))?;
        }
        Ok(())
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            sample_size: self.sample_size,
            max_nesting_depth: self.max_nesting_depth,
        }
    }

    pub fn build_hints(&self) -> Result<BuildHints> {
        let type_overrides = self
            .type_overrides
            .iter()
            .map(|(path, signature)| {
                signature
                    .parse::<CanonicalType>()
                    .map(|parsed| (path.clone(), parsed))
                    .with_context(|| format!("typeOverrides entry for '{path}'"))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(BuildHints {
            type_overrides,
            required_fields: self.required_fields.clone(),
            descriptions: self.descriptions.clone(),
        })
    }

    pub fn mapping_rules(&self) -> MappingRuleSet {
        MappingRuleSet {
            type_defaults: self.type_defaults.clone(),
            path_overrides: self.target_overrides.clone(),
            naming: self.naming_policy,
            illegal_characters: self.illegal_character_policy,
            max_nesting_depth: self.max_nesting_depth,
            depth_policy: self.depth_policy,
            max_name_length: self.max_name_length,
            generate_descriptions: self.generate_descriptions,
        }
    }

    pub fn validation_limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_columns: self.max_columns,
            max_nesting_depth: self.max_nesting_depth,
        }
    }

    pub fn drift_detector(&self) -> DriftDetector {
        DriftDetector::new(
            self.default_for_tightened_nullability.clone(),
            self.rename_detection,
        )
    }

    pub fn coordinator_config(&self) -> Result<CoordinatorConfig> {
        Ok(CoordinatorConfig {
            build: self.build_options(),
            hints: self.build_hints()?,
            rules: self.mapping_rules(),
            limits: self.validation_limits(),
            drift: self.drift_detector(),
            breaking_change_policy: self.breaking_change_policy,
            skip_identical_resubmission: self.skip_identical_resubmission,
            target_table: self.target_table.clone(),
        })
    }
}
