//! Governance runs: build, map, validate, diff, then decide.
//!
//! A run moves through
//! `Received → Built → Mapped → Validated → DriftChecked` and ends in
//! `Accepted`, `Rejected`, or `PendingApproval`. `PendingApproval` is left
//! only through [`Coordinator::resolve`]. Everything up to `DriftChecked` is
//! computed by [`Coordinator::evaluate_document`] without side effects, so a
//! caller can drop the resulting [`Evaluation`] at any point. The only write
//! is the version append on acceptance.
//!
//! Runs for the same dataset serialise on the stored latest version: an
//! acceptance appends `latest + 1`, and the store refuses the append if
//! another run got there first. The resulting [`ConflictError`] is returned
//! as is; the caller decides whether to re-run against the new state.
//!
//! [`ConflictError`]: crate::error::ConflictError

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, AuditRecord},
    builder::{BuildHints, BuildOptions, BuildReport, SchemaBuilder},
    document::{DocumentSource, GenericDocument},
    drift::{DriftDetector, DriftReport, FieldChange, Verdict},
    error::{GovernanceError, ValidationFailure},
    layout::TableAdvice,
    mapping::{MappingEngine, MappingRecord, MappingRuleSet},
    migration::MigrationPlan,
    store::{ApprovalRecord, SchemaVersion, VersionStorage},
    target::TargetSchema,
    types::CanonicalSchema,
    validate::{ValidationLimits, ValidationWarning, Validator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GovernanceState {
    Received,
    Built,
    Mapped,
    Validated,
    DriftChecked,
    Accepted,
    Rejected,
    PendingApproval,
}

impl GovernanceState {
    pub fn can_transition_to(self, next: GovernanceState) -> bool {
        use GovernanceState::*;
        matches!(
            (self, next),
            (Received, Built)
                | (Built, Mapped)
                | (Mapped, Validated)
                | (Validated, DriftChecked)
                | (DriftChecked, Accepted | Rejected | PendingApproval)
                | (PendingApproval, Accepted | Rejected)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BreakingChangePolicy {
    #[default]
    #[serde(alias = "AutoReject")]
    AutoReject,
    #[serde(alias = "RequireApproval")]
    RequireApproval,
}

/// The states one run has passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StateTrail {
    run_id: Uuid,
    states: Vec<GovernanceState>,
}

impl StateTrail {
    fn start(run_id: Uuid) -> Self {
        Self::resume(run_id, GovernanceState::Received)
    }

    fn resume(run_id: Uuid, state: GovernanceState) -> Self {
        Self {
            run_id,
            states: vec![state],
        }
    }

    fn current(&self) -> GovernanceState {
        self.states
            .last()
            .copied()
            .unwrap_or(GovernanceState::Received)
    }

    fn advance(&mut self, next: GovernanceState) -> Result<(), GovernanceError> {
        let from = self.current();
        if !from.can_transition_to(next) {
            return Err(GovernanceError::InvalidTransition { from, to: next });
        }
        debug!("Run {}: {:?} -> {:?}", self.run_id, from, next);
        self.states.push(next);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingPlan {
    pub target_schema: TargetSchema,
    pub version: SchemaVersion,
    /// False when an identical resubmission reused the stored version.
    pub appended: bool,
    /// DDL from the previous version to this one; `CREATE TABLE` for the first.
    pub migration: MigrationPlan,
    pub advice: TableAdvice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub reason: String,
    pub breaking_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

/// A candidate waiting for an external decision. Serialisable so it can be
/// parked outside the process and resolved later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub run_id: Uuid,
    pub dataset_id: String,
    pub proposed_version: u32,
    pub canonical_schema: CanonicalSchema,
    pub target_schema: TargetSchema,
    pub drift: DriftReport,
    #[serde(default)]
    pub warnings: Vec<ValidationWarning>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Decision {
    Accepted(MappingPlan),
    Rejected(Rejection),
    PendingApproval(PendingApproval),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Approve {
        decided_by: String,
        note: Option<String>,
    },
    Reject {
        decided_by: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceOutcome {
    pub run_id: Uuid,
    pub dataset_id: String,
    pub decision: Decision,
    pub drift: DriftReport,
    pub trail: Vec<GovernanceState>,
    pub warnings: Vec<ValidationWarning>,
}

impl GovernanceOutcome {
    pub fn state(&self) -> GovernanceState {
        match self.decision {
            Decision::Accepted(_) => GovernanceState::Accepted,
            Decision::Rejected(_) => GovernanceState::Rejected,
            Decision::PendingApproval(_) => GovernanceState::PendingApproval,
        }
    }

    pub fn plan(&self) -> Option<&MappingPlan> {
        match &self.decision {
            Decision::Accepted(plan) => Some(plan),
            _ => None,
        }
    }
}

/// Result of the side-effect-free part of a run, up to `DriftChecked`.
#[derive(Debug, Clone)]
pub struct Evaluation {
    run_id: Uuid,
    dataset_id: String,
    build_report: BuildReport,
    mapping: MappingRecord,
    drift: DriftReport,
    latest: Option<SchemaVersion>,
    trail: StateTrail,
}

impl Evaluation {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn build_report(&self) -> &BuildReport {
        &self.build_report
    }

    pub fn mapping(&self) -> &MappingRecord {
        &self.mapping
    }

    pub fn drift(&self) -> &DriftReport {
        &self.drift
    }

    pub fn latest(&self) -> Option<&SchemaVersion> {
        self.latest.as_ref()
    }

    pub fn state(&self) -> GovernanceState {
        self.trail.current()
    }

    fn warnings(&self) -> Vec<ValidationWarning> {
        self.mapping
            .validation()
            .map(|result| result.warnings.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub build: BuildOptions,
    pub hints: BuildHints,
    pub rules: MappingRuleSet,
    pub limits: ValidationLimits,
    pub drift: DriftDetector,
    pub breaking_change_policy: BreakingChangePolicy,
    pub skip_identical_resubmission: bool,
    /// Table named in migration DDL; the dataset id when unset.
    pub target_table: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            build: BuildOptions::default(),
            hints: BuildHints::default(),
            rules: MappingRuleSet::default(),
            limits: ValidationLimits::default(),
            drift: DriftDetector::default(),
            breaking_change_policy: BreakingChangePolicy::default(),
            skip_identical_resubmission: true,
            target_table: None,
        }
    }
}

pub struct Coordinator {
    source: Arc<dyn DocumentSource>,
    storage: Arc<dyn VersionStorage>,
    builder: SchemaBuilder,
    mapper: MappingEngine,
    validator: Validator,
    detector: DriftDetector,
    policy: BreakingChangePolicy,
    skip_identical_resubmission: bool,
    target_table: Option<String>,
}

impl Coordinator {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        storage: Arc<dyn VersionStorage>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            source,
            storage,
            builder: SchemaBuilder::new(config.build, config.hints),
            mapper: MappingEngine::new(config.rules),
            validator: Validator::new(config.limits),
            detector: config.drift,
            policy: config.breaking_change_policy,
            skip_identical_resubmission: config.skip_identical_resubmission,
            target_table: config.target_table,
        }
    }

    pub fn storage(&self) -> &Arc<dyn VersionStorage> {
        &self.storage
    }

    /// Fetches `input` and runs the full pipeline for `dataset_id`.
    pub fn submit(&self, dataset_id: &str, input: &str) -> Result<GovernanceOutcome, GovernanceError> {
        info!("Received '{input}' for dataset '{dataset_id}'");
        let document = self.source.fetch(input)?;
        let evaluation = self.evaluate_document(dataset_id, &document)?;
        self.decide(evaluation)
    }

    /// Runs `Received → DriftChecked` without writing anything.
    pub fn evaluate_document(
        &self,
        dataset_id: &str,
        document: &GenericDocument,
    ) -> Result<Evaluation, GovernanceError> {
        let run_id = Uuid::new_v4();
        let mut trail = StateTrail::start(run_id);

        let (schema, build_report) = self.builder.build(dataset_id, document)?;
        if build_report.sampled {
            debug!(
                "Run {run_id}: inferred from {} of {} record(s)",
                build_report.records_inspected, build_report.records_seen
            );
        }
        trail.advance(GovernanceState::Built)?;

        let mut mapping = self.mapper.map(&schema)?;
        trail.advance(GovernanceState::Mapped)?;

        let latest = self.storage.latest(dataset_id)?;
        let previous = latest.as_ref().map(|version| &version.canonical_schema);
        let validation = self.validator.validate_against(&mapping, previous);
        if validation.is_blocking() {
            warn!(
                "Run {run_id}: mapping for '{dataset_id}' failed validation with {} error(s)",
                validation.errors.len()
            );
            return Err(ValidationFailure { result: validation }.into());
        }
        if mapping.attach_validation(validation).is_err() {
            debug!("Run {run_id}: mapping was already validated");
        }
        trail.advance(GovernanceState::Validated)?;

        let drift = self.detector.detect(&schema, latest.as_ref());
        trail.advance(GovernanceState::DriftChecked)?;
        debug!(
            "Run {run_id}: {} change(s) against {:?}, verdict {:?}",
            drift.changes.len(),
            drift.from_version,
            drift.verdict
        );

        Ok(Evaluation {
            run_id,
            dataset_id: dataset_id.to_string(),
            build_report,
            mapping,
            drift,
            latest,
            trail,
        })
    }

    /// Applies the acceptance policy to an evaluation and commits on
    /// acceptance.
    pub fn decide(&self, evaluation: Evaluation) -> Result<GovernanceOutcome, GovernanceError> {
        let warnings = evaluation.warnings();
        let Evaluation {
            run_id,
            dataset_id,
            mapping,
            drift,
            latest,
            mut trail,
            ..
        } = evaluation;

        if self.skip_identical_resubmission {
            if let Some(existing) = latest
                .as_ref()
                .filter(|stored| stored.schema_hash() == mapping.canonical_schema().schema_hash())
            {
                trail.advance(GovernanceState::Accepted)?;
                info!(
                    "Run {run_id}: '{dataset_id}' is identical to version {}; nothing appended",
                    existing.version_number
                );
                let advice = TableAdvice::for_schema(&existing.target_schema);
                let decision =
                    Decision::Accepted(self.mapping_plan(existing.clone(), false, Some(existing), advice.clone()));
                audit(AuditAction::Submit, run_id, &drift, &decision, &advice);
                return Ok(GovernanceOutcome {
                    run_id,
                    dataset_id,
                    decision,
                    drift,
                    trail: trail.states,
                    warnings,
                });
            }
        }

        let advice = TableAdvice::for_schema(mapping.target_schema());
        let decision = match (drift.verdict, self.policy) {
            (Verdict::Compatible, _) => {
                let (canonical_schema, target_schema) = mapping.into_parts();
                let version = SchemaVersion {
                    dataset_id: dataset_id.clone(),
                    version_number: drift.to_version,
                    canonical_schema,
                    target_schema,
                    accepted_at: Utc::now(),
                    drift_summary: drift.from_version.map(|_| drift.summary()),
                    approval: None,
                };
                self.commit(&dataset_id, version.clone(), run_id)?;
                trail.advance(GovernanceState::Accepted)?;
                Decision::Accepted(self.mapping_plan(version, true, latest.as_ref(), advice.clone()))
            }
            (Verdict::Breaking, BreakingChangePolicy::AutoReject) => {
                trail.advance(GovernanceState::Rejected)?;
                let breaking_changes: Vec<FieldChange> = drift.breaking_changes().cloned().collect();
                info!(
                    "Run {run_id}: rejected '{dataset_id}' with {} breaking change(s)",
                    breaking_changes.len()
                );
                Decision::Rejected(Rejection {
                    reason: "breaking changes are not accepted automatically".to_string(),
                    breaking_changes,
                    decided_by: None,
                })
            }
            (Verdict::Breaking, BreakingChangePolicy::RequireApproval)
            | (Verdict::RequiresApproval, _) => {
                trail.advance(GovernanceState::PendingApproval)?;
                info!(
                    "Run {run_id}: version {} of '{dataset_id}' awaits approval",
                    drift.to_version
                );
                let (canonical_schema, target_schema) = mapping.into_parts();
                Decision::PendingApproval(PendingApproval {
                    run_id,
                    dataset_id: dataset_id.clone(),
                    proposed_version: drift.to_version,
                    canonical_schema,
                    target_schema,
                    drift: drift.clone(),
                    warnings: warnings.clone(),
                    created_at: Utc::now(),
                })
            }
        };
        audit(AuditAction::Submit, run_id, &drift, &decision, &advice);

        Ok(GovernanceOutcome {
            run_id,
            dataset_id,
            decision,
            drift,
            trail: trail.states,
            warnings,
        })
    }

    /// Applies an external decision to a pending candidate.
    pub fn resolve(
        &self,
        pending: PendingApproval,
        decision: ApprovalDecision,
    ) -> Result<GovernanceOutcome, GovernanceError> {
        if pending.canonical_schema.dataset_id() != pending.dataset_id {
            return Err(GovernanceError::DatasetMismatch {
                expected: pending.dataset_id.clone(),
                found: pending.canonical_schema.dataset_id().to_string(),
            });
        }
        let mut trail = StateTrail::resume(pending.run_id, GovernanceState::PendingApproval);
        let PendingApproval {
            run_id,
            dataset_id,
            proposed_version,
            canonical_schema,
            target_schema,
            drift,
            warnings,
            ..
        } = pending;

        let advice = TableAdvice::for_schema(&target_schema);
        let decision = match decision {
            ApprovalDecision::Approve { decided_by, note } => {
                let decided_at = Utc::now();
                let version = SchemaVersion {
                    dataset_id: dataset_id.clone(),
                    version_number: proposed_version,
                    canonical_schema,
                    target_schema,
                    accepted_at: decided_at,
                    drift_summary: drift.from_version.map(|_| drift.summary()),
                    approval: Some(ApprovalRecord {
                        decided_by: decided_by.clone(),
                        decided_at,
                        note,
                    }),
                };
                let previous = match proposed_version.checked_sub(1) {
                    Some(number) if number > 0 => self.storage.get(&dataset_id, number)?,
                    _ => None,
                };
                self.commit(&dataset_id, version.clone(), run_id)?;
                trail.advance(GovernanceState::Accepted)?;
                info!("Run {run_id}: version {proposed_version} of '{dataset_id}' approved by {decided_by}");
                Decision::Accepted(self.mapping_plan(version, true, previous.as_ref(), advice.clone()))
            }
            ApprovalDecision::Reject { decided_by, reason } => {
                trail.advance(GovernanceState::Rejected)?;
                info!("Run {run_id}: version {proposed_version} of '{dataset_id}' rejected by {decided_by}: {reason}");
                Decision::Rejected(Rejection {
                    reason,
                    breaking_changes: drift.breaking_changes().cloned().collect(),
                    decided_by: Some(decided_by),
                })
            }
        };
        audit(AuditAction::Resolve, run_id, &drift, &decision, &advice);

        Ok(GovernanceOutcome {
            run_id,
            dataset_id,
            decision,
            drift,
            trail: trail.states,
            warnings,
        })
    }

    fn mapping_plan(
        &self,
        version: SchemaVersion,
        appended: bool,
        previous: Option<&SchemaVersion>,
        advice: TableAdvice,
    ) -> MappingPlan {
        let table = self
            .target_table
            .clone()
            .unwrap_or_else(|| version.dataset_id.clone());
        let migration = match previous {
            Some(previous) => MigrationPlan::between(&table, &previous.target_schema, &version.target_schema),
            None => MigrationPlan::create(&table, &version.target_schema),
        };
        MappingPlan {
            target_schema: version.target_schema.clone(),
            version,
            appended,
            migration,
            advice,
        }
    }

    fn commit(&self, dataset_id: &str, version: SchemaVersion, run_id: Uuid) -> Result<(), GovernanceError> {
        let number = version.version_number;
        match self.storage.append(dataset_id, version) {
            Ok(()) => {
                info!("Run {run_id}: accepted version {number} of '{dataset_id}'");
                Ok(())
            }
            Err(err) => {
                let err = GovernanceError::from(err);
                if err.is_conflict() {
                    warn!("Run {run_id}: {err}");
                }
                Err(err)
            }
        }
    }
}

fn audit(
    action: AuditAction,
    run_id: Uuid,
    drift: &DriftReport,
    decision: &Decision,
    advice: &TableAdvice,
) {
    let (label, version, decided_by) = match decision {
        Decision::Accepted(plan) => (
            if plan.appended { "accepted" } else { "unchanged" },
            plan.version.version_number,
            plan.version
                .approval
                .as_ref()
                .map(|approval| approval.decided_by.clone()),
        ),
        Decision::PendingApproval(ticket) => ("pending_approval", ticket.proposed_version, None),
        Decision::Rejected(rejection) => ("rejected", drift.to_version, rejection.decided_by.clone()),
    };
    let mut record = AuditRecord::new(run_id, action, version, label, drift)
        .sensitivity(advice.has_pii(), advice.has_sensitive());
    if let Some(who) = decided_by {
        record = record.decided_by(who);
    }
    record.emit();
}
