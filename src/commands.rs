use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::{
    builder::SchemaBuilder,
    cli::{
        ApproveArgs, DiffArgs, HistoryArgs, InputArgs, MapArgs, OutputFormat, PolicyArgs,
        ProbeArgs, SubmitArgs,
    },
    config::GovernanceConfig,
    document::DocumentSource,
    error::GovernanceError,
    governance::{ApprovalDecision, Coordinator, Decision, GovernanceOutcome, PendingApproval},
    io_utils,
    mapping::MappingEngine,
    migration::MigrationPlan,
    source::{CsvDocumentSource, FileDocumentSource, InMemorySource},
    store::{FileVersionStore, SchemaVersion, VersionStorage},
    validate::Validator,
};

fn resolve_config(policy: &PolicyArgs) -> Result<GovernanceConfig> {
    let mut config = GovernanceConfig::load_or_default(policy.config.as_deref())?;
    if let Some(sample_size) = policy.sample_size {
        config.sample_size = sample_size;
    }
    if let Some(naming) = policy.naming_policy {
        config.naming_policy = naming;
    }
    if let Some(illegal) = policy.illegal_characters {
        config.illegal_character_policy = illegal;
    }
    if let Some(depth) = policy.max_depth {
        config.max_nesting_depth = depth;
    }
    if let Some(depth_policy) = policy.depth_policy {
        config.depth_policy = depth_policy;
    }
    if let Some(breaking) = policy.breaking_changes {
        config.breaking_change_policy = breaking;
    }
    config.validate().context("Applying command-line overrides")?;
    Ok(config)
}

fn file_source(input: &InputArgs) -> Result<FileDocumentSource> {
    let encoding = io_utils::resolve_encoding(input.input_encoding.as_deref())?;
    Ok(FileDocumentSource::new(CsvDocumentSource::new(
        input.delimiter,
        encoding,
    )))
}

fn input_key(input: &InputArgs) -> String {
    input.input.to_string_lossy().into_owned()
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let mut writer = io_utils::open_output(output)?;
    serde_json::to_writer_pretty(&mut writer, value).context("Serializing JSON output")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn report_validation_errors(err: &GovernanceError) {
    if let GovernanceError::Validation(failure) = err {
        for issue in &failure.result.errors {
            error!("{:?} at '{}': {}", issue.kind, issue.path, issue.message);
        }
    }
}

pub fn probe(args: &ProbeArgs) -> Result<()> {
    let config = resolve_config(&args.policy)?;
    let document = file_source(&args.input)?
        .fetch(&input_key(&args.input))
        .with_context(|| format!("Reading {:?}", args.input.input))?;
    let builder = SchemaBuilder::new(config.build_options(), config.build_hints()?);
    let (schema, report) = builder
        .build(&args.input.dataset, &document)
        .with_context(|| format!("Inferring schema from {:?}", args.input.input))?;
    if report.sampled {
        info!(
            "Sampled {} of {} record(s)",
            report.records_inspected, report.records_seen
        );
    }

    let mut writer = io_utils::open_output(args.output.as_deref())?;
    match args.format {
        OutputFormat::Yaml => serde_yaml::to_writer(&mut writer, &schema)
            .context("Serializing canonical schema as YAML")?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &schema)
                .context("Serializing canonical schema as JSON")?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    info!(
        "Inferred {} top-level field(s) for '{}' (hash {})",
        schema.fields().len(),
        schema.dataset_id(),
        schema.schema_hash()
    );
    Ok(())
}

pub fn map(args: &MapArgs) -> Result<()> {
    let config = resolve_config(&args.policy)?;
    let document = file_source(&args.input)?
        .fetch(&input_key(&args.input))
        .with_context(|| format!("Reading {:?}", args.input.input))?;
    let builder = SchemaBuilder::new(config.build_options(), config.build_hints()?);
    let (schema, _) = builder
        .build(&args.input.dataset, &document)
        .with_context(|| format!("Inferring schema from {:?}", args.input.input))?;
    let mut record = MappingEngine::new(config.mapping_rules())
        .map(&schema)
        .with_context(|| format!("Mapping dataset '{}'", schema.dataset_id()))?;
    let result = Validator::new(config.validation_limits()).validate(&record);
    for warning in &result.warnings {
        warn!("{:?} at '{}': {}", warning.kind, warning.path, warning.message);
    }
    if let Some(report) = &args.report {
        write_json(&result, Some(report.as_path()))?;
    }
    if result.is_blocking() {
        for issue in &result.errors {
            error!("{:?} at '{}': {}", issue.kind, issue.path, issue.message);
        }
        bail!(
            "Mapping for '{}' failed validation with {} error(s)",
            schema.dataset_id(),
            result.errors.len()
        );
    }
    record
        .attach_validation(result)
        .map_err(|_| anyhow!("Mapping record was already validated"))?;
    write_json(
        &record.target_schema().to_bigquery_json(),
        args.output.as_deref(),
    )?;
    info!(
        "Mapped {} column(s) for '{}'",
        record.target_schema().column_count(),
        schema.dataset_id()
    );
    Ok(())
}

fn coordinator(
    source: Arc<dyn DocumentSource>,
    store: &Path,
    config: &GovernanceConfig,
) -> Result<Coordinator> {
    let storage: Arc<dyn VersionStorage> = Arc::new(FileVersionStore::new(store));
    Ok(Coordinator::new(source, storage, config.coordinator_config()?))
}

/// Writes the outcome and turns a rejection into a failing exit.
fn finish(outcome: &GovernanceOutcome, output: Option<&Path>) -> Result<()> {
    match &outcome.decision {
        Decision::Accepted(plan) => {
            write_json(plan, output)?;
            info!(
                "Dataset '{}' is at version {}{}",
                outcome.dataset_id,
                plan.version.version_number,
                if plan.appended { "" } else { " (unchanged)" }
            );
            Ok(())
        }
        Decision::PendingApproval(ticket) => {
            write_json(ticket, output)?;
            info!(
                "Version {} of '{}' awaits approval (run {})",
                ticket.proposed_version, outcome.dataset_id, ticket.run_id
            );
            Ok(())
        }
        Decision::Rejected(rejection) => {
            write_json(outcome, output)?;
            bail!(
                "Submission for '{}' was rejected: {}",
                outcome.dataset_id,
                rejection.reason
            )
        }
    }
}

pub fn submit(args: &SubmitArgs) -> Result<()> {
    let config = resolve_config(&args.policy)?;
    let source: Arc<dyn DocumentSource> = Arc::new(file_source(&args.input)?);
    let coordinator = coordinator(source, &args.store, &config)?;
    let outcome = coordinator
        .submit(&args.input.dataset, &input_key(&args.input))
        .inspect_err(report_validation_errors)
        .with_context(|| format!("Submitting {:?} for '{}'", args.input.input, args.input.dataset))?;
    finish(&outcome, args.output.as_deref())
}

pub fn approve(args: &ApproveArgs) -> Result<()> {
    let config = resolve_config(&args.policy)?;
    let file = File::open(&args.ticket)
        .with_context(|| format!("Opening ticket {:?}", args.ticket))?;
    let ticket: PendingApproval = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing ticket {:?}", args.ticket))?;
    let decision = if args.reject {
        ApprovalDecision::Reject {
            decided_by: args.decided_by.clone(),
            reason: args.reason.clone().unwrap_or_default(),
        }
    } else {
        ApprovalDecision::Approve {
            decided_by: args.decided_by.clone(),
            note: args.note.clone(),
        }
    };
    let source: Arc<dyn DocumentSource> = Arc::new(InMemorySource::new());
    let coordinator = coordinator(source, &args.store, &config)?;
    let dataset_id = ticket.dataset_id.clone();
    let outcome = coordinator
        .resolve(ticket, decision)
        .with_context(|| format!("Resolving ticket {:?} for '{dataset_id}'", args.ticket))?;
    finish(&outcome, args.output.as_deref())
}

pub fn history(args: &HistoryArgs) -> Result<()> {
    let store = FileVersionStore::new(&args.store);
    let versions = store
        .history(&args.dataset)
        .with_context(|| format!("Reading history of '{}'", args.dataset))?;
    if args.json {
        return write_json(&versions, None);
    }
    if versions.is_empty() {
        info!("No versions stored for '{}'", args.dataset);
        return Ok(());
    }
    println!(
        "{:>7}  {:<16}  {:<25}  {:<8}  {:<16}  approved by",
        "version", "hash", "accepted at", "columns", "verdict"
    );
    for version in &versions {
        println!("{}", history_line(version));
    }
    Ok(())
}

fn history_line(version: &SchemaVersion) -> String {
    let hash: String = version.schema_hash().chars().take(16).collect();
    let verdict = version
        .drift_summary
        .map(|summary| format!("{:?}", summary.verdict))
        .unwrap_or_else(|| "-".to_string());
    let approved_by = version
        .approval
        .as_ref()
        .map(|approval| approval.decided_by.as_str())
        .unwrap_or("-");
    format!(
        "{:>7}  {:<16}  {:<25}  {:<8}  {:<16}  {}",
        version.version_number,
        hash,
        version.accepted_at.to_rfc3339(),
        version.target_schema.column_count(),
        verdict,
        approved_by
    )
}

pub fn diff(args: &DiffArgs) -> Result<()> {
    let config = resolve_config(&args.policy)?;
    let store = FileVersionStore::new(&args.store);
    let load = |number: u32| -> Result<SchemaVersion> {
        store
            .get(&args.dataset, number)
            .with_context(|| format!("Reading version {number} of '{}'", args.dataset))?
            .ok_or_else(|| anyhow!("Version {number} of '{}' does not exist", args.dataset))
    };
    let from = load(args.from)?;
    let to = match args.to {
        Some(number) => load(number)?,
        None => store
            .latest(&args.dataset)?
            .ok_or_else(|| anyhow!("No versions stored for '{}'", args.dataset))?,
    };

    let report = config.drift_detector().compare_versions(&from, &to);
    write_json(&report, None)?;

    if args.ddl {
        let table = config.target_table.as_deref().unwrap_or(&args.dataset);
        let plan = MigrationPlan::between(table, &from.target_schema, &to.target_schema);
        for statement in &plan.statements {
            println!("{statement}");
        }
        for step in &plan.manual_steps {
            warn!("Manual step: {step}");
        }
        return Ok(());
    }

    let before = serde_json::to_string_pretty(&from.target_schema.to_bigquery_json())?;
    let after = serde_json::to_string_pretty(&to.target_schema.to_bigquery_json())?;
    let text = TextDiff::from_lines(&before, &after);
    print!(
        "{}",
        text.unified_diff()
            .context_radius(3)
            .header(
                &format!("v{}", from.version_number),
                &format!("v{}", to.version_number)
            )
    );
    Ok(())
}
