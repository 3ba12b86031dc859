use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    governance::BreakingChangePolicy,
    mapping::DepthPolicy,
    naming::{IllegalCharacterPolicy, NamingPolicy},
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Infer canonical schemas, map them to BigQuery, and govern their evolution",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer a canonical schema from a JSON, JSON Lines, or CSV file
    Probe(ProbeArgs),
    /// Infer, map, and validate a BigQuery schema without storing anything
    Map(MapArgs),
    /// Run a governed submission against a version store
    Submit(SubmitArgs),
    /// Approve or reject a pending submission ticket
    Approve(ApproveArgs),
    /// List the accepted versions of a dataset
    History(HistoryArgs),
    /// Compare two accepted versions of a dataset
    Diff(DiffArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input document (.json, .jsonl, .ndjson, .csv, .tsv); `-` reads JSON from stdin
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Dataset identifier the schema belongs to
    #[arg(short = 'd', long = "dataset")]
    pub dataset: String,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of CSV input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Args, Default)]
pub struct PolicyArgs {
    /// Governance config file (.yml, .yaml, or .json)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Number of records sampled during inference
    #[arg(long = "sample-size")]
    pub sample_size: Option<usize>,
    /// How field names are rewritten for the target
    #[arg(long = "naming-policy", value_enum)]
    pub naming_policy: Option<NamingPolicy>,
    /// What to do with characters not allowed in target identifiers
    #[arg(long = "illegal-characters", value_enum)]
    pub illegal_characters: Option<IllegalCharacterPolicy>,
    /// Deepest nesting level allowed before the depth policy applies
    #[arg(long = "max-depth")]
    pub max_depth: Option<usize>,
    /// Fail or collapse structures nested beyond the depth limit
    #[arg(long = "depth-policy", value_enum)]
    pub depth_policy: Option<DepthPolicy>,
    /// Reject breaking drift outright or hold it for approval
    #[arg(long = "breaking-changes", value_enum)]
    pub breaking_changes: Option<BreakingChangePolicy>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    /// Destination file (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Serialization format of the canonical schema
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    /// Destination for the BigQuery JSON schema (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Optional destination for the validation result as JSON
    #[arg(long = "report")]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub policy: PolicyArgs,
    /// Root directory of the version store
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Destination for the mapping plan or pending-approval ticket
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ApproveArgs {
    /// Pending-approval ticket written by `submit`
    #[arg(short = 't', long = "ticket")]
    pub ticket: PathBuf,
    /// Root directory of the version store
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    #[command(flatten)]
    pub policy: PolicyArgs,
    /// Who made the decision
    #[arg(long = "by")]
    pub decided_by: String,
    /// Free-form note recorded with an approval
    #[arg(long, conflicts_with = "reject")]
    pub note: Option<String>,
    /// Reject the ticket instead of approving it
    #[arg(long, requires = "reason")]
    pub reject: bool,
    /// Reason recorded with a rejection
    #[arg(long)]
    pub reason: Option<String>,
    /// Destination for the outcome (stdout when omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Root directory of the version store
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Dataset identifier
    #[arg(short = 'd', long = "dataset")]
    pub dataset: String,
    /// Emit the full versions as JSON instead of a summary table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Root directory of the version store
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Dataset identifier
    #[arg(short = 'd', long = "dataset")]
    pub dataset: String,
    /// Older version number
    #[arg(long)]
    pub from: u32,
    /// Newer version number (defaults to the latest)
    #[arg(long)]
    pub to: Option<u32>,
    /// Print migration DDL instead of a unified diff of the target schemas
    #[arg(long)]
    pub ddl: bool,
    #[command(flatten)]
    pub policy: PolicyArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
