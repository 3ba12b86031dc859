//! Sensitivity classification of target columns.
//!
//! Each column is matched on its name and description, both normalised to
//! lowercase words. Explicit rules decide PII and sensitive classes; names
//! that only carry a red-flag word are marked for review.

use std::sync::LazyLock;

use heck::ToSnakeCase;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::target::{BqType, TargetSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sensitivity {
    Pii,
    Sensitive,
    Unknown,
    NonPii,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Control {
    RestrictedAccess,
    ReviewRequired,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnClassification {
    /// Dotted target path.
    pub path: String,
    /// Rule name such as `PII.EMAIL`, or the category for heuristic matches.
    pub class: String,
    pub category: Sensitivity,
    pub confidence: Confidence,
    pub recommended_control: Control,
}

struct Rule {
    class: &'static str,
    category: Sensitivity,
    confidence: Confidence,
    pattern: Regex,
}

fn rule(class: &'static str, category: Sensitivity, confidence: Confidence, pattern: &str) -> Rule {
    Rule {
        class,
        category,
        confidence,
        pattern: Regex::new(pattern).expect("classification pattern"),
    }
}

// Security keys come first so `ssn hash` is not read as a national id.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use Confidence::*;
    use Sensitivity::*;
    vec![
        rule("SENSITIVE.SECURITY", Sensitive, High, r"\bssn hash\b|\bencryption key\b"),
        rule("PII.EMAIL", Pii, High, r"\be ?mail\b"),
        rule("PII.NAME", Pii, Medium, r"\bname\b"),
        rule("PII.DOB", Pii, High, r"\bdob\b|\bdate of birth\b|\bbirth"),
        rule("PII.PHONE", Pii, High, r"phone|mobile|\bcontact"),
        rule("PII.ADDRESS", Pii, Medium, r"address|\baddr\b"),
        rule("PII.NATIONAL_ID", Pii, High, r"\b(aadhaar|ssn|pan)\b"),
        rule("SENSITIVE.PASSWORD", Sensitive, High, r"password|passwd|\bpwd\b"),
        rule("SENSITIVE.TOKEN", Sensitive, High, r"token|secret|\bapi key\b"),
        rule("SENSITIVE.FINANCIAL", Sensitive, Medium, r"salary|\bcost price\b|revenue"),
    ]
});

static RED_FLAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(secret|key|hash|token|auth\w*|credentials?|private|confidential|internal)\b")
        .expect("red flag pattern")
});

static WORD_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("word break pattern"));

/// `customerEmail` and `customer_email` both become `customer email`.
fn normalise(name: &str, description: Option<&str>) -> String {
    let text = format!(
        "{} {}",
        name.to_snake_case(),
        description.unwrap_or_default().to_snake_case()
    );
    WORD_BREAK_RE.replace_all(&text, " ").trim().to_string()
}

/// Classifies one column by name and optional description.
pub fn classify_column(path: &str, name: &str, description: Option<&str>) -> ColumnClassification {
    let text = normalise(name, description);
    if let Some(rule) = RULES.iter().find(|rule| rule.pattern.is_match(&text)) {
        return ColumnClassification {
            path: path.to_string(),
            class: rule.class.to_string(),
            category: rule.category,
            confidence: rule.confidence,
            recommended_control: Control::RestrictedAccess,
        };
    }
    if RED_FLAG_RE.is_match(&text) {
        return ColumnClassification {
            path: path.to_string(),
            class: "UNKNOWN".to_string(),
            category: Sensitivity::Unknown,
            confidence: Confidence::Medium,
            recommended_control: Control::ReviewRequired,
        };
    }
    ColumnClassification {
        path: path.to_string(),
        class: "NON_PII".to_string(),
        category: Sensitivity::NonPii,
        confidence: Confidence::Low,
        recommended_control: Control::None,
    }
}

/// Leaf columns that are not confidently safe, in schema order. STRUCT
/// columns are classified through their members.
pub fn classify_schema(schema: &TargetSchema) -> Vec<ColumnClassification> {
    let mut flagged = Vec::new();
    schema.walk(&mut |path, column, _| {
        if column.bq_type == BqType::Struct {
            return;
        }
        let classification = classify_column(path, &column.name, column.description.as_deref());
        if classification.category != Sensitivity::NonPii {
            flagged.push(classification);
        }
    });
    flagged
}
