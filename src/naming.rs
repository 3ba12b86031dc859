//! Target identifier normalisation.

use std::sync::LazyLock;

use clap::ValueEnum;
use heck::ToSnakeCase;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MappingError;

pub const MAX_IDENTIFIER_LENGTH: usize = 300;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));
static ILLEGAL_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("illegal character pattern"));
static UNDERSCORE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{2,}").expect("underscore pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    #[serde(alias = "Preserve")]
    Preserve,
    #[default]
    #[serde(alias = "SnakeCase")]
    SnakeCase,
    #[serde(alias = "Lowercase")]
    Lowercase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IllegalCharacterPolicy {
    /// Substitute `_`, collapse runs, and prefix `_` when the name does not
    /// start with a letter or underscore.
    #[default]
    #[serde(alias = "Replace")]
    Replace,
    #[serde(alias = "Strip")]
    Strip,
    #[serde(alias = "Reject")]
    Reject,
}

pub fn apply_naming(name: &str, policy: NamingPolicy) -> String {
    match policy {
        NamingPolicy::Preserve => name.to_string(),
        NamingPolicy::SnakeCase => name.to_snake_case(),
        NamingPolicy::Lowercase => name.to_lowercase(),
    }
}

pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Produces a target identifier for the canonical field at `path`, then
/// re-validates the result.
pub fn target_identifier(
    path: &str,
    name: &str,
    naming: NamingPolicy,
    illegal: IllegalCharacterPolicy,
    max_length: usize,
) -> Result<String, MappingError> {
    let renamed = apply_naming(name.trim(), naming);
    let substituted = match illegal {
        IllegalCharacterPolicy::Replace => {
            let replaced = ILLEGAL_RUN_RE.replace_all(&renamed, "_");
            let collapsed = UNDERSCORE_RUN_RE.replace_all(&replaced, "_").into_owned();
            match collapsed.chars().next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' => collapsed,
                _ => format!("_{collapsed}"),
            }
        }
        IllegalCharacterPolicy::Strip => ILLEGAL_RUN_RE.replace_all(&renamed, "").into_owned(),
        IllegalCharacterPolicy::Reject => {
            if ILLEGAL_RUN_RE.is_match(&renamed) {
                return Err(MappingError::IllegalCharacters {
                    path: path.to_string(),
                });
            }
            renamed
        }
    };

    let invalid = |reason: String| MappingError::InvalidIdentifier {
        path: path.to_string(),
        name: substituted.clone(),
        reason,
    };
    if substituted.is_empty() {
        return Err(invalid("identifier is empty".to_string()));
    }
    if substituted.len() > max_length {
        return Err(invalid(format!(
            "identifier is longer than {max_length} characters"
        )));
    }
    if !is_valid_identifier(&substituted) {
        return Err(invalid(
            "identifier must start with a letter or underscore and contain only letters, digits, and underscores"
                .to_string(),
        ));
    }
    Ok(substituted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier(name: &str, naming: NamingPolicy, illegal: IllegalCharacterPolicy) -> Result<String, MappingError> {
        target_identifier(name, name, naming, illegal, MAX_IDENTIFIER_LENGTH)
    }

    #[test]
    fn replace_collapses_and_prefixes() {
        assert_eq!(
            identifier("Order Total ($)", NamingPolicy::Preserve, IllegalCharacterPolicy::Replace).unwrap(),
            "Order_Total_"
        );
        assert_eq!(
            identifier("2nd-line", NamingPolicy::Lowercase, IllegalCharacterPolicy::Replace).unwrap(),
            "_2nd_line"
        );
    }

    #[test]
    fn snake_case_uses_word_boundaries() {
        assert_eq!(
            identifier("customerId", NamingPolicy::SnakeCase, IllegalCharacterPolicy::Replace).unwrap(),
            "customer_id"
        );
    }

    #[test]
    fn strip_can_leave_an_invalid_identifier() {
        let err = identifier("9-lives", NamingPolicy::Preserve, IllegalCharacterPolicy::Strip).unwrap_err();
        assert!(matches!(err, MappingError::InvalidIdentifier { ref name, .. } if name == "9lives"));
        let empty = identifier("$$", NamingPolicy::Preserve, IllegalCharacterPolicy::Strip).unwrap_err();
        assert!(matches!(empty, MappingError::InvalidIdentifier { .. }));
    }

    #[test]
    fn reject_refuses_illegal_characters() {
        let err = identifier("a.b", NamingPolicy::Preserve, IllegalCharacterPolicy::Reject).unwrap_err();
        assert_eq!(err, MappingError::IllegalCharacters { path: "a.b".to_string() });
    }

    #[test]
    fn long_names_are_rejected() {
        let long = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(identifier(&long, NamingPolicy::Preserve, IllegalCharacterPolicy::Replace).is_err());
    }
}
