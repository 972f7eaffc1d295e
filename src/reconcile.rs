use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{IdentifierMap, SubmissionAttachment};
use crate::error::GraderError;

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const ID_PLACEHOLDER: &str = "{id}";

/// Decides whether a file name belongs to an identifier.
pub trait IdentifierMatcher: Send + Sync {
    fn matches(&self, file_name: &str, identifier: &str) -> bool;
}

/// Case-sensitive containment anywhere in the name. `abc1` also matches
/// `abc12_report.pdf`, so identifiers must not be substrings of each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl IdentifierMatcher for SubstringMatcher {
    fn matches(&self, file_name: &str, identifier: &str) -> bool {
        !identifier.is_empty() && file_name.contains(identifier)
    }
}

/// File stem equals the identifier exactly (`abc1.pdf` but not `abc1_v2.pdf`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactStemMatcher;

impl IdentifierMatcher for ExactStemMatcher {
    fn matches(&self, file_name: &str, identifier: &str) -> bool {
        Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem == identifier)
            .unwrap_or(false)
    }
}

/// Regex template where `{id}` is replaced by the escaped identifier,
/// e.g. `^{id}_` or `(^|_){id}(_|\.)`.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    template: String,
}

impl PatternMatcher {
    pub fn new(template: impl Into<String>) -> Result<Self, GraderError> {
        let template = template.into();
        if !template.contains(ID_PLACEHOLDER) {
            return Err(GraderError::InvalidPattern(format!(
                "pattern must contain {ID_PLACEHOLDER}: {template}"
            )));
        }
        Regex::new(&template.replace(ID_PLACEHOLDER, "x"))
            .map_err(|err| GraderError::InvalidPattern(err.to_string()))?;
        Ok(Self { template })
    }

    fn compile(&self, identifier: &str) -> Option<Regex> {
        Regex::new(
            &self
                .template
                .replace(ID_PLACEHOLDER, &regex::escape(identifier)),
        )
        .ok()
    }
}

impl IdentifierMatcher for PatternMatcher {
    fn matches(&self, file_name: &str, identifier: &str) -> bool {
        if identifier.is_empty() {
            return false;
        }
        self.compile(identifier)
            .map(|re| re.is_match(file_name))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    #[default]
    Substring,
    Prefix,
    ExactStem,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn IdentifierMatcher> {
        match self {
            MatchPolicy::Substring => Box::new(SubstringMatcher),
            MatchPolicy::Prefix => Box::new(PatternMatcher {
                template: format!("^{ID_PLACEHOLDER}"),
            }),
            MatchPolicy::ExactStem => Box::new(ExactStemMatcher),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::Substring => write!(f, "substring"),
            MatchPolicy::Prefix => write!(f, "prefix"),
            MatchPolicy::ExactStem => write!(f, "exact-stem"),
        }
    }
}

pub fn sanitize_filename(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|ch| {
            if RESERVED_CHARS.contains(&ch) || (ch as u32) < 0x20 {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let cleaned = replaced
        .trim()
        .trim_matches(|ch: char| ch == '.' || ch == ' ')
        .trim();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}

/// SIS id for a submission's user, or the raw internal id when unknown.
pub fn resolve_owner<'a>(map: &'a IdentifierMap, internal_id: &'a str) -> &'a str {
    map.get(internal_id).unwrap_or(internal_id)
}

pub fn attachment_file_name(map: &IdentifierMap, attachment: &SubmissionAttachment) -> String {
    let owner = resolve_owner(map, &attachment.owning_submission_user_id);
    format!(
        "{}_{}",
        sanitize_filename(owner),
        sanitize_filename(&attachment.display_name)
    )
}
