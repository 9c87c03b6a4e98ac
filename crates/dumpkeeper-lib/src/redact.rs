//! Masking of secret substrings in text bound for logs and notification channels.

use regex::{Regex, RegexBuilder};

/// Replacement written in place of every secret occurrence.
pub const MASK: &str = "****";

/// Case-insensitive literal matcher over a fixed set of secrets.
///
/// Matching scans left to right. When two secrets start at the same position
/// the longer one wins, so a secret that is a prefix of another never leaves
/// the tail of the longer one exposed.
#[derive(Debug, Clone)]
pub struct Redactor {
    pattern: Option<Regex>,
}

impl Redactor {
    /// Builds a redactor for `connection_string` plus the configured `secrets`.
    ///
    /// The connection string is always part of the set. Empty and duplicate
    /// entries are ignored.
    pub fn new<I, S>(connection_string: &str, secrets: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut all: Vec<String> = vec![connection_string.to_string()];
        all.extend(secrets.into_iter().map(|s| s.as_ref().to_string()));
        Self::from_secrets(all)
    }

    fn from_secrets(secrets: Vec<String>) -> Result<Self, regex::Error> {
        let mut unique: Vec<String> = Vec::new();
        for secret in secrets {
            if secret.is_empty() || unique.iter().any(|s| s.eq_ignore_ascii_case(&secret)) {
                continue;
            }
            unique.push(secret);
        }

        if unique.is_empty() {
            return Ok(Self { pattern: None });
        }

        // Stable sort keeps the configured order among equal lengths.
        unique.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let alternation = unique
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Returns `text` with every secret occurrence replaced by [`MASK`].
    pub fn filter(&self, text: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern.replace_all(text, MASK).into_owned(),
            None => text.to_string(),
        }
    }
}
