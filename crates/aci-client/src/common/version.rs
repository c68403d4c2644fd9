//! API version parsing
//!
//! Versions reported in the `API-Version` header are dotted numbers such as
//! `3.5` or `4.0.2`, occasionally with a pre-release suffix (`4.1-beta1`).
//! Comparison is numeric per component, so `3.10` sorts after `3.5`, and a
//! pre-release sorts below its release: `3.5-beta1` is older than `3.5`.

use crate::error::AciError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed, comparable API version
#[derive(Debug, Clone)]
pub struct ApiVersion {
    raw: String,
    /// Numeric components with trailing zeros removed
    parts: Vec<u64>,
    /// Pre-release tag such as "beta1" or "rc2"
    pre: Option<String>,
}

impl ApiVersion {
    pub fn parse(raw: &str) -> Result<Self, AciError> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);

        // Build metadata ("+local") does not take part in ordering
        let release = trimmed.split('+').next().unwrap_or_default();

        let mut parts = Vec::new();
        let mut pre = None;
        for component in release.split('.') {
            let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            let value = digits
                .parse::<u64>()
                .map_err(|_| AciError::VersionParse(raw.to_string()))?;
            parts.push(value);
            // "4.1-beta1.2": nothing after a suffixed component is numeric release data
            if digits.len() != component.len() {
                let tag = component[digits.len()..].trim_start_matches(['-', '_', '.']);
                pre = Some(tag.to_ascii_lowercase()).filter(|tag| !tag.is_empty());
                break;
            }
        }

        if parts.is_empty() {
            return Err(AciError::VersionParse(raw.to_string()));
        }
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
            pre,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }
}

impl FromStr for ApiVersion {
    type Err = AciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for ApiVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ApiVersion {}

impl PartialOrd for ApiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts).then_with(|| match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
