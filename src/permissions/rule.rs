// src/permissions/rule.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BotError, Result};

/// Separator between domain segments
pub const DOMAIN_SEPARATOR: char = '.';

/// Suffix marking an inherited (non-explicit) rule in the stored form
const WILDCARD_SUFFIX: &str = ".*";

/// Whether a rule grants or denies its domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Grant,
    Deny,
}

impl Sign {
    fn prefix(self) -> char {
        match self {
            Sign::Grant => '+',
            Sign::Deny => '-',
        }
    }
}

/// A single grant or deny statement on a capability domain.
///
/// Stored as `+sp.chat.quote` (explicit grant) or `-sp.chat.*` (inherited deny).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionRule {
    pub domain: String,
    pub sign: Sign,
    pub explicit: bool,
}

impl PermissionRule {
    pub fn new(domain: &str, sign: Sign, explicit: bool) -> Result<Self> {
        validate_domain(domain)?;
        Ok(Self {
            domain: domain.to_string(),
            sign,
            explicit,
        })
    }

    pub fn grant(domain: &str) -> Result<Self> {
        Self::new(domain, Sign::Grant, true)
    }

    pub fn deny(domain: &str) -> Result<Self> {
        Self::new(domain, Sign::Deny, true)
    }

    /// Parse the stored string form of a rule
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut chars = raw.chars();
        let sign = match chars.next() {
            Some('+') => Sign::Grant,
            Some('-') => Sign::Deny,
            _ => {
                return Err(BotError::InvalidDomain {
                    domain: raw.to_string(),
                    reason: "rule must start with '+' or '-'".to_string(),
                })
            }
        };

        let body = chars.as_str();
        let (domain, explicit) = match body.strip_suffix(WILDCARD_SUFFIX) {
            Some(domain) => (domain, false),
            None => (body, true),
        };

        Self::new(domain, sign, explicit)
    }

    pub fn is_grant(&self) -> bool {
        self.sign == Sign::Grant
    }

    /// Number of domain segments; higher is more specific
    pub fn specificity(&self) -> usize {
        self.domain.split(DOMAIN_SEPARATOR).count()
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.sign.prefix(), self.domain)?;
        if !self.explicit {
            f.write_str(WILDCARD_SUFFIX)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PermissionRule {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Check a domain: non-empty, lower-case segments of `[a-z0-9_-]` separated by `.`
pub fn validate_domain(domain: &str) -> Result<()> {
    let invalid = |reason: &str| BotError::InvalidDomain {
        domain: domain.to_string(),
        reason: reason.to_string(),
    };

    if domain.is_empty() {
        return Err(invalid("domain is empty"));
    }

    for segment in domain.split(DOMAIN_SEPARATOR) {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(invalid("segments must be lower-case [a-z0-9_-]"));
        }
    }

    Ok(())
}

/// Iterate a domain and its parents, most specific first.
///
/// `sp.chat.quote` yields `sp.chat.quote`, `sp.chat`, `sp`.
pub fn domain_prefixes(domain: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(domain);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.rfind(DOMAIN_SEPARATOR).map(|i| &current[..i]);
        Some(current)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_explicit_and_wildcard() {
        let rule = PermissionRule::parse("+sp.chat.quote").unwrap();
        assert_eq!(rule.domain, "sp.chat.quote");
        assert_eq!(rule.sign, Sign::Grant);
        assert!(rule.explicit);

        let rule = PermissionRule::parse("-sp.guild.*").unwrap();
        assert_eq!(rule.domain, "sp.guild");
        assert_eq!(rule.sign, Sign::Deny);
        assert!(!rule.explicit);
        assert_eq!(rule.to_string(), "-sp.guild.*");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(PermissionRule::parse("sp.chat").is_err());
        assert!(PermissionRule::parse("+").is_err());
        assert!(PermissionRule::parse("+Sp.Chat").is_err());
        assert!(PermissionRule::parse("+sp..chat").is_err());
        assert!(PermissionRule::parse("+*").is_err());
    }

    #[test]
    fn test_domain_prefixes() {
        let prefixes: Vec<&str> = domain_prefixes("sp.chat.quote").collect();
        assert_eq!(prefixes, vec!["sp.chat.quote", "sp.chat", "sp"]);

        let single: Vec<&str> = domain_prefixes("sp").collect();
        assert_eq!(single, vec!["sp"]);
    }

    #[test]
    fn test_specificity() {
        assert_eq!(PermissionRule::grant("sp").unwrap().specificity(), 1);
        assert_eq!(PermissionRule::grant("sp.chat.quote").unwrap().specificity(), 3);
    }
}
