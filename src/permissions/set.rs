// src/permissions/set.rs
use std::collections::HashMap;
use tracing::warn;

use super::rule::{domain_prefixes, PermissionRule, Sign};

/// Separator between rules in the stored form of a set
const RULE_SEPARATOR: char = ',';

/// Which side of a merge belongs to the more senior subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seniority {
    IncomingSenior,
    BaseSenior,
    Equal,
}

impl From<bool> for Seniority {
    fn from(incoming_is_more_senior: bool) -> Self {
        if incoming_is_more_senior {
            Seniority::IncomingSenior
        } else {
            Seniority::BaseSenior
        }
    }
}

/// Ordered rules belonging to one subject (a role, or a guild's custom-command overrides).
///
/// Insertion order is kept so equally ranked rules break ties by first-seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    rules: Vec<PermissionRule>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    /// Decode the stored comma-joined form.
    ///
    /// Malformed entries are dropped with a warning instead of failing the whole set.
    pub fn parse_lossy(raw: &str, subject: &str) -> Self {
        let mut rules = Vec::new();
        for entry in raw.split(RULE_SEPARATOR) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match PermissionRule::parse(entry) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!("Skipping malformed permission rule for {}: {}", subject, e),
            }
        }
        Self { rules }
    }

    /// Encode into the stored comma-joined form
    pub fn encode(&self) -> String {
        self.rules
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn push(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    /// Remove every rule on exactly this domain, returning how many were removed
    pub fn remove_domain(&mut self, domain: &str) -> usize {
        let before = self.rules.len();
        self.rules.retain(|r| r.domain != domain);
        before - self.rules.len()
    }

    pub fn rules(&self) -> &[PermissionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Collapse duplicate domains within this set into one effective rule each
    pub fn flatten(&self) -> PermissionSet {
        let mut out = Flattener::default();
        for rule in &self.rules {
            out.absorb(rule.clone(), Seniority::Equal);
        }
        out.finish()
    }

    /// Merge `incoming` into this set.
    ///
    /// The result holds one effective rule per distinct domain. At equal domain the
    /// more senior side wins; at equal seniority deny beats grant, then explicit
    /// beats inherited, then the first-seen rule stays.
    pub fn merge(&self, incoming: &PermissionSet, seniority: impl Into<Seniority>) -> PermissionSet {
        let seniority = seniority.into();
        let mut out = Flattener::default();
        for rule in &self.rules {
            out.absorb(rule.clone(), Seniority::Equal);
        }

        // Each incoming domain meets the base once, after its own duplicates settled
        for rule in incoming.flatten().rules {
            out.absorb(rule, seniority);
        }
        out.finish()
    }

    /// Find the most specific rule covering `domain`, walking from the full
    /// domain up through its parents.
    pub fn lookup(&self, domain: &str) -> Option<&PermissionRule> {
        domain_prefixes(domain).find_map(|prefix| {
            self.rules
                .iter()
                .filter(|r| r.domain == prefix)
                .fold(None, |best: Option<&PermissionRule>, candidate| match best {
                    Some(current) if !equal_rank_replaces(current, candidate) => Some(current),
                    _ => Some(candidate),
                })
        })
    }

    /// Convenience: is `domain` granted by this set alone
    pub fn allows(&self, domain: &str) -> bool {
        self.lookup(domain).map(|r| r.is_grant()).unwrap_or(false)
    }
}

impl FromIterator<PermissionRule> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionRule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// Accumulates one rule per domain in first-seen order
#[derive(Default)]
struct Flattener {
    rules: Vec<PermissionRule>,
    index: HashMap<String, usize>,
}

impl Flattener {
    fn absorb(&mut self, rule: PermissionRule, seniority: Seniority) {
        match self.index.get(&rule.domain) {
            None => {
                self.index.insert(rule.domain.clone(), self.rules.len());
                self.rules.push(rule);
            }
            Some(&i) => {
                let replace = match seniority {
                    Seniority::IncomingSenior => true,
                    Seniority::BaseSenior => false,
                    Seniority::Equal => equal_rank_replaces(&self.rules[i], &rule),
                };
                if replace {
                    self.rules[i] = rule;
                }
            }
        }
    }

    fn finish(self) -> PermissionSet {
        PermissionSet { rules: self.rules }
    }
}

/// Tie-break between two rules of equal domain and equal seniority
fn equal_rank_replaces(current: &PermissionRule, candidate: &PermissionRule) -> bool {
    if current.sign != candidate.sign {
        return candidate.sign == Sign::Deny;
    }
    if current.explicit != candidate.explicit {
        return candidate.explicit;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(raw: &str) -> PermissionSet {
        PermissionSet::parse_lossy(raw, "test")
    }

    #[test]
    fn test_parse_and_encode() {
        let s = set("+sp.chat.*, -sp.chat.quote,+sp.etc.ping");
        assert_eq!(s.len(), 3);
        assert_eq!(s.encode(), "+sp.chat.*,-sp.chat.quote,+sp.etc.ping");
    }

    #[test]
    fn test_parse_skips_malformed() {
        let s = set("+sp.chat,garbage,,+SP.BAD,-sp.guild");
        assert_eq!(s.encode(), "+sp.chat,-sp.guild");
    }

    #[test]
    fn test_lookup_prefers_most_specific() {
        let s = set("+sp.chat,-sp.chat.quote");
        assert_eq!(s.lookup("sp.chat.quote").unwrap().sign, Sign::Deny);
        assert_eq!(s.lookup("sp.chat.say").unwrap().sign, Sign::Grant);
        assert!(s.lookup("sp.guild").is_none());
    }

    #[test]
    fn test_specificity_beats_seniority() {
        // Junior role holds the more specific rule
        let senior = set("-sp.chat");
        let junior = set("+sp.chat.quote");
        let merged = senior.merge(&junior, false);
        assert!(merged.allows("sp.chat.quote"));
        assert!(!merged.allows("sp.chat.other"));

        // And the other way around
        let senior = set("+sp.chat.quote");
        let junior = set("-sp.chat");
        let merged = senior.merge(&junior, false);
        assert!(merged.allows("sp.chat.quote"));
    }

    #[test]
    fn test_senior_wins_equal_specificity() {
        let senior = set("+sp.chat.quote");
        let junior = set("-sp.chat.quote");
        let merged = senior.merge(&junior, Seniority::BaseSenior);
        assert!(merged.allows("sp.chat.quote"));

        let merged = junior.merge(&senior, Seniority::IncomingSenior);
        assert!(merged.allows("sp.chat.quote"));
    }

    #[test]
    fn test_seniority_beats_explicitness() {
        let senior = set("+sp.chat.*");
        let junior = set("-sp.chat");
        let merged = senior.merge(&junior, Seniority::BaseSenior);
        let rule = merged.lookup("sp.chat").unwrap();
        assert_eq!(rule.sign, Sign::Grant);
        assert!(!rule.explicit);
    }

    #[test]
    fn test_equal_seniority_deny_beats_explicit_grant() {
        let a = set("-sp.chat.*");
        let b = set("+sp.chat");
        for merged in [a.merge(&b, Seniority::Equal), b.merge(&a, Seniority::Equal)] {
            let rule = merged.lookup("sp.chat").unwrap();
            assert_eq!(rule.sign, Sign::Deny);
            assert!(!rule.explicit);
            assert!(!merged.allows("sp.chat"));
        }
    }

    #[test]
    fn test_equal_seniority_explicit_beats_inherited_same_sign() {
        let a = set("+sp.chat.*");
        let b = set("+sp.chat");
        let rule = a.merge(&b, Seniority::Equal).lookup("sp.chat").cloned().unwrap();
        assert!(rule.explicit);
    }

    #[test]
    fn test_equal_seniority_deny_beats_grant() {
        let a = set("+sp.chat");
        let b = set("-sp.chat");
        assert!(!a.merge(&b, Seniority::Equal).allows("sp.chat"));
        assert!(!b.merge(&a, Seniority::Equal).allows("sp.chat"));
    }

    #[test]
    fn test_merge_flattens_to_one_rule_per_domain() {
        let a = set("+sp.chat,+sp.etc,+sp.chat");
        let b = set("-sp.etc,+sp.guild.config");
        let merged = a.merge(&b, Seniority::BaseSenior);
        let domains: Vec<&str> = merged.rules().iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["sp.chat", "sp.etc", "sp.guild.config"]);
        assert!(merged.allows("sp.etc"));
    }

    #[test]
    fn test_duplicates_within_incoming_compete_equally() {
        let base = PermissionSet::new();
        let incoming = set("+sp.chat,-sp.chat");
        let merged = base.merge(&incoming, Seniority::IncomingSenior);
        assert_eq!(merged.len(), 1);
        assert!(!merged.allows("sp.chat"));
    }

    #[test]
    fn test_senior_incoming_duplicates_settle_before_merge() {
        // On its own the senior set resolves to its deny
        let senior = set("+sp.chat,-sp.chat.*");
        assert_eq!(senior.flatten().lookup("sp.chat").unwrap().sign, Sign::Deny);

        let junior = set("+sp.chat");
        let merged = junior.merge(&senior, true);
        assert_eq!(merged.len(), 1);
        let rule = merged.lookup("sp.chat").unwrap();
        assert_eq!(rule.sign, Sign::Deny);
        assert!(!rule.explicit);

        // Same shape with the grant settled as winner inside the senior set
        let senior = set("+sp.etc.*,+sp.etc");
        let merged = set("-sp.etc").merge(&senior, true);
        let rule = merged.lookup("sp.etc").unwrap();
        assert_eq!(rule.sign, Sign::Grant);
        assert!(rule.explicit);
    }

    #[test]
    fn test_lookup_on_unflattened_set_uses_tie_break() {
        let s = set("+sp.chat.*,+sp.chat,-sp.chat");
        assert_eq!(s.lookup("sp.chat"), s.flatten().lookup("sp.chat"));
        assert!(!s.allows("sp.chat"));
    }

    #[test]
    fn test_remove_domain() {
        let mut s = set("+sp.chat,-sp.chat.*,+sp.etc");
        assert_eq!(s.remove_domain("sp.chat"), 2);
        assert_eq!(s.encode(), "+sp.etc");
    }
}
