//! Matching rules. The core never compares attribute values itself: naming, filters and
//! access control all defer to the rule registered for an attribute type here.

use std::cmp::Ordering;
use std::str::FromStr;

use hashbrown::HashMap;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchingRule {
    CaseIgnore,
    CaseExact,
    OctetString,
    Numeric,
    DistinguishedName,
}

impl MatchingRule {
    /// The comparable form of a value under this rule. Strings have surrounding space
    /// removed and inner runs of space collapsed, caseIgnore folds case as well.
    fn normalise(self, value: &AttributeValue) -> Vec<u8> {
        match self {
            MatchingRule::OctetString => value.as_bytes().to_vec(),
            MatchingRule::CaseExact => collapse_spaces(&value.to_string_lossy()).into_bytes(),
            MatchingRule::CaseIgnore | MatchingRule::DistinguishedName => {
                collapse_spaces(&value.to_string_lossy().to_lowercase()).into_bytes()
            }
            MatchingRule::Numeric => value
                .to_string_lossy()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .into_bytes(),
        }
    }
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct MatchingRuleRegistry {
    rules: HashMap<AttributeType, MatchingRule>,
    default_rule: MatchingRule,
}

impl Default for MatchingRuleRegistry {
    fn default() -> Self {
        let mut rules = HashMap::new();
        for name in [
            "cn",
            "sn",
            "givenname",
            "o",
            "ou",
            "c",
            "l",
            "st",
            "uid",
            "mail",
            "description",
            "title",
            ATTR_OBJECTCLASS,
            ATTR_ADMINISTRATIVE_ROLE,
            ATTR_ACCESS_CONTROL_SCHEME,
        ] {
            rules.insert(AttributeType::new(name), MatchingRule::CaseIgnore);
        }
        for name in [
            ATTR_MEMBER,
            ATTR_UNIQUE_MEMBER,
            ATTR_ALIASED_ENTRY_NAME,
            "seealso",
            "owner",
        ] {
            rules.insert(AttributeType::new(name), MatchingRule::DistinguishedName);
        }
        for name in ["uidnumber", "gidnumber", "employeenumber"] {
            rules.insert(AttributeType::new(name), MatchingRule::Numeric);
        }
        rules.insert(AttributeType::new("userpassword"), MatchingRule::OctetString);

        MatchingRuleRegistry {
            rules,
            default_rule: MatchingRule::CaseIgnore,
        }
    }
}

impl MatchingRuleRegistry {
    pub fn register(&mut self, atype: &str, rule: MatchingRule) {
        self.rules.insert(AttributeType::new(atype), rule);
    }

    pub fn rule_for(&self, atype: &AttributeType) -> MatchingRule {
        self.rules.get(atype).copied().unwrap_or(self.default_rule)
    }

    pub fn equal(&self, atype: &AttributeType, a: &AttributeValue, b: &AttributeValue) -> bool {
        match self.rule_for(atype) {
            MatchingRule::DistinguishedName => {
                let parsed = (
                    a.as_str().map(DistinguishedName::from_str),
                    b.as_str().map(DistinguishedName::from_str),
                );
                match parsed {
                    (Some(Ok(a)), Some(Ok(b))) => self.dn_equal(&a, &b),
                    // Not a parseable name, fall back to comparing the folded strings.
                    _ => {
                        MatchingRule::CaseIgnore.normalise(a) == MatchingRule::CaseIgnore.normalise(b)
                    }
                }
            }
            rule => rule.normalise(a) == rule.normalise(b),
        }
    }

    /// Ordering for `greaterOrEqual` and `lessOrEqual`. None when the values have no
    /// order under the rule, which makes the filter item undefined.
    pub fn ordering(
        &self,
        atype: &AttributeType,
        a: &AttributeValue,
        b: &AttributeValue,
    ) -> Option<Ordering> {
        match self.rule_for(atype) {
            MatchingRule::Numeric => {
                let rule = MatchingRule::Numeric;
                let a = String::from_utf8(rule.normalise(a)).ok()?.parse::<i128>().ok()?;
                let b = String::from_utf8(rule.normalise(b)).ok()?.parse::<i128>().ok()?;
                Some(a.cmp(&b))
            }
            MatchingRule::DistinguishedName => None,
            rule => Some(rule.normalise(a).cmp(&rule.normalise(b))),
        }
    }

    pub fn substrings(
        &self,
        atype: &AttributeType,
        value: &AttributeValue,
        initial: Option<&AttributeValue>,
        any: &[AttributeValue],
        last: Option<&AttributeValue>,
    ) -> bool {
        let rule = match self.rule_for(atype) {
            MatchingRule::DistinguishedName => MatchingRule::CaseIgnore,
            rule => rule,
        };
        let haystack = rule.normalise(value);
        let mut rest: &[u8] = haystack.as_slice();

        if let Some(initial) = initial {
            let initial = rule.normalise(initial);
            if !rest.starts_with(&initial) {
                return false;
            }
            rest = &rest[initial.len()..];
        }

        for part in any {
            let part = rule.normalise(part);
            match find_subslice(rest, &part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }

        match last {
            Some(last) => rest.ends_with(&rule.normalise(last)),
            None => true,
        }
    }

    /// Approximate matching compares with all spaces removed and case folded.
    pub fn approximate(&self, atype: &AttributeType, a: &AttributeValue, b: &AttributeValue) -> bool {
        let fold = |v: &AttributeValue| {
            v.to_string_lossy()
                .chars()
                .filter(|c| !c.is_whitespace())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        };
        match self.rule_for(atype) {
            MatchingRule::OctetString | MatchingRule::Numeric => self.equal(atype, a, b),
            _ => fold(a) == fold(b),
        }
    }

    /// RDN equality under the naming matchers: both sides hold the same attribute types
    /// and each value matches under its type's equality rule.
    pub fn rdn_matches(&self, a: &Rdn, b: &Rdn) -> bool {
        a.len() == b.len()
            && a.avas().iter().all(|ava| {
                b.avas()
                    .iter()
                    .any(|other| ava.atype == other.atype && self.equal(&ava.atype, &ava.value, &other.value))
            })
    }

    pub fn dn_equal(&self, a: &DistinguishedName, b: &DistinguishedName) -> bool {
        a.len() == b.len()
            && a
                .rdns()
                .iter()
                .zip(b.rdns().iter())
                .all(|(x, y)| self.rdn_matches(x, y))
    }

    /// True when `prefix` names `dn` or one of its superiors.
    pub fn dn_is_prefix(&self, prefix: &DistinguishedName, dn: &DistinguishedName) -> bool {
        prefix.len() <= dn.len()
            && prefix
                .rdns()
                .iter()
                .zip(dn.rdns().iter())
                .all(|(x, y)| self.rdn_matches(x, y))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_ignore_equality() {
        let reg = MatchingRuleRegistry::default();
        let cn = AttributeType::new("cn");
        assert!(reg.equal(&cn, &"Alice  Smith".into(), &"alice smith".into()));
        let pw = AttributeType::new("userPassword");
        assert!(!reg.equal(&pw, &"Secret".into(), &"secret".into()));
    }

    #[test]
    fn test_rdn_matching_folds_case() {
        let reg = MatchingRuleRegistry::default();
        assert!(reg.rdn_matches(&Rdn::single("CN", "ALICE"), &Rdn::single("cn", "alice")));
        assert!(!reg.rdn_matches(&Rdn::single("cn", "alice"), &Rdn::single("uid", "alice")));
        let multi = Rdn::from_str("cn=a+uid=b").expect("parse");
        assert!(!reg.rdn_matches(&multi, &Rdn::single("cn", "a")));
    }

    #[test]
    fn test_numeric_ordering_and_substrings() {
        let reg = MatchingRuleRegistry::default();
        let uidn = AttributeType::new("uidNumber");
        assert_eq!(
            reg.ordering(&uidn, &"10".into(), &"9".into()),
            Some(Ordering::Greater)
        );
        let cn = AttributeType::new("cn");
        assert!(reg.substrings(&cn, &"Alice Smith".into(), Some(&"al".into()), &["e s".into()], Some(&"TH".into())));
        assert!(!reg.substrings(&cn, &"Alice".into(), None, &["bob".into()], None));
    }

    #[test]
    fn test_dn_valued_equality() {
        let reg = MatchingRuleRegistry::default();
        let member = AttributeType::new("member");
        assert!(reg.equal(
            &member,
            &"CN=Alice,O=Example,C=US".into(),
            &"cn=alice,o=example,c=us".into()
        ));
    }
}
