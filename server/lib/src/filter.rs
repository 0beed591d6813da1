//! Filter evaluation against the attributes of one DSE.
//!
//! Evaluation is three valued. An item is undefined when its attribute is absent from the
//! entry in a way that cannot be decided, when the matching rule cannot order the values,
//! or when the requester is not permitted to match against the attribute or value. An
//! undefined item never selects an entry, and `Not` of undefined is still undefined.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::prelude::*;

/// Asked once per attribute type (with `None`) and once per candidate value.
pub type PermittedToMatch<'a> = dyn Fn(&AttributeType, Option<&AttributeValue>) -> bool + 'a;

pub trait FilterEvaluator: Send + Sync {
    fn evaluate(
        &self,
        filter: &Filter,
        attributes: &BTreeMap<AttributeType, Vec<AttributeValue>>,
        permitted: &PermittedToMatch<'_>,
    ) -> bool;
}

#[derive(Debug, Clone)]
pub struct BasicFilterEvaluator {
    registry: Arc<MatchingRuleRegistry>,
}

impl BasicFilterEvaluator {
    pub fn new(registry: Arc<MatchingRuleRegistry>) -> Self {
        BasicFilterEvaluator { registry }
    }

    fn eval(
        &self,
        filter: &Filter,
        attributes: &BTreeMap<AttributeType, Vec<AttributeValue>>,
        permitted: &PermittedToMatch<'_>,
    ) -> Option<bool> {
        match filter {
            Filter::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match self.eval(part, attributes, permitted) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => result = None,
                    }
                }
                result
            }
            Filter::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match self.eval(part, attributes, permitted) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => result = None,
                    }
                }
                result
            }
            Filter::Not(inner) => self.eval(inner, attributes, permitted).map(|b| !b),
            Filter::Item(item) => self.eval_item(item, attributes, permitted),
        }
    }

    fn eval_item(
        &self,
        item: &FilterItem,
        attributes: &BTreeMap<AttributeType, Vec<AttributeValue>>,
        permitted: &PermittedToMatch<'_>,
    ) -> Option<bool> {
        let atype = item.attribute_type();
        if !permitted(atype, None) {
            return None;
        }
        let values = attributes.get(atype).map(|v| v.as_slice()).unwrap_or(&[]);
        let reg = &self.registry;

        if let FilterItem::Present(_) = item {
            return Some(!values.is_empty());
        }

        // Only values the requester may match against take part, the rest are invisible.
        let mut any_undefined = false;
        for value in values.iter().filter(|v| permitted(atype, Some(*v))) {
            let hit = match item {
                FilterItem::Equality(_, asserted) => Some(reg.equal(atype, value, asserted)),
                FilterItem::ApproximateMatch(_, asserted) => {
                    Some(reg.approximate(atype, value, asserted))
                }
                FilterItem::GreaterOrEqual(_, asserted) => reg
                    .ordering(atype, value, asserted)
                    .map(|o| o != Ordering::Less),
                FilterItem::LessOrEqual(_, asserted) => reg
                    .ordering(atype, value, asserted)
                    .map(|o| o != Ordering::Greater),
                FilterItem::Substrings {
                    initial, any, last, ..
                } => Some(reg.substrings(atype, value, initial.as_ref(), any, last.as_ref())),
                FilterItem::Present(_) => Some(true),
            };
            match hit {
                Some(true) => return Some(true),
                Some(false) => {}
                None => any_undefined = true,
            }
        }

        if any_undefined {
            None
        } else {
            Some(false)
        }
    }
}

impl FilterEvaluator for BasicFilterEvaluator {
    fn evaluate(
        &self,
        filter: &Filter,
        attributes: &BTreeMap<AttributeType, Vec<AttributeValue>>,
        permitted: &PermittedToMatch<'_>,
    ) -> bool {
        let result = self.eval(filter, attributes, permitted);
        trace!(%filter, ?result, "filter evaluated");
        result.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> BTreeMap<AttributeType, Vec<AttributeValue>> {
        Dse::new(DseType::ENTRY)
            .with_attribute("cn", &["Alice Smith"])
            .with_attribute("uidNumber", &["1000"])
            .with_attribute("userPassword", &["hunter2"])
            .attributes
    }

    fn evaluator() -> BasicFilterEvaluator {
        BasicFilterEvaluator::new(Arc::new(MatchingRuleRegistry::default()))
    }

    #[test]
    fn test_filter_basic_items() {
        let ev = evaluator();
        let a = attrs();
        let all = |_: &AttributeType, _: Option<&AttributeValue>| true;
        assert!(ev.evaluate(&f_eq("CN", "alice smith"), &a, &all));
        assert!(ev.evaluate(&f_ge("uidNumber", "999"), &a, &all));
        assert!(!ev.evaluate(&f_le("uidNumber", "999"), &a, &all));
        assert!(ev.evaluate(&f_and(vec![f_pres("cn"), f_not(f_pres("mail"))]), &a, &all));
        assert!(ev.evaluate(&Filter::everything(), &a, &all));
        assert!(!ev.evaluate(&f_or(vec![]), &a, &all));
    }

    #[test]
    fn test_filter_unpermitted_is_undefined() {
        let ev = evaluator();
        let a = attrs();
        let no_pw = |t: &AttributeType, _: Option<&AttributeValue>| t.as_str() != "userpassword";
        assert!(!ev.evaluate(&f_eq("userPassword", "hunter2"), &a, &no_pw));
        // Negating an undefined item must not select the entry either.
        assert!(!ev.evaluate(&f_not(f_eq("userPassword", "hunter2")), &a, &no_pw));
        assert!(ev.evaluate(
            &f_or(vec![f_eq("userPassword", "x"), f_eq("cn", "alice smith")]),
            &a,
            &no_pw
        ));
    }

    #[test]
    fn test_filter_unordered_values_are_undefined() {
        let ev = evaluator();
        let a = Dse::new(DseType::ENTRY)
            .with_attribute("member", &["cn=a,o=b"])
            .attributes;
        let all = |_: &AttributeType, _: Option<&AttributeValue>| true;
        assert!(!ev.evaluate(&f_ge("member", "cn=a"), &a, &all));
        assert!(!ev.evaluate(&f_not(f_ge("member", "cn=a")), &a, &all));
    }
}
