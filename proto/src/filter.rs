use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dn::{AttributeType, AttributeValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterItem {
    Equality(AttributeType, AttributeValue),
    Substrings {
        atype: AttributeType,
        initial: Option<AttributeValue>,
        any: Vec<AttributeValue>,
        last: Option<AttributeValue>,
    },
    GreaterOrEqual(AttributeType, AttributeValue),
    LessOrEqual(AttributeType, AttributeValue),
    Present(AttributeType),
    ApproximateMatch(AttributeType, AttributeValue),
}

impl FilterItem {
    pub fn attribute_type(&self) -> &AttributeType {
        match self {
            FilterItem::Equality(a, _)
            | FilterItem::GreaterOrEqual(a, _)
            | FilterItem::LessOrEqual(a, _)
            | FilterItem::Present(a)
            | FilterItem::ApproximateMatch(a, _) => a,
            FilterItem::Substrings { atype, .. } => atype,
        }
    }
}

/// A search filter. An empty `And` is always true and an empty `Or` is always false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Item(FilterItem),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::And(Vec::new())
    }
}

impl Filter {
    pub fn everything() -> Self {
        Filter::default()
    }
}

pub fn f_eq(atype: &str, value: &str) -> Filter {
    Filter::Item(FilterItem::Equality(
        AttributeType::new(atype),
        AttributeValue::from(value),
    ))
}

pub fn f_pres(atype: &str) -> Filter {
    Filter::Item(FilterItem::Present(AttributeType::new(atype)))
}

pub fn f_ge(atype: &str, value: &str) -> Filter {
    Filter::Item(FilterItem::GreaterOrEqual(
        AttributeType::new(atype),
        AttributeValue::from(value),
    ))
}

pub fn f_le(atype: &str, value: &str) -> Filter {
    Filter::Item(FilterItem::LessOrEqual(
        AttributeType::new(atype),
        AttributeValue::from(value),
    ))
}

pub fn f_approx(atype: &str, value: &str) -> Filter {
    Filter::Item(FilterItem::ApproximateMatch(
        AttributeType::new(atype),
        AttributeValue::from(value),
    ))
}

pub fn f_sub(atype: &str, initial: Option<&str>, any: &[&str], last: Option<&str>) -> Filter {
    Filter::Item(FilterItem::Substrings {
        atype: AttributeType::new(atype),
        initial: initial.map(AttributeValue::from),
        any: any.iter().map(|v| AttributeValue::from(*v)).collect(),
        last: last.map(AttributeValue::from),
    })
}

pub fn f_and(filters: Vec<Filter>) -> Filter {
    Filter::And(filters)
}

pub fn f_or(filters: Vec<Filter>) -> Filter {
    Filter::Or(filters)
}

pub fn f_not(filter: Filter) -> Filter {
    Filter::Not(Box::new(filter))
}

impl fmt::Display for FilterItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterItem::Equality(a, v) => write!(f, "({a}={v})"),
            FilterItem::GreaterOrEqual(a, v) => write!(f, "({a}>={v})"),
            FilterItem::LessOrEqual(a, v) => write!(f, "({a}<={v})"),
            FilterItem::ApproximateMatch(a, v) => write!(f, "({a}~={v})"),
            FilterItem::Present(a) => write!(f, "({a}=*)"),
            FilterItem::Substrings {
                atype,
                initial,
                any,
                last,
            } => {
                write!(f, "({atype}=")?;
                if let Some(i) = initial {
                    write!(f, "{i}")?;
                }
                f.write_str("*")?;
                for a in any {
                    write!(f, "{a}*")?;
                }
                if let Some(l) = last {
                    write!(f, "{l}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(inner) => {
                f.write_str("(&")?;
                for i in inner {
                    write!(f, "{i}")?;
                }
                f.write_str(")")
            }
            Filter::Or(inner) => {
                f.write_str("(|")?;
                for i in inner {
                    write!(f, "{i}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Item(item) => write!(f, "{item}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_display() {
        let f = f_and(vec![
            f_eq("objectClass", "person"),
            f_or(vec![f_sub("cn", Some("al"), &["i"], None), f_not(f_pres("mail"))]),
        ]);
        assert_eq!(
            f.to_string(),
            "(&(objectclass=person)(|(cn=al*i*)(!(mail=*))))"
        );
        assert_eq!(Filter::everything().to_string(), "(&)");
    }
}
