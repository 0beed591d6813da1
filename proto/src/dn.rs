//! Distinguished names. A [DistinguishedName] is held root-first (the X.500 RDNSequence
//! order), while its string form is most-specific-first as in `cn=Alice,o=Example,c=US`.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::internal::OperationError;

// Characters that must be escaped inside an attribute value.
const SPECIAL_CHARS: &[char] = &[',', '+', '=', '\\', '"', '<', '>', ';'];

/// An attribute type, held as a lower case descriptor or dotted OID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeType(String);

impl AttributeType {
    pub fn new(name: &str) -> Self {
        AttributeType(name.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for AttributeType {
    fn from(s: &str) -> Self {
        AttributeType::new(s)
    }
}

impl AsRef<str> for AttributeType {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An attribute value. Values are opaque octets to the core, and only the matching
/// rules interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeValue(Vec<u8>);

impl AttributeValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        AttributeValue(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue(s.as_bytes().to_vec())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue(s.into_bytes())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        AttributeValue(v)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeTypeAndValue {
    pub atype: AttributeType,
    pub value: AttributeValue,
}

impl AttributeTypeAndValue {
    pub fn new(atype: &str, value: &str) -> Self {
        AttributeTypeAndValue {
            atype: AttributeType::new(atype),
            value: AttributeValue::from(value),
        }
    }
}

impl fmt::Display for AttributeTypeAndValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.atype, escape_value(&self.value.to_string_lossy()))
    }
}

/// A relative distinguished name. Multi-valued RDNs are kept sorted so that two RDNs
/// with the same components compare equal byte for byte regardless of input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rdn(Vec<AttributeTypeAndValue>);

impl Rdn {
    pub fn new(mut avas: Vec<AttributeTypeAndValue>) -> Self {
        avas.sort();
        avas.dedup();
        Rdn(avas)
    }

    pub fn single(atype: &str, value: &str) -> Self {
        Rdn(vec![AttributeTypeAndValue::new(atype, value)])
    }

    pub fn avas(&self) -> &[AttributeTypeAndValue] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, atype: &AttributeType) -> Option<&AttributeValue> {
        self.0
            .iter()
            .find(|ava| &ava.atype == atype)
            .map(|ava| &ava.value)
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, ava) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("+")?;
            }
            write!(f, "{ava}")?;
        }
        Ok(())
    }
}

impl FromStr for Rdn {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let avas = split_unescaped(s, '+')
            .into_iter()
            .map(parse_ava)
            .collect::<Result<Vec<_>, _>>()?;
        if avas.is_empty() {
            return Err(OperationError::MalformedArgument(format!("empty rdn in {s:?}")));
        }
        Ok(Rdn::new(avas))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistinguishedName(Vec<Rdn>);

impl DistinguishedName {
    pub fn root() -> Self {
        DistinguishedName(Vec::new())
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        DistinguishedName(rdns)
    }

    pub fn rdns(&self) -> &[Rdn] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last_rdn(&self) -> Option<&Rdn> {
        self.0.last()
    }

    pub fn child(&self, rdn: Rdn) -> Self {
        let mut rdns = self.0.clone();
        rdns.push(rdn);
        DistinguishedName(rdns)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.prefix(self.0.len() - 1))
        }
    }

    /// The first `n` RDNs of this name. Asking for more than exist yields the whole name.
    pub fn prefix(&self, n: usize) -> Self {
        DistinguishedName(self.0.iter().take(n).cloned().collect())
    }

    /// Exact (byte equal) prefix test. Matching rule aware comparison lives with the
    /// matching rule registry in the server.
    pub fn starts_with(&self, prefix: &DistinguishedName) -> bool {
        prefix.0.len() <= self.0.len() && self.0.iter().zip(prefix.0.iter()).all(|(a, b)| a == b)
    }

    pub fn concat(&self, suffix: &[Rdn]) -> Self {
        let mut rdns = self.0.clone();
        rdns.extend(suffix.iter().cloned());
        DistinguishedName(rdns)
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, rdn) in self.0.iter().rev().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl FromStr for DistinguishedName {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(DistinguishedName::root());
        }
        let mut rdns = split_unescaped(s, ',')
            .into_iter()
            .map(Rdn::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        rdns.reverse();
        Ok(DistinguishedName(rdns))
    }
}

fn parse_ava(s: &str) -> Result<AttributeTypeAndValue, OperationError> {
    let mut parts = split_unescaped(s, '=').into_iter();
    let atype = parts.next().map(str::trim).unwrap_or_default();
    let value = parts
        .next()
        .ok_or_else(|| OperationError::MalformedArgument(format!("missing '=' in {s:?}")))?;
    if atype.is_empty() || parts.next().is_some() {
        return Err(OperationError::MalformedArgument(format!(
            "invalid attribute type and value {s:?}"
        )));
    }
    Ok(AttributeTypeAndValue {
        atype: AttributeType::new(atype),
        value: AttributeValue::from(unescape_value(value.trim())),
    })
}

fn split_unescaped(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&input[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unescape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if SPECIAL_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
