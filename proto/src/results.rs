use serde::{Deserialize, Serialize};

use crate::chaining::ContinuationReference;
use crate::dn::{AttributeType, AttributeValue, DistinguishedName, Rdn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitProblem {
    TimeLimitExceeded,
    SizeLimitExceeded,
    AdministrativeLimitExceeded,
}

/// Why a list or search result is not the whole answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartialOutcomeQualifier {
    pub limit_problem: Option<LimitProblem>,
    pub unexplored: Vec<ContinuationReference>,
    pub unavailable_critical_extensions: bool,
    pub query_reference: Option<Vec<u8>>,
}

impl PartialOutcomeQualifier {
    pub fn is_empty(&self) -> bool {
        self.limit_problem.is_none()
            && self.unexplored.is_empty()
            && !self.unavailable_critical_extensions
            && self.query_reference.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubordinateInfo {
    pub rdn: Rdn,
    pub alias_entry: bool,
    /// False when the information came from a shadow copy.
    pub from_entry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListResult {
    pub name: Option<DistinguishedName>,
    pub subordinates: Vec<SubordinateInfo>,
    pub partial_outcome_qualifier: Option<PartialOutcomeQualifier>,
    pub alias_dereferenced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub atype: AttributeType,
    pub values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInformation {
    pub name: DistinguishedName,
    pub from_entry: bool,
    /// Set when attributes or values were withheld for lack of permission.
    pub incomplete_entry: bool,
    pub attributes: Vec<Attribute>,
}

impl EntryInformation {
    pub fn attribute(&self, atype: &str) -> Option<&Attribute> {
        let atype = AttributeType::new(atype);
        self.attributes.iter().find(|a| a.atype == atype)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: Option<DistinguishedName>,
    pub entries: Vec<EntryInformation>,
    pub partial_outcome_qualifier: Option<PartialOutcomeQualifier>,
    pub alias_dereferenced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResult {
    pub entry: EntryInformation,
    pub alias_dereferenced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareResult {
    pub name: Option<DistinguishedName>,
    pub matched: bool,
    pub from_entry: bool,
    pub alias_dereferenced: bool,
}
