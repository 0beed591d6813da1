use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::server::access::AciItem;

bitflags::bitflags! {
    /// The DSE types of X.501. These are not exclusive, one DSE is frequently several at
    /// once, such as an entry that is also an administrative point and a shadowed context
    /// prefix.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DseType: u32 {
        const ROOT = 1 << 0;
        const GLUE = 1 << 1;
        const CP = 1 << 2;
        const ENTRY = 1 << 3;
        const ALIAS = 1 << 4;
        const SUBR = 1 << 5;
        const NSSR = 1 << 6;
        const SUPR = 1 << 7;
        const XR = 1 << 8;
        const ADM_POINT = 1 << 9;
        const SUBENTRY = 1 << 10;
        const SHADOW = 1 << 11;
        const IMM_SUPR = 1 << 12;
        const RHOB = 1 << 13;
        const FAMILY_MEMBER = 1 << 14;
        const DIT_BRIDGE = 1 << 15;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AdministrativeRoles: u32 {
        const AUTONOMOUS = 1 << 0;
        const ACCESS_CONTROL_SPECIFIC = 1 << 1;
        const ACCESS_CONTROL_INNER = 1 << 2;
        const SUBSCHEMA = 1 << 3;
        const COLLECTIVE_SPECIFIC = 1 << 4;
        const COLLECTIVE_INNER = 1 << 5;
        const SERVICE_SPECIFIC = 1 << 6;
        const PASSWORD_ADMIN_SPECIFIC = 1 << 7;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrativePoint {
    pub roles: AdministrativeRoles,
    pub access_control_scheme: Option<String>,
    /// ACI that protects the subentries of this administrative point.
    pub subentry_aci: Vec<AciItem>,
}

/// The part of the DIT a subentry applies to, relative to its administrative point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeSpecification {
    pub base: Vec<Rdn>,
    pub minimum: usize,
    pub maximum: Option<usize>,
    pub chop_before: Vec<Vec<Rdn>>,
    pub chop_after: Vec<Vec<Rdn>>,
    /// When set, only entries holding one of these object classes are in scope.
    pub object_classes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubentryRecord {
    pub subtree_specification: Vec<SubtreeSpecification>,
    pub prescriptive_aci: Vec<AciItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub aliased_entry_name: DistinguishedName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowRecord {
    pub supplier_knowledge: Vec<MasterOrShadowAccessPoint>,
    pub subordinate_complete: bool,
    pub attribute_complete: bool,
}

/// A DSA specific entry: what this DSA holds at one name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dse {
    pub dse_type: DseType,
    pub attributes: BTreeMap<AttributeType, Vec<AttributeValue>>,
    pub entry_aci: Vec<AciItem>,
    pub hierarchy_parent: Option<DistinguishedName>,
    pub admin_point: Option<AdministrativePoint>,
    pub subentry: Option<SubentryRecord>,
    pub alias: Option<AliasRecord>,
    pub shadow: Option<ShadowRecord>,
    /// Access points for subordinate, cross, immediate superior and DIT bridge references.
    pub specific_knowledge: Vec<MasterOrShadowAccessPoint>,
    /// One set of access points per non-specific subordinate DSA.
    pub non_specific_knowledge: Vec<Vec<MasterOrShadowAccessPoint>>,
}

impl Dse {
    pub fn new(dse_type: DseType) -> Self {
        Dse {
            dse_type,
            ..Default::default()
        }
    }

    pub fn is(&self, dse_type: DseType) -> bool {
        self.dse_type.contains(dse_type)
    }

    pub fn is_any(&self, dse_type: DseType) -> bool {
        self.dse_type.intersects(dse_type)
    }

    /// A full entry, as opposed to a subentry or an alias.
    pub fn is_entry(&self) -> bool {
        self.is(DseType::ENTRY) && !self.is_any(DseType::SUBENTRY | DseType::ALIAS)
    }

    pub fn with_attribute(mut self, atype: &str, values: &[&str]) -> Self {
        self.attributes.insert(
            AttributeType::new(atype),
            values.iter().map(|v| AttributeValue::from(*v)).collect(),
        );
        self
    }

    pub fn get(&self, atype: &str) -> Option<&[AttributeValue]> {
        self.attributes
            .get(&AttributeType::new(atype))
            .map(|v| v.as_slice())
    }

    pub fn has_object_class(&self, class: &str) -> bool {
        self.get(ATTR_OBJECTCLASS)
            .map(|ocs| {
                ocs.iter()
                    .any(|oc| oc.to_string_lossy().eq_ignore_ascii_case(class))
            })
            .unwrap_or(false)
    }

    pub fn roles(&self) -> AdministrativeRoles {
        self.admin_point
            .as_ref()
            .map(|ap| ap.roles)
            .unwrap_or_default()
    }
}
