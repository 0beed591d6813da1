use serde::{Deserialize, Serialize};

use crate::prelude::*;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Permissions: u32 {
        const READ = 1 << 0;
        const COMPARE = 1 << 1;
        const BROWSE = 1 << 2;
        const RENAME = 1 << 3;
        const ADD = 1 << 4;
        const MODIFY = 1 << 5;
        const REMOVE = 1 << 6;
        const EXPORT = 1 << 7;
        const IMPORT = 1 << 8;
        const DISCLOSE_ON_ERROR = 1 << 9;
        const RETURN_DN = 1 << 10;
        const FILTER_MATCH = 1 << 11;
        const INVOKE = 1 << 12;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserClass {
    AllUsers,
    ThisEntry,
    Name(DistinguishedName),
    UserGroup(DistinguishedName),
    Subtree(DistinguishedName),
}

impl UserClass {
    /// How specifically this class names the requester. Among tuples of equal
    /// precedence the most specific user class wins.
    pub fn specificity(&self) -> u8 {
        match self {
            UserClass::Name(_) | UserClass::ThisEntry => 3,
            UserClass::UserGroup(_) => 2,
            UserClass::Subtree(_) => 1,
            UserClass::AllUsers => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectedItemSpec {
    Entry,
    AllUserAttributeTypes,
    AllUserAttributeTypesAndValues,
    AttributeType(Vec<AttributeType>),
    AllAttributeValues(Vec<AttributeType>),
}

/// One item of access control information, in the shape held by entries, subentries and
/// administrative points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AciItem {
    pub identification_tag: String,
    pub precedence: u8,
    pub authentication_level: AuthenticationLevel,
    pub user_classes: Vec<UserClass>,
    pub protected_items: Vec<ProtectedItemSpec>,
    pub grants: Permissions,
    pub denials: Permissions,
}

impl AciItem {
    pub fn grant(tag: &str, precedence: u8, user_classes: Vec<UserClass>) -> Self {
        AciItem {
            identification_tag: tag.to_string(),
            precedence,
            authentication_level: AuthenticationLevel::None,
            user_classes,
            protected_items: Vec::new(),
            grants: Permissions::empty(),
            denials: Permissions::empty(),
        }
    }

    pub fn protecting(mut self, items: Vec<ProtectedItemSpec>) -> Self {
        self.protected_items = items;
        self
    }

    pub fn granting(mut self, grants: Permissions) -> Self {
        self.grants |= grants;
        self
    }

    pub fn denying(mut self, denials: Permissions) -> Self {
        self.denials |= denials;
        self
    }

    pub fn requiring(mut self, level: AuthenticationLevel) -> Self {
        self.authentication_level = level;
        self
    }
}
