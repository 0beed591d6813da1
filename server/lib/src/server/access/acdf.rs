//! The access control decision function. It is handed tuples that already apply to the
//! requester and decides for one protected item and one set of permissions.

use super::aci::{Permissions, ProtectedItemSpec, UserClass};
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcdfTuple {
    pub tag: String,
    pub user_classes: Vec<UserClass>,
    pub authentication_level: AuthenticationLevel,
    pub protected_items: Vec<ProtectedItemSpec>,
    pub grants: Permissions,
    pub denials: Permissions,
    pub precedence: u8,
}

/// A tuple together with how specifically its user classes matched the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcdfTupleExtended {
    pub tuple: AcdfTuple,
    pub user_class_precedence: u8,
}

#[derive(Debug, Clone, Copy)]
pub enum ProtectedItem<'a> {
    Entry,
    AttributeType(&'a AttributeType),
    AttributeValue(&'a AttributeType, &'a AttributeValue),
}

impl ProtectedItem<'_> {
    fn covered_by(&self, spec: &ProtectedItemSpec) -> bool {
        match (self, spec) {
            (ProtectedItem::Entry, ProtectedItemSpec::Entry) => true,
            (
                ProtectedItem::AttributeType(_),
                ProtectedItemSpec::AllUserAttributeTypes
                | ProtectedItemSpec::AllUserAttributeTypesAndValues,
            ) => true,
            (ProtectedItem::AttributeType(t), ProtectedItemSpec::AttributeType(types)) => {
                types.contains(t)
            }
            (
                ProtectedItem::AttributeValue(_, _),
                ProtectedItemSpec::AllUserAttributeTypesAndValues,
            ) => true,
            (ProtectedItem::AttributeValue(t, _), ProtectedItemSpec::AllAttributeValues(types)) => {
                types.contains(t)
            }
            _ => false,
        }
    }
}

pub trait AccessControlDecision: Send + Sync {
    fn decide(
        &self,
        tuples: &[AcdfTupleExtended],
        requester: Option<&DistinguishedName>,
        item: ProtectedItem<'_>,
        requested: Permissions,
    ) -> bool;
}

/// Highest precedence wins, then the most specific user class. A denial among the
/// survivors beats any grant, and the grants must cover every requested permission.
#[derive(Debug, Default, Clone)]
pub struct BasicAcdf;

impl AccessControlDecision for BasicAcdf {
    fn decide(
        &self,
        tuples: &[AcdfTupleExtended],
        requester: Option<&DistinguishedName>,
        item: ProtectedItem<'_>,
        requested: Permissions,
    ) -> bool {
        let relevant: Vec<&AcdfTupleExtended> = tuples
            .iter()
            .filter(|t| t.tuple.protected_items.iter().any(|p| item.covered_by(p)))
            .filter(|t| {
                t.tuple.grants.intersects(requested) || t.tuple.denials.intersects(requested)
            })
            .collect();

        let Some(max_precedence) = relevant.iter().map(|t| t.tuple.precedence).max() else {
            trace!(?requester, ?item, ?requested, "no relevant tuples");
            return false;
        };

        let relevant: Vec<&AcdfTupleExtended> = relevant
            .into_iter()
            .filter(|t| t.tuple.precedence == max_precedence)
            .collect();

        let max_specificity = relevant
            .iter()
            .map(|t| t.user_class_precedence)
            .max()
            .unwrap_or_default();

        let mut granted = Permissions::empty();
        for t in relevant
            .iter()
            .filter(|t| t.user_class_precedence == max_specificity)
        {
            if t.tuple.denials.intersects(requested) {
                trace!(?requester, ?item, tag = %t.tuple.tag, "denied by tuple");
                return false;
            }
            granted |= t.tuple.grants;
        }

        granted.contains(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(precedence: u8, class: u8, grants: Permissions, denials: Permissions) -> AcdfTupleExtended {
        AcdfTupleExtended {
            tuple: AcdfTuple {
                tag: format!("p{precedence}c{class}"),
                user_classes: vec![UserClass::AllUsers],
                authentication_level: AuthenticationLevel::None,
                protected_items: vec![ProtectedItemSpec::Entry],
                grants,
                denials,
                precedence,
            },
            user_class_precedence: class,
        }
    }

    #[test]
    fn test_acdf_precedence_and_denial() {
        let acdf = BasicAcdf;
        let discover = Permissions::BROWSE | Permissions::RETURN_DN;
        let grant_all = tuple(10, 0, discover, Permissions::empty());
        let deny_low = tuple(5, 3, Permissions::empty(), Permissions::BROWSE);
        assert!(acdf.decide(&[grant_all.clone(), deny_low], None, ProtectedItem::Entry, discover));

        let deny_equal = tuple(10, 0, Permissions::empty(), Permissions::BROWSE);
        assert!(!acdf.decide(
            &[grant_all.clone(), deny_equal],
            None,
            ProtectedItem::Entry,
            discover
        ));

        // A more specific user class at the same precedence overrides.
        let grant_specific = tuple(10, 3, discover, Permissions::empty());
        let deny_general = tuple(10, 0, Permissions::empty(), Permissions::BROWSE);
        assert!(acdf.decide(
            &[grant_specific, deny_general],
            None,
            ProtectedItem::Entry,
            discover
        ));
    }

    #[test]
    fn test_acdf_partial_grant_is_denied() {
        let acdf = BasicAcdf;
        let browse_only = tuple(1, 0, Permissions::BROWSE, Permissions::empty());
        assert!(!acdf.decide(
            &[browse_only],
            None,
            ProtectedItem::Entry,
            Permissions::BROWSE | Permissions::RETURN_DN
        ));
        assert!(!acdf.decide(&[], None, ProtectedItem::Entry, Permissions::READ));
    }

    #[test]
    fn test_acdf_protected_item_coverage() {
        let acdf = BasicAcdf;
        let cn = AttributeType::new("cn");
        let mail = AttributeType::new("mail");
        let mut t = tuple(1, 0, Permissions::READ, Permissions::empty());
        t.tuple.protected_items = vec![ProtectedItemSpec::AttributeType(vec![cn.clone()])];
        assert!(acdf.decide(&[t.clone()], None, ProtectedItem::AttributeType(&cn), Permissions::READ));
        assert!(!acdf.decide(&[t.clone()], None, ProtectedItem::AttributeType(&mail), Permissions::READ));
        let v = AttributeValue::from("x");
        assert!(!acdf.decide(&[t], None, ProtectedItem::AttributeValue(&cn, &v), Permissions::READ));
    }
}
