//! Access control glue.
//!
//! The decision itself is made by an [AccessControlDecision] over tuples produced by a
//! [TuplePreprocessor]. What lives here is the part name resolution depends on: working out
//! which access control scheme and which ACI are in force at a given DSE, from the
//! administrative points passed on the way down to it.
//!
//! Administrative areas are evaluated at the DSE being judged, not inherited from its
//! superior. An autonomous point starts a fresh list of points, and the walk for
//! prescriptive ACI stops at the closest access control specific point.

use crate::prelude::*;

mod acdf;
mod aci;
mod preprocess;

pub use self::acdf::{AcdfTuple, AcdfTupleExtended, AccessControlDecision, BasicAcdf, ProtectedItem};
pub use self::aci::{AciItem, Permissions, ProtectedItemSpec, UserClass};
pub use self::preprocess::{
    BasicTuplePreprocessor, CredentialVerifier, Credentials, GroupMembershipChecker,
    StoreGroupMembership, TuplePreprocessor,
};

use crate::dit::SubtreeSpecification;

/// Record `vertex` in an ordered list of administrative points, closest last.
pub fn push_admin_point(points: &mut Vec<Arc<Vertex>>, vertex: &Arc<Vertex>) {
    if !vertex.is(DseType::ADM_POINT) || points.last().map(|p| p.id) == Some(vertex.id) {
        return;
    }
    if vertex.dse.roles().contains(AdministrativeRoles::AUTONOMOUS) {
        points.clear();
    }
    points.push(vertex.clone());
}

/// The administrative points in force at `vertex`, including `vertex` itself.
pub fn effective_admin_points(points: &[Arc<Vertex>], vertex: &Arc<Vertex>) -> Vec<Arc<Vertex>> {
    let mut points = points.to_vec();
    push_admin_point(&mut points, vertex);
    points
}

/// Whether a subtree specification of the administrative point at `admin_dn` covers
/// `target`.
pub fn subtree_covers(
    registry: &MatchingRuleRegistry,
    admin_dn: &DistinguishedName,
    spec: &SubtreeSpecification,
    target: &Vertex,
) -> bool {
    let base = admin_dn.concat(&spec.base);
    if !registry.dn_is_prefix(&base, &target.dn) {
        return false;
    }
    let depth = target.dn.len() - base.len();
    if depth < spec.minimum || spec.maximum.map(|max| depth > max).unwrap_or(false) {
        return false;
    }
    let chopped_before = spec
        .chop_before
        .iter()
        .any(|chop| registry.dn_is_prefix(&base.concat(chop), &target.dn));
    let chopped_after = spec.chop_after.iter().any(|chop| {
        let chop = base.concat(chop);
        chop.len() < target.dn.len() && registry.dn_is_prefix(&chop, &target.dn)
    });
    if chopped_before || chopped_after {
        return false;
    }
    match &spec.object_classes {
        Some(classes) => classes.iter().any(|oc| target.dse.has_object_class(oc)),
        None => true,
    }
}

/// The access control in force at one DSE for one requester.
pub struct AccessControlContext {
    // None when no access control scheme applies, which permits everything.
    tuples: Option<Vec<AcdfTupleExtended>>,
    requester: Option<DistinguishedName>,
    acdf: Arc<dyn AccessControlDecision>,
}

impl AccessControlContext {
    pub fn unrestricted(acdf: Arc<dyn AccessControlDecision>) -> Self {
        AccessControlContext {
            tuples: None,
            requester: None,
            acdf,
        }
    }

    #[instrument(level = "trace", skip_all, fields(target = %target.dn))]
    pub async fn for_vertex(
        ctx: &DsaContext,
        inv: &Invocation,
        adm_points: &[Arc<Vertex>],
        target: &Vertex,
    ) -> Result<Self, OperationError> {
        let scheme = adm_points.iter().rev().find_map(|point| {
            point
                .dse
                .admin_point
                .as_ref()
                .and_then(|ap| ap.access_control_scheme.clone())
        });

        let Some(scheme) = scheme else {
            return Ok(Self::unrestricted(ctx.acdf.clone()));
        };

        let mut aci: Vec<AciItem> = Vec::new();
        if target.is(DseType::SUBENTRY) {
            if let Some(ap) = adm_points
                .iter()
                .rev()
                .find(|p| Some(p.id) == target.parent_id)
                .and_then(|p| p.dse.admin_point.as_ref())
            {
                aci.extend(ap.subentry_aci.iter().cloned());
            }
        } else {
            for point in adm_points.iter().rev() {
                for subentry in point.subentries.iter() {
                    let covered = subentry.subtree_specification.is_empty()
                        || subentry
                            .subtree_specification
                            .iter()
                            .any(|spec| subtree_covers(&ctx.registry, &point.dn, spec, target));
                    if covered {
                        aci.extend(subentry.prescriptive_aci.iter().cloned());
                    }
                }
                if point.dse.roles().intersects(
                    AdministrativeRoles::ACCESS_CONTROL_SPECIFIC | AdministrativeRoles::AUTONOMOUS,
                ) {
                    break;
                }
            }
        }
        aci.extend(target.dse.entry_aci.iter().cloned());

        let tuples = ctx
            .preprocessor
            .preprocess(
                &scheme,
                &aci,
                inv.requester.as_ref(),
                inv.authentication_level,
                &target.dn,
                ctx.groups.as_ref(),
                &ctx.registry,
            )
            .await?;
        trace!(aci = aci.len(), tuples = tuples.len(), %scheme, "access control context");

        Ok(AccessControlContext {
            tuples: Some(tuples),
            requester: inv.requester.clone(),
            acdf: ctx.acdf.clone(),
        })
    }

    pub fn granted(&self, item: ProtectedItem<'_>, requested: Permissions) -> bool {
        match &self.tuples {
            None => true,
            Some(tuples) => self
                .acdf
                .decide(tuples, self.requester.as_ref(), item, requested),
        }
    }

    pub fn may_discover(&self) -> bool {
        self.granted(
            ProtectedItem::Entry,
            Permissions::BROWSE | Permissions::RETURN_DN,
        )
    }

    pub fn may_disclose_on_error(&self) -> bool {
        self.granted(ProtectedItem::Entry, Permissions::DISCLOSE_ON_ERROR)
    }

    pub fn may_read_entry(&self) -> bool {
        self.granted(ProtectedItem::Entry, Permissions::READ)
    }

    pub fn may_read_attribute(&self, atype: &AttributeType) -> bool {
        self.granted(ProtectedItem::AttributeType(atype), Permissions::READ)
    }

    pub fn may_read_value(&self, atype: &AttributeType, value: &AttributeValue) -> bool {
        self.granted(ProtectedItem::AttributeValue(atype, value), Permissions::READ)
    }

    pub fn permitted_to_match(&self, atype: &AttributeType, value: Option<&AttributeValue>) -> bool {
        self.granted(ProtectedItem::AttributeType(atype), Permissions::FILTER_MATCH)
            && value
                .map(|v| self.granted(ProtectedItem::AttributeValue(atype, v), Permissions::FILTER_MATCH))
                .unwrap_or(true)
    }

    pub fn may_compare(&self, atype: &AttributeType, value: &AttributeValue) -> bool {
        self.granted(ProtectedItem::Entry, Permissions::READ)
            && self.granted(ProtectedItem::AttributeType(atype), Permissions::COMPARE)
            && self.granted(ProtectedItem::AttributeValue(atype, value), Permissions::COMPARE)
    }

    /// Build the information returned for an entry. Attributes and values the requester
    /// may not read are dropped. The entry is only flagged incomplete when the requester
    /// may learn that something was withheld.
    pub fn entry_information(
        &self,
        vertex: &Vertex,
        selection: &EntryInformationSelection,
    ) -> EntryInformation {
        let mut dropped = false;
        let mut attributes = Vec::new();

        for (atype, values) in vertex.dse.attributes.iter() {
            if !selection.wants(atype) {
                continue;
            }
            if !self.may_read_attribute(atype) {
                dropped = true;
                continue;
            }
            let readable: Vec<AttributeValue> = values
                .iter()
                .filter(|v| self.may_read_value(atype, v))
                .cloned()
                .collect();
            if readable.len() != values.len() {
                dropped = true;
            }
            if readable.is_empty() && !values.is_empty() {
                continue;
            }
            attributes.push(Attribute {
                atype: atype.clone(),
                values: if selection.types_only {
                    Vec::new()
                } else {
                    readable
                },
            });
        }

        EntryInformation {
            name: vertex.dn.clone(),
            from_entry: !vertex.is(DseType::SHADOW),
            incomplete_entry: dropped && self.may_disclose_on_error(),
            attributes,
        }
    }
}
