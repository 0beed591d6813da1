//! Building continuation references from knowledge held at a DSE.
//!
//! Every procedure that hands work to another DSA goes through [access_point_information],
//! so the choice between master and shadow access points is made in exactly one place.

use crate::prelude::*;

/// Pick the access point to continue at from one piece of knowledge.
///
/// For operations that only read, a shadow is preferred over the master. The other
/// points follow as fallbacks, in the order they were held. Updates must reach a master,
/// so shadows are left out for them. None when nothing usable is known.
pub fn access_point_information(
    knowledge: &[MasterOrShadowAccessPoint],
    operation: OperationCode,
) -> Option<AccessPointInformation> {
    let usable: Vec<&MasterOrShadowAccessPoint> = knowledge
        .iter()
        .filter(|ap| operation.is_read_style() || ap.category == AccessPointCategory::Master)
        .collect();

    let primary_idx = if operation.is_read_style() {
        usable
            .iter()
            .position(|ap| ap.category == AccessPointCategory::Shadow)
            .or_else(|| (!usable.is_empty()).then_some(0))
    } else {
        (!usable.is_empty()).then_some(0)
    }?;

    let primary = usable[primary_idx];
    let additional_points = usable
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != primary_idx)
        .map(|(_, ap)| (*ap).clone())
        .collect();

    Some(AccessPointInformation {
        access_point: primary.access_point.clone(),
        category: primary.category,
        chaining_required: primary.chaining_required,
        additional_points,
    })
}

/// The reference type a DSE stands for. A DSE may carry several knowledge types, the
/// most specific wins.
pub fn reference_type_of(dse_type: DseType) -> Option<ReferenceType> {
    if dse_type.contains(DseType::SUBR) {
        Some(ReferenceType::Subordinate)
    } else if dse_type.contains(DseType::XR) {
        Some(ReferenceType::Cross)
    } else if dse_type.contains(DseType::IMM_SUPR) {
        Some(ReferenceType::ImmediateSuperior)
    } else if dse_type.contains(DseType::DIT_BRIDGE) {
        Some(ReferenceType::DitBridge)
    } else {
        None
    }
}

/// A reference built from the specific knowledge held at `vertex`.
pub fn specific_reference(
    vertex: &Vertex,
    target: DistinguishedName,
    progress: OperationProgress,
    operation: OperationCode,
) -> Option<ContinuationReference> {
    let reference_type = reference_type_of(vertex.dse.dse_type)?;
    let api = access_point_information(&vertex.dse.specific_knowledge, operation)?;
    let mut cr = ContinuationReference::new(target, progress, reference_type, vec![api]);
    cr.rdns_resolved = Some(vertex.dn.len());
    Some(cr)
}

/// One reference per non-specific subordinate DSA known at `vertex`. Each of them may
/// hold the target, so all are returned.
pub fn nssr_references(
    vertex: &Vertex,
    target: &DistinguishedName,
    progress: OperationProgress,
    operation: OperationCode,
) -> Vec<ContinuationReference> {
    vertex
        .dse
        .non_specific_knowledge
        .iter()
        .filter_map(|knowledge| access_point_information(knowledge, operation))
        .map(|api| {
            let mut cr = ContinuationReference::new(
                target.clone(),
                progress,
                ReferenceType::NonSpecificSubordinate,
                vec![api],
            );
            cr.rdns_resolved = Some(vertex.dn.len());
            cr
        })
        .collect()
}

/// A reference to the supplier of the shadowed context at `vertex`, with resolution to
/// be done on the master.
pub fn supplier_reference(
    vertex: &Vertex,
    target: DistinguishedName,
    progress: OperationProgress,
    operation: OperationCode,
) -> Option<ContinuationReference> {
    let shadow = vertex.dse.shadow.as_ref()?;
    let api = access_point_information(&shadow.supplier_knowledge, operation)?;
    let reference_type = if api.category == AccessPointCategory::Master {
        ReferenceType::Master
    } else {
        ReferenceType::Supplier
    };
    let mut cr = ContinuationReference::new(target, progress, reference_type, vec![api]);
    cr.name_resolution_on_master = true;
    Some(cr)
}

/// A reference to this DSA's superior, from configured superior knowledge.
pub fn superior_reference(
    config: &DsaConfiguration,
    target: DistinguishedName,
    operation: OperationCode,
) -> Option<ContinuationReference> {
    let knowledge: Vec<MasterOrShadowAccessPoint> = config
        .superior_knowledge
        .iter()
        .cloned()
        .map(MasterOrShadowAccessPoint::master)
        .collect();
    let api = access_point_information(&knowledge, operation)?;
    Some(ContinuationReference::new(
        target,
        OperationProgress::not_started(),
        ReferenceType::Superior,
        vec![api],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ap(name: &str) -> AccessPoint {
        AccessPoint {
            ae_title: DistinguishedName::from_str(name).expect("parse"),
            ..Default::default()
        }
    }

    #[test]
    fn test_shadow_preferred_for_reads() {
        let knowledge = vec![
            MasterOrShadowAccessPoint::master(ap("cn=m1")),
            MasterOrShadowAccessPoint::shadow(ap("cn=s1")),
            MasterOrShadowAccessPoint::master(ap("cn=m2")),
            MasterOrShadowAccessPoint::shadow(ap("cn=s2")),
        ];
        let api = access_point_information(&knowledge, OperationCode::Search).expect("api");
        assert_eq!(api.access_point, ap("cn=s1"));
        let rest: Vec<_> = api
            .additional_points
            .iter()
            .map(|p| p.access_point.clone())
            .collect();
        assert_eq!(rest, vec![ap("cn=m1"), ap("cn=m2"), ap("cn=s2")]);

        let api = access_point_information(&knowledge, OperationCode::ModifyEntry).expect("api");
        assert_eq!(api.access_point, ap("cn=m1"));
        assert_eq!(api.additional_points.len(), 1);

        let shadows_only = vec![MasterOrShadowAccessPoint::shadow(ap("cn=s1"))];
        assert!(access_point_information(&shadows_only, OperationCode::AddEntry).is_none());
        assert!(access_point_information(&[], OperationCode::Read).is_none());
    }

    #[test]
    fn test_reference_type_priority() {
        assert_eq!(
            reference_type_of(DseType::XR | DseType::SUBR),
            Some(ReferenceType::Subordinate)
        );
        assert_eq!(
            reference_type_of(DseType::IMM_SUPR | DseType::DIT_BRIDGE),
            Some(ReferenceType::ImmediateSuperior)
        );
        assert_eq!(reference_type_of(DseType::ENTRY | DseType::CP), None);
    }
}
