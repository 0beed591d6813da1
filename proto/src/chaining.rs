//! Chaining arguments and continuation references. These carry the state of one logical
//! operation between DSAs, and the unresolved remainder of work that one DSA hands to
//! another.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dn::DistinguishedName;
use crate::internal::OperationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum NameResolutionPhase {
    #[default]
    NotStarted = 1,
    Proceeding = 2,
    Completed = 3,
}

impl TryFrom<u8> for NameResolutionPhase {
    type Error = OperationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NameResolutionPhase::NotStarted),
            2 => Ok(NameResolutionPhase::Proceeding),
            3 => Ok(NameResolutionPhase::Completed),
            v => Err(OperationError::MalformedArgument(format!(
                "unrecognised name resolution phase {v}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OperationProgress {
    pub phase: NameResolutionPhase,
    /// Index into the target name of the next RDN to resolve. Only meaningful while
    /// proceeding.
    pub next_rdn_to_be_resolved: Option<usize>,
}

impl OperationProgress {
    pub fn not_started() -> Self {
        OperationProgress::default()
    }

    pub fn proceeding(next_rdn_to_be_resolved: usize) -> Self {
        OperationProgress {
            phase: NameResolutionPhase::Proceeding,
            next_rdn_to_be_resolved: Some(next_rdn_to_be_resolved),
        }
    }

    pub fn completed() -> Self {
        OperationProgress {
            phase: NameResolutionPhase::Completed,
            next_rdn_to_be_resolved: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Superior,
    Subordinate,
    Cross,
    NonSpecificSubordinate,
    Supplier,
    Master,
    ImmediateSuperior,
    SelfRef,
    DitBridge,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ae_title: DistinguishedName,
    pub address: Vec<String>,
    #[serde(default)]
    pub protocol_information: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPointCategory {
    #[default]
    Master,
    Shadow,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasterOrShadowAccessPoint {
    pub access_point: AccessPoint,
    pub category: AccessPointCategory,
    pub chaining_required: bool,
}

impl MasterOrShadowAccessPoint {
    pub fn master(access_point: AccessPoint) -> Self {
        MasterOrShadowAccessPoint {
            access_point,
            category: AccessPointCategory::Master,
            chaining_required: false,
        }
    }

    pub fn shadow(access_point: AccessPoint) -> Self {
        MasterOrShadowAccessPoint {
            access_point,
            category: AccessPointCategory::Shadow,
            chaining_required: false,
        }
    }
}

/// A primary access point to continue an operation at, plus the fallbacks the
/// chaining collaborator may try in order without resolving the name again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointInformation {
    pub access_point: AccessPoint,
    pub category: AccessPointCategory,
    pub chaining_required: bool,
    pub additional_points: Vec<MasterOrShadowAccessPoint>,
}

impl AccessPointInformation {
    /// The primary point first, then each additional point.
    pub fn candidates(&self) -> impl Iterator<Item = &AccessPoint> {
        std::iter::once(&self.access_point)
            .chain(self.additional_points.iter().map(|mosap| &mosap.access_point))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationReference {
    pub target_object: DistinguishedName,
    pub aliased_rdns: Option<usize>,
    pub operation_progress: OperationProgress,
    pub rdns_resolved: Option<usize>,
    pub reference_type: ReferenceType,
    pub access_points: Vec<AccessPointInformation>,
    pub entry_only: bool,
    pub exclusions: Vec<DistinguishedName>,
    pub return_to_dua: bool,
    pub name_resolution_on_master: bool,
}

impl ContinuationReference {
    pub fn new(
        target_object: DistinguishedName,
        operation_progress: OperationProgress,
        reference_type: ReferenceType,
        access_points: Vec<AccessPointInformation>,
    ) -> Self {
        ContinuationReference {
            target_object,
            aliased_rdns: None,
            operation_progress,
            rdns_resolved: None,
            reference_type,
            access_points,
            entry_only: false,
            exclusions: Vec::new(),
            return_to_dua: false,
            name_resolution_on_master: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceItem {
    pub dsa: DistinguishedName,
    pub target_object: Option<DistinguishedName>,
    pub operation_progress: OperationProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationLevel {
    #[default]
    None,
    Simple,
    Strong,
}

/// The context of one logical operation as it moves between DSAs. Values are never
/// mutated once built. Each step of traversal derives a new value with one of the
/// `with_*` methods, so a caller keeps its own copy intact for its own continuation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainingArguments {
    pub originator: Option<DistinguishedName>,
    pub target_object: Option<DistinguishedName>,
    pub operation_progress: OperationProgress,
    pub trace_information: Vec<TraceItem>,
    pub alias_dereferenced: bool,
    pub aliased_rdns: Option<usize>,
    pub return_cross_refs: bool,
    pub reference_type: Option<ReferenceType>,
    /// Absolute deadline, as time since the unix epoch.
    pub time_limit: Option<Duration>,
    pub authentication_level: AuthenticationLevel,
    pub exclusions: Vec<DistinguishedName>,
    pub exclude_shadows: bool,
    pub name_resolve_on_master: bool,
    pub entry_only: bool,
}

impl ChainingArguments {
    pub fn with_progress(&self, operation_progress: OperationProgress) -> Self {
        ChainingArguments {
            operation_progress,
            ..self.clone()
        }
    }

    /// The context for resolving the name an alias points at: name resolution starts
    /// over at the root of the new name.
    pub fn dereferenced_alias(&self, target: DistinguishedName, aliased_rdns: usize) -> Self {
        ChainingArguments {
            target_object: Some(target),
            operation_progress: OperationProgress::not_started(),
            alias_dereferenced: true,
            aliased_rdns: Some(aliased_rdns),
            ..self.clone()
        }
    }

    pub fn with_trace(&self, item: TraceItem) -> Self {
        let mut trace_information = self.trace_information.clone();
        trace_information.push(item);
        ChainingArguments {
            trace_information,
            ..self.clone()
        }
    }

    /// The arguments to send along with a continuation reference when this DSA chains
    /// it onwards.
    pub fn for_continuation(&self, cr: &ContinuationReference, this_dsa: &DistinguishedName) -> Self {
        let item = TraceItem {
            dsa: this_dsa.clone(),
            target_object: self.target_object.clone(),
            operation_progress: self.operation_progress,
        };
        let mut exclusions = self.exclusions.clone();
        exclusions.extend(cr.exclusions.iter().cloned());
        ChainingArguments {
            target_object: Some(cr.target_object.clone()),
            operation_progress: cr.operation_progress,
            aliased_rdns: cr.aliased_rdns.or(self.aliased_rdns),
            reference_type: Some(cr.reference_type),
            entry_only: cr.entry_only,
            name_resolve_on_master: cr.name_resolution_on_master,
            exclusions,
            ..self.with_trace(item)
        }
    }

    /// True when the trace already shows this DSA handling the same target at the same
    /// point of progress, which means the operation has looped back to us.
    pub fn is_looping(&self, this_dsa: &DistinguishedName) -> bool {
        self.trace_information.iter().any(|item| {
            &item.dsa == this_dsa
                && item.target_object == self.target_object
                && item.operation_progress == self.operation_progress
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_phase_from_u8() {
        assert_eq!(
            NameResolutionPhase::try_from(2u8).expect("phase"),
            NameResolutionPhase::Proceeding
        );
        assert_eq!(
            NameResolutionPhase::try_from(9u8),
            Err(OperationError::MalformedArgument(String::new()))
        );
    }

    #[test]
    fn test_derivation_leaves_original_untouched() {
        let base = ChainingArguments::default();
        let target = DistinguishedName::from_str("cn=Alice,o=Example,c=US").expect("parse");
        let derived = base.dereferenced_alias(target.clone(), 2);
        assert!(derived.alias_dereferenced);
        assert_eq!(derived.target_object, Some(target));
        assert!(!base.alias_dereferenced);
        assert_eq!(base.target_object, None);

        let traced = base.with_trace(TraceItem {
            dsa: DistinguishedName::from_str("cn=dsa1").expect("parse"),
            target_object: None,
            operation_progress: OperationProgress::not_started(),
        });
        assert_eq!(traced.trace_information.len(), 1);
        assert!(base.trace_information.is_empty());
    }

    #[test]
    fn test_loop_detection_by_trace() {
        let me = DistinguishedName::from_str("cn=dsa1").expect("parse");
        let target = DistinguishedName::from_str("o=Example,c=US").expect("parse");
        let cr = ContinuationReference::new(
            target,
            OperationProgress::proceeding(1),
            ReferenceType::Subordinate,
            Vec::new(),
        );
        let first = ChainingArguments::default().for_continuation(&cr, &me);
        assert!(!first.is_looping(&me));
        // The remote DSA hands the same reference straight back.
        let second = first.for_continuation(&cr, &DistinguishedName::from_str("cn=dsa2").expect("parse"));
        let returned = second.with_progress(first.operation_progress);
        assert!(returned.is_looping(&DistinguishedName::from_str("cn=dsa2").expect("parse")));
    }
}
