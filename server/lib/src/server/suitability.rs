use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suitability {
    Suitable,
    /// A copy exists here but may not be used, ask its supplier.
    Unsuitable,
    UnavailableCriticalExtension,
}

/// Whether a found DSE may be used to carry out the operation.
pub trait SuitabilityCheck: Send + Sync {
    fn check(&self, state: &OperationDispatcherState, vertex: &Vertex) -> Suitability;
}

#[derive(Debug, Clone, Default)]
pub struct BasicSuitability {
    pub supported_extensions: Vec<u32>,
}

impl SuitabilityCheck for BasicSuitability {
    fn check(&self, state: &OperationDispatcherState, vertex: &Vertex) -> Suitability {
        let sc = &state.service_controls;
        if let Some(ext) = sc
            .critical_extensions
            .iter()
            .find(|ext| !self.supported_extensions.contains(ext))
        {
            request_warn!(%ext, "unsupported critical extension");
            return Suitability::UnavailableCriticalExtension;
        }

        let Some(shadow) = vertex.dse.shadow.as_ref().filter(|_| vertex.is(DseType::SHADOW))
        else {
            return Suitability::Suitable;
        };

        let copy_shall_do = sc.has(ServiceControlOptions::COPY_SHALL_DO);
        let unsuitable = sc.has(ServiceControlOptions::DONT_USE_COPY)
            || state.operation.is_update()
            || state.chaining.name_resolve_on_master
            || (state.operation.is_enumerative()
                && !shadow.subordinate_complete
                && !copy_shall_do)
            || (matches!(state.operation, OperationCode::Read | OperationCode::Compare)
                && !shadow.attribute_complete
                && !copy_shall_do);

        if unsuitable {
            resolve_info!(dn = %vertex.dn, "shadow copy is not suitable");
            Suitability::Unsuitable
        } else {
            Suitability::Suitable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dit::ShadowRecord;

    fn shadow_vertex(subordinate_complete: bool) -> Vertex {
        let mut dse = Dse::new(DseType::ENTRY | DseType::SHADOW | DseType::CP);
        dse.shadow = Some(ShadowRecord {
            supplier_knowledge: Vec::new(),
            subordinate_complete,
            attribute_complete: true,
        });
        Vertex {
            id: 1,
            parent_id: Some(0),
            dn: dn!("o=Example,c=US"),
            superior: None,
            subordinates: Subordinates::InStore,
            subentries: Vec::new(),
            dse,
        }
    }

    fn state(op: OperationCode, options: ServiceControlOptions) -> OperationDispatcherState {
        OperationDispatcherState::new(
            op,
            dn!("o=Example,c=US"),
            ServiceControls {
                options,
                ..Default::default()
            },
            ChainingArguments::default(),
        )
    }

    #[test]
    fn test_shadow_suitability() {
        let check = BasicSuitability::default();
        let empty = ServiceControlOptions::empty();
        let v = shadow_vertex(false);
        assert_eq!(check.check(&state(OperationCode::Read, empty), &v), Suitability::Suitable);
        assert_eq!(
            check.check(&state(OperationCode::Read, ServiceControlOptions::DONT_USE_COPY), &v),
            Suitability::Unsuitable
        );
        assert_eq!(check.check(&state(OperationCode::List, empty), &v), Suitability::Unsuitable);
        assert_eq!(
            check.check(&state(OperationCode::List, ServiceControlOptions::COPY_SHALL_DO), &v),
            Suitability::Suitable
        );
        assert_eq!(
            check.check(&state(OperationCode::ModifyEntry, empty), &v),
            Suitability::Unsuitable
        );
        assert_eq!(
            check.check(&state(OperationCode::List, empty), &shadow_vertex(true)),
            Suitability::Suitable
        );
    }

    #[test]
    fn test_critical_extensions() {
        let check = BasicSuitability {
            supported_extensions: vec![1],
        };
        let mut s = state(OperationCode::Read, ServiceControlOptions::empty());
        s.service_controls.critical_extensions = vec![1, 7];
        assert_eq!(
            check.check(&s, &shadow_vertex(true)),
            Suitability::UnavailableCriticalExtension
        );
    }
}
