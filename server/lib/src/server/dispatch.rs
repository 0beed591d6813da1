//! The operation dispatcher. This is the caller of name resolution: it starts an
//! invocation, runs Find DSE, hands the resolved base to the operation procedure and then
//! deals with whatever continuation references are left over, either by chaining them
//! through a [ChainingTransport] or by returning them to the requester.

use async_trait::async_trait;

use crate::prelude::*;
use crate::server::find_dse::find_dse;
use crate::server::list::{list_i, list_ii};
use crate::server::search::{search_i, search_ii};

/// An operation as it is relayed to another DSA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationArgument {
    Read(ReadArgument),
    Compare(CompareArgument),
    List(ListArgument),
    Search(SearchArgument),
}

impl OperationArgument {
    fn retarget(&self, target: &DistinguishedName) -> Self {
        let mut argument = self.clone();
        match &mut argument {
            OperationArgument::Read(arg) => arg.object = target.clone(),
            OperationArgument::Compare(arg) => arg.object = target.clone(),
            OperationArgument::List(arg) => arg.object = target.clone(),
            OperationArgument::Search(arg) => arg.base_object = target.clone(),
        }
        argument
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainedRequest {
    pub chaining: ChainingArguments,
    pub argument: OperationArgument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainedResponse {
    Read(ReadResult),
    Compare(CompareResult),
    List(ListResult),
    Search(SearchResult),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainingFailure {
    /// No association could be made with the access point. The next candidate is tried.
    Unreachable,
    /// The remote DSA answered with an error.
    Error(OperationError),
}

/// The network side of chaining. The core produces continuation references, this
/// collaborator carries them to other DSAs.
#[async_trait]
pub trait ChainingTransport: Send + Sync {
    async fn contact_access_point(
        &self,
        access_point: &AccessPoint,
        operation: OperationCode,
        request: ChainedRequest,
    ) -> Result<ChainedResponse, ChainingFailure>;
}

/// Supplies the security parameters attached to errors on their way to the requester.
pub trait SecurityParametersSource: Send + Sync {
    fn parameters_for(
        &self,
        error: &OperationError,
        requester: Option<&DistinguishedName>,
    ) -> Option<SecurityParameters>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome<T> {
    Result(T),
    /// Nothing was done here, the requester should go to one of these instead.
    Referral(Vec<ContinuationReference>),
}

impl<T> OperationOutcome<T> {
    pub fn result(self) -> Option<T> {
        match self {
            OperationOutcome::Result(r) => Some(r),
            OperationOutcome::Referral(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct OperationDispatcher {
    ctx: DsaContext,
    transport: Option<Arc<dyn ChainingTransport>>,
    security: Option<Arc<dyn SecurityParametersSource>>,
}

impl OperationDispatcher {
    pub fn new(ctx: DsaContext) -> Self {
        OperationDispatcher {
            ctx,
            transport: None,
            security: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn ChainingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_security_parameters(mut self, source: Arc<dyn SecurityParametersSource>) -> Self {
        self.security = Some(source);
        self
    }

    pub fn ctx(&self) -> &DsaContext {
        &self.ctx
    }

    fn error_response(&self, session: &Session, error: OperationError) -> ErrorResponse {
        let security_parameters = self
            .security
            .as_ref()
            .and_then(|source| source.parameters_for(&error, session.requester()));
        ErrorResponse {
            error,
            security_parameters,
        }
    }

    fn may_chain(&self, service_controls: &ServiceControls) -> bool {
        self.transport.is_some()
            && !service_controls.has(ServiceControlOptions::CHAINING_PROHIBITED)
            && !service_controls.has(ServiceControlOptions::LOCAL_SCOPE)
    }

    /// Start an invocation and the accumulator for one operation. Chained requests
    /// carry their own arguments, which are checked for a loop back to this DSA.
    async fn begin(
        &self,
        session: &Session,
        operation: OperationCode,
        object: &DistinguishedName,
        service_controls: &ServiceControls,
        chaining: Option<ChainingArguments>,
    ) -> (Invocation, Result<OperationDispatcherState, OperationError>) {
        let time_limit = self.ctx.limits().time_limit(service_controls.time_limit);
        let mut inv = session.begin(time_limit).await;
        if let Some(deadline) = chaining.as_ref().and_then(|c| c.time_limit) {
            inv = inv.with_deadline(deadline);
        }

        let chaining = chaining.unwrap_or_else(|| ChainingArguments {
            originator: inv.requester.clone(),
            target_object: Some(object.clone()),
            authentication_level: inv.authentication_level,
            time_limit: Some(inv.deadline()),
            ..Default::default()
        });
        if chaining.is_looping(self.ctx.this_dsa()) {
            security_error!(%object, "chained operation has looped back to this DSA");
            return (inv, Err(OperationError::Service(ServiceProblem::LoopDetected)));
        }

        let state = OperationDispatcherState::new(
            operation,
            object.clone(),
            service_controls.clone(),
            chaining,
        );
        (inv, Ok(state))
    }

    /// Try each candidate access point of `cr` in turn. Access points already in the
    /// trace are skipped.
    async fn ap_info(
        &self,
        inv: &Invocation,
        operation: OperationCode,
        cr: &ContinuationReference,
        request: ChainedRequest,
    ) -> Result<ChainedResponse, OperationError> {
        let Some(transport) = self.transport.as_ref() else {
            return Err(OperationError::Service(ServiceProblem::ChainingRequired));
        };
        for api in cr.access_points.iter() {
            for access_point in api.candidates() {
                let traced = request
                    .chaining
                    .trace_information
                    .iter()
                    .any(|item| item.dsa == access_point.ae_title);
                if traced {
                    request_trace!(dsa = %access_point.ae_title, "skipping access point already in the trace");
                    continue;
                }
                inv.check()?;
                match transport
                    .contact_access_point(access_point, operation, request.clone())
                    .await
                {
                    Ok(response) => return Ok(response),
                    Err(ChainingFailure::Unreachable) => {
                        request_warn!(dsa = %access_point.ae_title, "access point unreachable");
                    }
                    Err(ChainingFailure::Error(e)) => return Err(e),
                }
            }
        }
        Err(OperationError::Service(ServiceProblem::Unavailable))
    }

    fn chained_request(
        &self,
        state: &OperationDispatcherState,
        cr: &ContinuationReference,
        argument: &OperationArgument,
    ) -> ChainedRequest {
        ChainedRequest {
            chaining: state.chaining.for_continuation(cr, self.ctx.this_dsa()),
            argument: argument.retarget(&cr.target_object),
        }
    }

    /// Name resolution ended in references. Chain them when allowed, one at a time until
    /// one answers, otherwise return them as a referral.
    async fn continue_resolution(
        &self,
        inv: &Invocation,
        state: &OperationDispatcherState,
        argument: &OperationArgument,
    ) -> Result<OperationOutcome<ChainedResponse>, OperationError> {
        if state.nr_continuation.is_empty() {
            return Err(OperationError::no_such_object(state.matched.clone()));
        }
        if !self.may_chain(&state.service_controls) {
            request_info!(refs = state.nr_continuation.len(), "returning referral");
            return Ok(OperationOutcome::Referral(state.nr_continuation.clone()));
        }

        let mut last_error = OperationError::Service(ServiceProblem::Unavailable);
        for cr in state.nr_continuation.iter() {
            let request = self.chained_request(state, cr, argument);
            match self.ap_info(inv, state.operation, cr, request).await {
                Ok(response) => return Ok(OperationOutcome::Result(response)),
                Err(e) if e.is_fatal() => return Err(e),
                // Each non-specific reference is a guess, another may hold the name.
                Err(e) => {
                    request_warn!(target = %cr.target_object, ?e, "chained resolution failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Chain the references found below the base of a list or search. Those that
    /// cannot be followed are left for the requester in the partial outcome qualifier.
    async fn follow_subordinates(
        &self,
        inv: &Invocation,
        state: &OperationDispatcherState,
        argument: &OperationArgument,
    ) -> Result<(Vec<ChainedResponse>, Vec<ContinuationReference>), OperationError> {
        if !self.may_chain(&state.service_controls) {
            return Ok((Vec::new(), state.sr_continuation.clone()));
        }
        let mut responses = Vec::new();
        let mut unexplored = Vec::new();
        for cr in state.sr_continuation.iter() {
            let request = self.chained_request(state, cr, argument);
            match self.ap_info(inv, state.operation, cr, request).await {
                Ok(response) => responses.push(response),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    request_warn!(target = %cr.target_object, ?e, "subordinate left unexplored");
                    unexplored.push(cr.clone());
                }
            }
        }
        Ok((responses, unexplored))
    }

    #[instrument(level = "info", skip_all, fields(session = %session.id, object = %arg.object))]
    pub async fn read(
        &self,
        session: &Session,
        arg: &ReadArgument,
        chaining: Option<ChainingArguments>,
    ) -> Result<OperationOutcome<ReadResult>, ErrorResponse> {
        let (inv, state) = self
            .begin(session, OperationCode::Read, &arg.object, &arg.service_controls, chaining)
            .await;
        let res = match state {
            Ok(mut state) => self.read_inner(&inv, &mut state, arg).await,
            Err(e) => Err(e),
        };
        session.finish(&inv).await;
        res.map_err(|e| self.error_response(session, e))
    }

    async fn read_inner(
        &self,
        inv: &Invocation,
        state: &mut OperationDispatcherState,
        arg: &ReadArgument,
    ) -> Result<OperationOutcome<ReadResult>, OperationError> {
        find_dse(&self.ctx, inv, state).await?;
        let Some(target) = state.found.clone() else {
            let argument = OperationArgument::Read(arg.clone());
            return match self.continue_resolution(inv, state, &argument).await? {
                OperationOutcome::Result(ChainedResponse::Read(r)) => Ok(OperationOutcome::Result(r)),
                OperationOutcome::Result(_) => Err(OperationError::InvalidState(
                    "chained read answered with another operation".to_string(),
                )),
                OperationOutcome::Referral(refs) => Ok(OperationOutcome::Referral(refs)),
            };
        };

        let access = self.ctx.access_at(inv, &state.adm_points, &target).await?;
        if !access.may_read_entry() {
            security_access!(dn = %target.dn, "denied ❌ - read");
            return Err(if access.may_disclose_on_error() {
                OperationError::Security(SecurityProblem::InsufficientAccessRights)
            } else {
                OperationError::no_such_object(target.dn.parent().unwrap_or_default())
            });
        }
        request_info!(dn = %target.dn, "read");
        Ok(OperationOutcome::Result(ReadResult {
            entry: access.entry_information(&target, &arg.selection),
            alias_dereferenced: state.alias_dereferenced(),
        }))
    }

    #[instrument(level = "info", skip_all, fields(session = %session.id, object = %arg.object))]
    pub async fn compare(
        &self,
        session: &Session,
        arg: &CompareArgument,
        chaining: Option<ChainingArguments>,
    ) -> Result<OperationOutcome<CompareResult>, ErrorResponse> {
        let (inv, state) = self
            .begin(session, OperationCode::Compare, &arg.object, &arg.service_controls, chaining)
            .await;
        let res = match state {
            Ok(mut state) => self.compare_inner(&inv, &mut state, arg).await,
            Err(e) => Err(e),
        };
        session.finish(&inv).await;
        res.map_err(|e| self.error_response(session, e))
    }

    async fn compare_inner(
        &self,
        inv: &Invocation,
        state: &mut OperationDispatcherState,
        arg: &CompareArgument,
    ) -> Result<OperationOutcome<CompareResult>, OperationError> {
        find_dse(&self.ctx, inv, state).await?;
        let Some(target) = state.found.clone() else {
            let argument = OperationArgument::Compare(arg.clone());
            return match self.continue_resolution(inv, state, &argument).await? {
                OperationOutcome::Result(ChainedResponse::Compare(r)) => {
                    Ok(OperationOutcome::Result(r))
                }
                OperationOutcome::Result(_) => Err(OperationError::InvalidState(
                    "chained compare answered with another operation".to_string(),
                )),
                OperationOutcome::Referral(refs) => Ok(OperationOutcome::Referral(refs)),
            };
        };

        let purported = &arg.purported;
        let access = self.ctx.access_at(inv, &state.adm_points, &target).await?;
        if !access.may_compare(&purported.atype, &purported.value) {
            security_access!(dn = %target.dn, atype = %purported.atype, "denied ❌ - compare");
            return Err(if access.may_disclose_on_error() {
                OperationError::Security(SecurityProblem::InsufficientAccessRights)
            } else {
                OperationError::no_such_object(target.dn.parent().unwrap_or_default())
            });
        }
        let matched = target
            .dse
            .attributes
            .get(&purported.atype)
            .map(|values| {
                values
                    .iter()
                    .any(|v| self.ctx.registry.equal(&purported.atype, v, &purported.value))
            })
            .unwrap_or(false);

        Ok(OperationOutcome::Result(CompareResult {
            name: state.alias_dereferenced().then(|| target.dn.clone()),
            matched,
            from_entry: !target.is(DseType::SHADOW),
            alias_dereferenced: state.alias_dereferenced(),
        }))
    }

    #[instrument(level = "info", skip_all, fields(session = %session.id, object = %arg.object))]
    pub async fn list(
        &self,
        session: &Session,
        arg: &ListArgument,
        chaining: Option<ChainingArguments>,
    ) -> Result<OperationOutcome<ListResult>, ErrorResponse> {
        let (inv, state) = self
            .begin(session, OperationCode::List, &arg.object, &arg.service_controls, chaining)
            .await;
        let res = match state {
            Ok(mut state) => self.list_inner(&inv, session, &mut state, arg).await,
            Err(e) => Err(e),
        };
        session.finish(&inv).await;
        res.map_err(|e| self.error_response(session, e))
    }

    async fn list_inner(
        &self,
        inv: &Invocation,
        session: &Session,
        state: &mut OperationDispatcherState,
        arg: &ListArgument,
    ) -> Result<OperationOutcome<ListResult>, OperationError> {
        let entry_only = state.chaining.entry_only;
        find_dse(&self.ctx, inv, state).await?;
        let argument = OperationArgument::List(arg.clone());
        if state.found.is_none() {
            return match self.continue_resolution(inv, state, &argument).await? {
                OperationOutcome::Result(ChainedResponse::List(r)) => Ok(OperationOutcome::Result(r)),
                OperationOutcome::Result(_) => Err(OperationError::InvalidState(
                    "chained list answered with another operation".to_string(),
                )),
                OperationOutcome::Referral(refs) => Ok(OperationOutcome::Referral(refs)),
            };
        }

        let mut result = if state.arrived_resolved() && entry_only {
            list_ii(&self.ctx, inv, state).await?
        } else {
            list_i(&self.ctx, inv, session, state, arg).await?
        };

        let (responses, unexplored) = self.follow_subordinates(inv, state, &argument).await?;
        let mut poq = result.partial_outcome_qualifier.take().unwrap_or_default();
        for response in responses {
            if let ChainedResponse::List(chained) = response {
                result.subordinates.extend(chained.subordinates);
                if let Some(remote) = chained.partial_outcome_qualifier {
                    poq.unexplored.extend(remote.unexplored);
                    poq.limit_problem = poq.limit_problem.or(remote.limit_problem);
                }
            }
        }
        poq.unexplored.extend(unexplored);
        result.partial_outcome_qualifier = (!poq.is_empty()).then_some(poq);
        Ok(OperationOutcome::Result(result))
    }

    #[instrument(level = "info", skip_all, fields(session = %session.id, base = %arg.base_object))]
    pub async fn search(
        &self,
        session: &Session,
        arg: &SearchArgument,
        chaining: Option<ChainingArguments>,
    ) -> Result<OperationOutcome<SearchResult>, ErrorResponse> {
        let (inv, state) = self
            .begin(
                session,
                OperationCode::Search,
                &arg.base_object,
                &arg.service_controls,
                chaining,
            )
            .await;
        let res = match state {
            Ok(mut state) => self.search_inner(&inv, session, &mut state, arg).await,
            Err(e) => Err(e),
        };
        session.finish(&inv).await;
        res.map_err(|e| self.error_response(session, e))
    }

    async fn search_inner(
        &self,
        inv: &Invocation,
        session: &Session,
        state: &mut OperationDispatcherState,
        arg: &SearchArgument,
    ) -> Result<OperationOutcome<SearchResult>, OperationError> {
        find_dse(&self.ctx, inv, state).await?;
        let argument = OperationArgument::Search(arg.clone());
        if state.found.is_none() {
            return match self.continue_resolution(inv, state, &argument).await? {
                OperationOutcome::Result(ChainedResponse::Search(r)) => {
                    Ok(OperationOutcome::Result(r))
                }
                OperationOutcome::Result(_) => Err(OperationError::InvalidState(
                    "chained search answered with another operation".to_string(),
                )),
                OperationOutcome::Referral(refs) => Ok(OperationOutcome::Referral(refs)),
            };
        }

        let mut result = if state.arrived_resolved() {
            search_ii(&self.ctx, inv, state, arg).await?
        } else {
            search_i(&self.ctx, inv, session, state, arg).await?
        };

        let (responses, unexplored) = self.follow_subordinates(inv, state, &argument).await?;
        let mut poq = result.partial_outcome_qualifier.take().unwrap_or_default();
        for response in responses {
            if let ChainedResponse::Search(chained) = response {
                result.entries.extend(chained.entries);
                if let Some(remote) = chained.partial_outcome_qualifier {
                    poq.unexplored.extend(remote.unexplored);
                    poq.limit_problem = poq.limit_problem.or(remote.limit_problem);
                }
            }
        }
        poq.unexplored.extend(unexplored);
        result.partial_outcome_qualifier = (!poq.is_empty()).then_some(poq);
        Ok(OperationOutcome::Result(result))
    }

    /// Resolve the target of an add, remove or modify. The final RDN of an update target
    /// is never dereferenced and shadows are unsuitable, so a shadowed target yields a
    /// referral to the master. The update itself is the storage layer's business.
    #[instrument(level = "info", skip_all, fields(session = %session.id, %object))]
    pub async fn resolve_for_update(
        &self,
        session: &Session,
        operation: OperationCode,
        object: &DistinguishedName,
        service_controls: &ServiceControls,
    ) -> Result<OperationOutcome<Arc<Vertex>>, ErrorResponse> {
        if !operation.is_update() {
            return Err(self.error_response(
                session,
                OperationError::MalformedArgument(format!("{operation:?} is not an update")),
            ));
        }
        let (inv, state) = self
            .begin(session, operation, object, service_controls, None)
            .await;
        let res = match state {
            Ok(mut state) => match find_dse(&self.ctx, &inv, &mut state).await {
                Ok(()) => match state.found.take() {
                    Some(vertex) => Ok(OperationOutcome::Result(vertex)),
                    None if state.nr_continuation.is_empty() => {
                        Err(OperationError::no_such_object(state.matched.clone()))
                    }
                    None => Ok(OperationOutcome::Referral(state.nr_continuation)),
                },
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        session.finish(&inv).await;
        res.map_err(|e| self.error_response(session, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::access::{AciItem, Permissions, ProtectedItemSpec, UserClass};
    use crate::testkit::TestDsa;
    use hashbrown::HashMap;
    use std::sync::Mutex;

    /// Other DSAs, as far as the transport can tell.
    #[derive(Default)]
    struct FakeNetwork {
        responses: HashMap<DistinguishedName, ChainedResponse>,
        unreachable: Vec<DistinguishedName>,
        contacted: Mutex<Vec<(DistinguishedName, ChainingArguments)>>,
    }

    impl FakeNetwork {
        #[allow(clippy::expect_used)]
        fn contacted(&self) -> Vec<DistinguishedName> {
            self.contacted
                .lock()
                .expect("lock")
                .iter()
                .map(|(dsa, _)| dsa.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChainingTransport for FakeNetwork {
        #[allow(clippy::expect_used)]
        async fn contact_access_point(
            &self,
            access_point: &AccessPoint,
            _operation: OperationCode,
            request: ChainedRequest,
        ) -> Result<ChainedResponse, ChainingFailure> {
            self.contacted
                .lock()
                .expect("lock")
                .push((access_point.ae_title.clone(), request.chaining.clone()));
            if self.unreachable.contains(&access_point.ae_title) {
                return Err(ChainingFailure::Unreachable);
            }
            self.responses
                .get(&access_point.ae_title)
                .cloned()
                .ok_or(ChainingFailure::Error(OperationError::no_such_object(
                    DistinguishedName::root(),
                )))
        }
    }

    struct ErrorCodes;

    impl SecurityParametersSource for ErrorCodes {
        fn parameters_for(
            &self,
            error: &OperationError,
            _requester: Option<&DistinguishedName>,
        ) -> Option<SecurityParameters> {
            Some(SecurityParameters {
                error_code: Some(error.to_string()),
                ..Default::default()
            })
        }
    }

    fn remote_entry(name: &str) -> EntryInformation {
        EntryInformation {
            name: dn!(name),
            from_entry: true,
            incomplete_entry: false,
            attributes: Vec::new(),
        }
    }

    #[dsa_test]
    async fn test_dispatch_read_and_compare(test_dsa: &TestDsa) {
        let session = test_dsa.session();
        let dispatcher = &test_dsa.dispatcher;

        let r = dispatcher
            .read(&session, &ReadArgument::new(dn!("cn=Alice,o=Example,c=US")), None)
            .await
            .expect("read")
            .result()
            .expect("local");
        assert_eq!(r.entry.name, dn!("cn=Alice,o=Example,c=US"));
        assert!(r.entry.attribute("cn").is_some());

        let arg = CompareArgument {
            object: dn!("cn=Alice,o=Example,c=US"),
            purported: AttributeTypeAndValue::new("CN", "ALICE"),
            service_controls: ServiceControls::default(),
        };
        let r = dispatcher
            .compare(&session, &arg, None)
            .await
            .expect("compare")
            .result()
            .expect("local");
        assert!(r.matched);
        assert!(r.from_entry);

        let err = dispatcher
            .read(&session, &ReadArgument::new(dn!("cn=Zed,o=Example,c=US")), None)
            .await
            .expect_err("missing");
        assert_eq!(err.error, OperationError::no_such_object(dn!("o=Example,c=US")));
        assert!(err.security_parameters.is_none());
    }

    #[dsa_test]
    async fn test_dispatch_read_access(test_dsa: &TestDsa) {
        test_dsa.make_access_control_area("o=Example,c=US");
        test_dsa.add_prescriptive_aci(
            "o=Example,c=US",
            vec![AciItem::grant("browse", 10, vec![UserClass::AllUsers])
                .protecting(vec![ProtectedItemSpec::Entry])
                .granting(Permissions::BROWSE | Permissions::RETURN_DN)],
        );
        let session = test_dsa.session();
        let dispatcher = test_dsa
            .dispatcher
            .clone()
            .with_security_parameters(Arc::new(ErrorCodes));

        let err = dispatcher
            .read(&session, &ReadArgument::new(dn!("cn=Alice,o=Example,c=US")), None)
            .await
            .expect_err("no read");
        // Existence may not be disclosed, so the entry is reported missing.
        assert_name_error!(Err::<(), _>(err.error.clone()), NameProblem::NoSuchObject, "o=Example,c=US");
        assert_eq!(
            err.security_parameters.and_then(|p| p.error_code),
            Some("NoSuchObject - matched o=Example,c=US".to_string())
        );
    }

    #[dsa_test]
    async fn test_dispatch_referral_without_transport(test_dsa: &TestDsa) {
        test_dsa.add_subordinate_reference("o=Example,c=US", "ou", "Remote", "cn=dsa2");
        let session = test_dsa.session();
        let outcome = test_dsa
            .dispatcher
            .read(&session, &ReadArgument::new(dn!("cn=Zoe,ou=Remote,o=Example,c=US")), None)
            .await
            .expect("referral");
        match outcome {
            OperationOutcome::Referral(refs) => {
                assert_eq!(refs.len(), 1);
                assert_eq!(refs[0].reference_type, ReferenceType::Subordinate);
            }
            other => panic!("expected a referral, got {other:?}"),
        }
    }

    #[dsa_test]
    async fn test_dispatch_chains_with_fallback(test_dsa: &TestDsa) {
        test_dsa.add_subordinate_reference("o=Example,c=US", "ou", "Remote", "cn=dsa2");
        test_dsa.add_shadow_knowledge("ou=Remote,o=Example,c=US", "cn=dsa3");
        let entry = remote_entry("cn=Zoe,ou=Remote,o=Example,c=US");
        let mut network = FakeNetwork::default();
        // The shadow is preferred for reads, but it is down.
        network.unreachable.push(dn!("cn=dsa3"));
        network.responses.insert(
            dn!("cn=dsa2"),
            ChainedResponse::Read(ReadResult {
                entry: entry.clone(),
                alias_dereferenced: false,
            }),
        );
        let network = Arc::new(network);
        let dispatcher = test_dsa.dispatcher.clone().with_transport(network.clone());
        let session = test_dsa.session();

        let r = dispatcher
            .read(&session, &ReadArgument::new(dn!("cn=Zoe,ou=Remote,o=Example,c=US")), None)
            .await
            .expect("chained")
            .result()
            .expect("result");
        assert_eq!(r.entry, entry);
        assert_eq!(network.contacted(), vec![dn!("cn=dsa3"), dn!("cn=dsa2")]);

        #[allow(clippy::expect_used)]
        let sent = network.contacted.lock().expect("lock")[1].1.clone();
        assert_eq!(sent.trace_information.len(), 1);
        assert_eq!(sent.trace_information[0].dsa, dn!("cn=dsa1"));
        assert_eq!(sent.operation_progress, OperationProgress::proceeding(3));

        // Everything down.
        let mut network = FakeNetwork::default();
        network.unreachable = vec![dn!("cn=dsa2"), dn!("cn=dsa3")];
        let dispatcher = test_dsa.dispatcher.clone().with_transport(Arc::new(network));
        let err = dispatcher
            .read(&session, &ReadArgument::new(dn!("cn=Zoe,ou=Remote,o=Example,c=US")), None)
            .await
            .expect_err("unavailable");
        assert_eq!(err.error, OperationError::Service(ServiceProblem::Unavailable));

        // Chaining prohibited by the requester.
        let mut arg = ReadArgument::new(dn!("cn=Zoe,ou=Remote,o=Example,c=US"));
        arg.service_controls.options |= ServiceControlOptions::CHAINING_PROHIBITED;
        let outcome = dispatcher.read(&session, &arg, None).await.expect("referral");
        assert!(matches!(outcome, OperationOutcome::Referral(_)));
    }

    #[dsa_test]
    async fn test_dispatch_search_merges_chained_results(test_dsa: &TestDsa) {
        test_dsa.add_subordinate_reference("o=Example,c=US", "ou", "Remote", "cn=dsa2");
        test_dsa.add_subordinate_reference("o=Example,c=US", "ou", "Gone", "cn=dsa9");
        let mut network = FakeNetwork::default();
        network.unreachable.push(dn!("cn=dsa9"));
        network.responses.insert(
            dn!("cn=dsa2"),
            ChainedResponse::Search(SearchResult {
                entries: vec![remote_entry("cn=Zoe,ou=Remote,o=Example,c=US")],
                ..Default::default()
            }),
        );
        let dispatcher = test_dsa.dispatcher.clone().with_transport(Arc::new(network));
        let session = test_dsa.session();

        let arg = SearchArgument::new(dn!("o=Example,c=US"), SearchSubset::WholeSubtree, Filter::everything());
        let r = dispatcher
            .search(&session, &arg, None)
            .await
            .expect("search")
            .result()
            .expect("result");
        assert_eq!(r.entries.len(), 5);
        assert!(r
            .entries
            .iter()
            .any(|e| e.name == dn!("cn=Zoe,ou=Remote,o=Example,c=US")));
        let poq = r.partial_outcome_qualifier.expect("unexplored");
        assert_eq!(poq.unexplored.len(), 1);
        assert_eq!(poq.unexplored[0].target_object, dn!("ou=Gone,o=Example,c=US"));
    }

    #[dsa_test]
    async fn test_dispatch_list_without_transport_reports_unexplored(test_dsa: &TestDsa) {
        test_dsa.add_subordinate_reference("o=Example,c=US", "ou", "Remote", "cn=dsa2");
        let session = test_dsa.session();
        let r = test_dsa
            .dispatcher
            .list(&session, &ListArgument::new(dn!("o=Example,c=US")), None)
            .await
            .expect("list")
            .result()
            .expect("result");
        assert_eq!(r.subordinates.len(), 3);
        let poq = r.partial_outcome_qualifier.expect("unexplored");
        assert_eq!(poq.unexplored.len(), 1);
        assert!(poq.unexplored[0].entry_only);
    }

    #[dsa_test]
    async fn test_dispatch_incoming_chained_requests(test_dsa: &TestDsa) {
        let session = test_dsa.session();
        let target = dn!("o=Example,c=US");

        // A request that already passed through this DSA at the same point.
        let looping = ChainingArguments {
            target_object: Some(target.clone()),
            ..Default::default()
        }
        .with_trace(TraceItem {
            dsa: dn!("cn=dsa1"),
            target_object: Some(target.clone()),
            operation_progress: OperationProgress::not_started(),
        });
        let err = test_dsa
            .dispatcher
            .list(&session, &ListArgument::new(target.clone()), Some(looping))
            .await
            .expect_err("loop");
        assert_eq!(err.error, OperationError::Service(ServiceProblem::LoopDetected));

        // A superior listing us through a subordinate reference only wants the prefix.
        let mut chained = ChainingArguments {
            target_object: Some(target.clone()),
            ..Default::default()
        }
        .with_progress(OperationProgress::completed());
        chained.entry_only = true;
        let r = test_dsa
            .dispatcher
            .list(&session, &ListArgument::new(target.clone()), Some(chained.clone()))
            .await
            .expect("list")
            .result()
            .expect("result");
        assert_eq!(r.subordinates.len(), 1);

        chained.entry_only = false;
        let arg = SearchArgument::new(target.clone(), SearchSubset::OneLevel, Filter::everything());
        let r = test_dsa
            .dispatcher
            .search(&session, &arg, Some(chained))
            .await
            .expect("search")
            .result()
            .expect("result");
        assert_eq!(r.entries.len(), 4);
    }

    #[dsa_test]
    async fn test_dispatch_client_search_is_walked_here(test_dsa: &TestDsa) {
        let session = test_dsa.session();
        let dispatcher = &test_dsa.dispatcher;

        let arg = SearchArgument::new(dn!("o=Example,c=US"), SearchSubset::OneLevel, Filter::everything());
        let r = dispatcher
            .search(&session, &arg, None)
            .await
            .expect("search")
            .result()
            .expect("result");
        assert_eq!(r.entries.len(), 3);
        assert!(r.entries.iter().all(|e| e.name != dn!("o=Example,c=US")));

        let base = SearchArgument::new(dn!("c=US"), SearchSubset::WholeSubtree, Filter::everything());
        let mut arg = base.clone();
        arg.paged_results = Some(PagedResultsRequest::new_request(2));
        let first = dispatcher
            .search(&session, &arg, None)
            .await
            .expect("first page")
            .result()
            .expect("result");
        assert_eq!(first.entries.len(), 2);
        let mut reference = first
            .partial_outcome_qualifier
            .and_then(|p| p.query_reference);
        assert!(reference.is_some());

        let mut collected = first.entries;
        while let Some(r) = reference.take() {
            arg.paged_results = Some(PagedResultsRequest::QueryReference(r));
            let page = dispatcher
                .search(&session, &arg, None)
                .await
                .expect("next page")
                .result()
                .expect("result");
            assert!(page.entries.len() <= 2);
            collected.extend(page.entries);
            reference = page.partial_outcome_qualifier.and_then(|p| p.query_reference);
        }
        let everything = dispatcher
            .search(&session, &base, None)
            .await
            .expect("search")
            .result()
            .expect("result");
        assert_eq!(collected.len(), 5);
        assert_eq!(collected, everything.entries);
    }

    #[dsa_test]
    async fn test_dispatch_resolve_for_update(test_dsa: &TestDsa) {
        test_dsa.replace_with_alias("cn=Bob,o=Example,c=US", "cn=Alice,o=Example,c=US");
        test_dsa.make_shadow("o=Example,c=US", "cn=master");
        let session = test_dsa.session();
        let sc = ServiceControls::default();

        let err = test_dsa
            .dispatcher
            .resolve_for_update(&session, OperationCode::Read, &dn!("c=US"), &sc)
            .await
            .expect_err("not an update");
        assert!(matches!(err.error, OperationError::MalformedArgument(_)));

        let outcome = test_dsa
            .dispatcher
            .resolve_for_update(&session, OperationCode::ModifyEntry, &dn!("c=US"), &sc)
            .await
            .expect("local");
        assert_eq!(outcome.result().map(|v| v.dn.clone()), Some(dn!("c=US")));

        // The shadowed alias itself is the target, and a shadow cannot take updates.
        let outcome = test_dsa
            .dispatcher
            .resolve_for_update(
                &session,
                OperationCode::RemoveEntry,
                &dn!("cn=Bob,o=Example,c=US"),
                &sc,
            )
            .await
            .expect("referral");
        match outcome {
            OperationOutcome::Referral(refs) => {
                assert_eq!(refs[0].reference_type, ReferenceType::Master);
            }
            other => panic!("expected a referral, got {other:?}"),
        }
    }

    #[dsa_test]
    async fn test_dispatch_abandon_is_cleared(test_dsa: &TestDsa) {
        let session = test_dsa.session();
        test_dsa
            .dispatcher
            .read(&session, &ReadArgument::new(dn!("c=US")), None)
            .await
            .expect("read");
        // The invocation is finished, so there is nothing left to abandon.
        assert!(!session.abandon(1).await);
    }
}
