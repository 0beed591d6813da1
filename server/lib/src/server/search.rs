//! Search. Walk the subtree below a resolved base, returning the entries that match a
//! filter and that the requester may read.
//!
//! Paging is depth aware. The cursor records, for each depth below the base, the last
//! subordinate whose subtree is finished and the subordinate whose subtree was cut short
//! by the end of the page, so a continued search picks up inside that subtree.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use hashbrown::HashSet;

use crate::prelude::*;
use crate::server::access::{effective_admin_points, AccessControlContext};
use crate::server::continuation::{nssr_references, specific_reference, supplier_reference};
use crate::server::find_dse::find_dse;
use crate::server::suitability::Suitability;
use crate::session::{render_reference, validate_sort_keys, PagedState, SearchCursor, SearchLevel};

type FlowFuture<'s> = Pin<Box<dyn Future<Output = Result<Flow, OperationError>> + Send + 's>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The page is full or a limit was reached.
    Stop,
}

struct SearchRun<'a> {
    ctx: &'a DsaContext,
    inv: &'a Invocation,
    request: SearchArgument,
    subset: SearchSubset,
    operation: OperationCode,
    /// What the suitability check sees when the walk reaches a shadowed context prefix.
    shadow_view: OperationDispatcherState,
    exclusions: Vec<DistinguishedName>,
    exclude_shadows: bool,
    page_size: usize,
    base_done: bool,
    levels: Vec<SearchLevel>,
    entries: Vec<EntryInformation>,
    pending: VecDeque<EntryInformation>,
    covered: Vec<DistinguishedName>,
    visited_aliases: HashSet<EntryId>,
    references: Vec<ContinuationReference>,
    limit_problem: Option<LimitProblem>,
    more: bool,
}

impl<'a> SearchRun<'a> {
    fn new(
        ctx: &'a DsaContext,
        inv: &'a Invocation,
        state: &OperationDispatcherState,
        request: SearchArgument,
        page_size: usize,
    ) -> Self {
        SearchRun {
            ctx,
            inv,
            subset: request.subset,
            shadow_view: OperationDispatcherState::new(
                state.operation,
                request.base_object.clone(),
                request.service_controls.clone(),
                state.chaining.clone(),
            ),
            request,
            operation: state.operation,
            exclusions: state.chaining.exclusions.clone(),
            exclude_shadows: state.chaining.exclude_shadows,
            page_size,
            base_done: false,
            levels: Vec::new(),
            entries: Vec::new(),
            pending: VecDeque::new(),
            covered: Vec::new(),
            visited_aliases: HashSet::new(),
            references: Vec::new(),
            limit_problem: None,
            more: false,
        }
    }

    fn resume(&mut self, cursor: SearchCursor) {
        self.base_done = cursor.base_done;
        self.levels = cursor.levels;
        self.pending = cursor.pending;
        self.covered = cursor.covered;
    }

    fn into_cursor(self) -> SearchCursor {
        SearchCursor {
            request: self.request,
            page_size: self.page_size,
            base_done: self.base_done,
            levels: self.levels,
            pending: self.pending,
            covered: self.covered,
        }
    }

    fn push(&mut self, info: EntryInformation) -> Flow {
        if self.entries.len() >= self.page_size {
            self.more = true;
            return Flow::Stop;
        }
        self.entries.push(info);
        Flow::Continue
    }

    /// Whether `vertex` is a candidate for the result at all, before the filter.
    fn wants(&self, vertex: &Vertex) -> bool {
        if self
            .request
            .service_controls
            .has(ServiceControlOptions::SUBENTRIES)
        {
            vertex.is(DseType::SUBENTRY)
        } else {
            !vertex.is(DseType::SUBENTRY) && vertex.dse.is_any(DseType::ENTRY | DseType::ALIAS)
        }
    }

    fn in_scope(&self, depth: usize) -> bool {
        match self.subset {
            SearchSubset::BaseObject => false,
            SearchSubset::OneLevel => depth == 0,
            SearchSubset::WholeSubtree => true,
        }
    }

    fn excluded(&self, vertex: &Vertex) -> bool {
        self.exclusions
            .iter()
            .any(|ex| self.ctx.registry.dn_is_prefix(ex, &vertex.dn))
    }

    fn dereferences_aliases(&self) -> bool {
        self.request.search_aliases
            && !self
                .request
                .service_controls
                .has(ServiceControlOptions::DONT_DEREFERENCE_ALIASES)
    }

    /// Filter, then entry level read permission, then the attribute and value filtering
    /// of the returned information.
    fn evaluate(&self, vertex: &Vertex, access: &AccessControlContext) -> Option<EntryInformation> {
        let matched = self.ctx.filter_evaluator.evaluate(
            &self.request.filter,
            &vertex.dse.attributes,
            &|atype, value| access.permitted_to_match(atype, value),
        );
        if !matched {
            return None;
        }
        if !access.may_read_entry() {
            security_access!(dn = %vertex.dn, "denied ❌ - matched entry may not be read");
            return None;
        }
        Some(access.entry_information(vertex, &self.request.selection))
    }

    async fn run(
        &mut self,
        base: Arc<Vertex>,
        points: Vec<Arc<Vertex>>,
    ) -> Result<(), OperationError> {
        while let Some(info) = self.pending.pop_front() {
            if self.entries.len() >= self.page_size {
                self.pending.push_front(info);
                self.more = true;
                return Ok(());
            }
            self.entries.push(info);
        }

        if !self.base_done {
            self.inv.check()?;
            if self.subset != SearchSubset::OneLevel && self.wants(&base) {
                let access = self.ctx.access_at(self.inv, &points, &base).await?;
                if let Some(info) = self.evaluate(&base, &access) {
                    if self.push(info) == Flow::Stop {
                        return Ok(());
                    }
                }
            }
            self.base_done = true;
            if self.subset == SearchSubset::WholeSubtree {
                self.covered.push(base.dn.clone());
            }
            if self.subset != SearchSubset::BaseObject {
                self.references.extend(nssr_references(
                    &base,
                    &base.dn,
                    OperationProgress::proceeding(base.dn.len()),
                    self.operation,
                ));
            }
        }

        if self.subset == SearchSubset::BaseObject {
            return Ok(());
        }
        self.descend(base, points, 0).await.map(|_| ())
    }

    fn descend<'s>(
        &'s mut self,
        parent: Arc<Vertex>,
        points: Vec<Arc<Vertex>>,
        depth: usize,
    ) -> FlowFuture<'s>
    where
        'a: 's,
    {
        Box::pin(async move {
            if self.levels.len() <= depth {
                self.levels.resize(depth + 1, SearchLevel::default());
            }
            let batch_size = self.ctx.limits().subordinate_batch_size;
            let resume = self.levels[depth].current;
            let mut after = self.levels[depth].after;

            loop {
                if self.inv.is_abandoned() {
                    return Err(OperationError::Abandoned);
                }
                if self.inv.time_exceeded() {
                    request_warn!(under = %parent.dn, "search stopped at the time limit");
                    self.limit_problem = Some(LimitProblem::TimeLimitExceeded);
                    self.more = true;
                    return Ok(Flow::Stop);
                }
                let batch = self
                    .ctx
                    .store
                    .list_subordinates(&parent, batch_size, after, SubordinateFilter::All)
                    .await?;
                let exhausted = batch.len() < batch_size;

                for child in batch {
                    after = Some(child.id);
                    if self.inv.is_abandoned() {
                        return Err(OperationError::Abandoned);
                    }
                    if self.inv.time_exceeded() {
                        request_warn!(at = %child.dn, "search stopped at the time limit");
                        self.limit_problem = Some(LimitProblem::TimeLimitExceeded);
                        self.more = true;
                        return Ok(Flow::Stop);
                    }

                    let resumed = resume == Some(child.id);
                    if !resumed {
                        self.levels.truncate(depth + 1);
                        self.levels[depth].current = None;
                    }

                    if self.visit(&child, &points, depth, resumed).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }

                    self.levels.truncate(depth + 1);
                    self.levels[depth] = SearchLevel {
                        after: Some(child.id),
                        current: None,
                    };
                }

                if exhausted {
                    return Ok(Flow::Continue);
                }
            }
        })
    }

    /// One subordinate. When `resumed`, the subordinate itself was dealt with on an
    /// earlier page and only its subtree remains.
    async fn visit(
        &mut self,
        child: &Arc<Vertex>,
        points: &[Arc<Vertex>],
        depth: usize,
        resumed: bool,
    ) -> Result<Flow, OperationError> {
        if self.excluded(child) {
            resolve_trace!(dn = %child.dn, "excluded subtree");
            return Ok(Flow::Continue);
        }
        if child.is(DseType::FAMILY_MEMBER) && !self.request.search_family {
            return Ok(Flow::Continue);
        }
        if self.exclude_shadows && child.is(DseType::SHADOW) {
            return Ok(Flow::Continue);
        }
        // Reached again through an alias to one of its superiors.
        if self
            .covered
            .iter()
            .any(|c| self.ctx.registry.dn_equal(c, &child.dn))
        {
            resolve_trace!(dn = %child.dn, "subtree already covered");
            return Ok(Flow::Continue);
        }

        let access = self.ctx.access_at(self.inv, points, child).await?;
        if !access.may_discover() {
            security_access!(dn = %child.dn, "denied ❌ - subtree hidden from search");
            return Ok(Flow::Continue);
        }

        if child.is(DseType::SUBR) {
            if !resumed {
                let entry_only = self.subset == SearchSubset::OneLevel;
                if let Some(mut cr) = specific_reference(
                    child,
                    child.dn.clone(),
                    OperationProgress::completed(),
                    self.operation,
                ) {
                    cr.entry_only = entry_only;
                    self.references.push(cr);
                }
            }
            return Ok(Flow::Continue);
        }

        if child.is(DseType::SHADOW) && child.is(DseType::CP) {
            match self.ctx.suitability.check(&self.shadow_view, child) {
                Suitability::Suitable => {}
                Suitability::UnavailableCriticalExtension => {
                    return Err(OperationError::Service(
                        ServiceProblem::UnavailableCriticalExtension,
                    ))
                }
                Suitability::Unsuitable => {
                    if !resumed {
                        if let Some(mut cr) = supplier_reference(
                            child,
                            child.dn.clone(),
                            OperationProgress::completed(),
                            self.operation,
                        ) {
                            cr.entry_only = self.subset == SearchSubset::OneLevel;
                            self.references.push(cr);
                        }
                    }
                    return Ok(Flow::Continue);
                }
            }
        }

        if child.is(DseType::ALIAS) && self.dereferences_aliases() {
            if resumed {
                return Ok(Flow::Continue);
            }
            return self.search_alias(child).await;
        }

        if !resumed {
            if self.subset == SearchSubset::WholeSubtree {
                self.references.extend(nssr_references(
                    child,
                    &child.dn,
                    OperationProgress::proceeding(child.dn.len()),
                    self.operation,
                ));
            }
            if self.in_scope(depth) && self.wants(child) {
                if let Some(info) = self.evaluate(child, &access) {
                    if self.push(info) == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }

        let leaf = matches!(&child.subordinates, Subordinates::Loaded(subs) if subs.is_empty());
        if self.subset == SearchSubset::WholeSubtree && !leaf {
            let child_points = effective_admin_points(points, child);
            self.levels[depth].current = Some(child.id);
            if self.descend(child.clone(), child_points, depth + 1).await? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Search the object an alias points at, as part of this search. Names already
    /// covered are skipped so that no entry is returned twice.
    async fn search_alias(&mut self, alias: &Arc<Vertex>) -> Result<Flow, OperationError> {
        if !self.visited_aliases.insert(alias.id) {
            return Ok(Flow::Continue);
        }
        let Some(aliased) = alias.dse.alias.as_ref() else {
            admin_warn!(alias = %alias.dn, "alias without an aliased entry name");
            return Ok(Flow::Continue);
        };
        let target = aliased.aliased_entry_name.clone();
        if self
            .covered
            .iter()
            .any(|c| self.ctx.registry.dn_is_prefix(c, &target))
        {
            resolve_trace!(alias = %alias.dn, %target, "alias target already covered");
            return Ok(Flow::Continue);
        }

        let mut inner = OperationDispatcherState::new(
            self.operation,
            target.clone(),
            self.request.service_controls.clone(),
            ChainingArguments::default().dereferenced_alias(target.clone(), target.len()),
        );
        match find_dse(self.ctx, self.inv, &mut inner).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                resolve_warn!(alias = %alias.dn, ?e, "alias target could not be searched");
                return Ok(Flow::Continue);
            }
        }
        self.references.append(&mut inner.nr_continuation);
        let Some(target_vertex) = inner.found.clone() else {
            return Ok(Flow::Continue);
        };

        let mut request = self.request.clone();
        request.base_object = target_vertex.dn.clone();
        request.subset = if self.subset == SearchSubset::WholeSubtree {
            SearchSubset::WholeSubtree
        } else {
            SearchSubset::BaseObject
        };
        resolve_info!(alias = %alias.dn, target = %target_vertex.dn, "searching alias target");

        let mut nested = SearchRun::new(
            self.ctx,
            self.inv,
            &inner,
            request,
            self.ctx.limits().max_size_limit,
        );
        nested.exclusions = self.exclusions.clone();
        nested.exclude_shadows = self.exclude_shadows;
        nested.covered = std::mem::take(&mut self.covered);
        nested.visited_aliases = std::mem::take(&mut self.visited_aliases);
        if nested.subset == SearchSubset::BaseObject {
            nested.covered.push(target_vertex.dn.clone());
        }
        let outcome = nested.run(target_vertex, inner.adm_points).await;
        self.covered = std::mem::take(&mut nested.covered);
        self.visited_aliases = std::mem::take(&mut nested.visited_aliases);
        outcome?;

        self.references.append(&mut nested.references);
        for info in nested.entries {
            if self.entries.len() < self.page_size {
                self.entries.push(info);
            } else {
                self.pending.push_back(info);
                self.more = true;
            }
        }
        if nested.limit_problem.is_some() {
            self.limit_problem = nested.limit_problem;
            self.more = true;
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }
}

/// Search below `state.found`. References to parts of the subtree held elsewhere are left
/// in `state.sr_continuation`.
#[instrument(level = "debug", skip_all, fields(base = %state.name))]
pub async fn search_i(
    ctx: &DsaContext,
    inv: &Invocation,
    session: &Session,
    state: &mut OperationDispatcherState,
    arg: &SearchArgument,
) -> Result<SearchResult, OperationError> {
    let base = state
        .found
        .clone()
        .ok_or_else(|| OperationError::InvalidState("search without a resolved base".to_string()))?;

    let (mut run, reference) = match &arg.paged_results {
        None => {
            let size = ctx.limits().size_limit(arg.service_controls.size_limit);
            (SearchRun::new(ctx, inv, state, arg.clone(), size), None)
        }
        Some(PagedResultsRequest::NewRequest {
            page_size,
            sort_keys,
            ..
        }) => {
            validate_sort_keys(ctx.limits(), sort_keys)?;
            if *page_size == 0 {
                return Err(OperationError::Service(ServiceProblem::UnwillingToPerform));
            }
            let reference = session.paging().await.allocate_reference();
            let size = (*page_size).min(ctx.limits().max_size_limit);
            (
                SearchRun::new(ctx, inv, state, arg.clone(), size),
                Some(reference),
            )
        }
        Some(PagedResultsRequest::QueryReference(reference)) => {
            let cursor = match session.paging().await.get(reference) {
                Some(PagedState::Search(cursor)) => cursor.clone(),
                _ => {
                    request_warn!(reference = %render_reference(reference), "unknown search query reference");
                    return Err(OperationError::Service(ServiceProblem::InvalidQueryReference));
                }
            };
            let mut run = SearchRun::new(ctx, inv, state, cursor.request.clone(), cursor.page_size);
            run.resume(cursor);
            (run, Some(reference.clone()))
        }
        Some(PagedResultsRequest::AbandonQuery(reference)) => {
            session.paging().await.remove(reference);
            request_info!(reference = %render_reference(reference), "paged search abandoned");
            return Err(OperationError::Abandoned);
        }
    };

    run.run(base.clone(), state.adm_points.clone()).await?;

    let entries = std::mem::take(&mut run.entries);
    state.sr_continuation.append(&mut run.references);
    let mut poq = PartialOutcomeQualifier {
        limit_problem: run.limit_problem,
        ..Default::default()
    };
    let more = run.more;

    match reference {
        Some(reference) => {
            let mut paging = session.paging().await;
            if more {
                paging.insert(reference.clone(), PagedState::Search(run.into_cursor()));
                poq.query_reference = Some(reference);
            } else {
                paging.remove(&reference);
            }
        }
        None => {
            if more && poq.limit_problem.is_none() {
                poq.limit_problem = Some(LimitProblem::SizeLimitExceeded);
            }
        }
    }

    request_info!(base = %base.dn, returned = entries.len(), more, "search page complete");

    Ok(SearchResult {
        name: state.alias_dereferenced().then(|| base.dn.clone()),
        entries,
        partial_outcome_qualifier: (!poq.is_empty()).then_some(poq),
        alias_dereferenced: state.alias_dereferenced(),
    })
}

/// Search, as asked of the DSA holding a subordinate context prefix. The context prefix
/// is the base. Only it is evaluated when the superior searched a single level.
#[instrument(level = "debug", skip_all, fields(base = %state.name))]
pub async fn search_ii(
    ctx: &DsaContext,
    inv: &Invocation,
    state: &mut OperationDispatcherState,
    arg: &SearchArgument,
) -> Result<SearchResult, OperationError> {
    let cp = state
        .found
        .clone()
        .ok_or_else(|| OperationError::InvalidState("search without a resolved base".to_string()))?;

    let mut request = arg.clone();
    request.subset = if state.chaining.entry_only {
        SearchSubset::BaseObject
    } else {
        SearchSubset::WholeSubtree
    };
    request.paged_results = None;
    let size = ctx.limits().size_limit(arg.service_controls.size_limit);
    let mut run = SearchRun::new(ctx, inv, state, request, size);
    run.run(cp, state.adm_points.clone()).await?;

    state.sr_continuation.append(&mut run.references);
    let mut poq = PartialOutcomeQualifier {
        limit_problem: run.limit_problem,
        ..Default::default()
    };
    if run.more && poq.limit_problem.is_none() {
        poq.limit_problem = Some(LimitProblem::SizeLimitExceeded);
    }

    Ok(SearchResult {
        name: None,
        entries: run.entries,
        partial_outcome_qualifier: (!poq.is_empty()).then_some(poq),
        alias_dereferenced: state.alias_dereferenced(),
    })
}
