//! List. Enumerate the immediate subordinates of a resolved base, a page at a time.

use crate::prelude::*;
use crate::server::continuation::{nssr_references, specific_reference};
use crate::session::{render_reference, validate_sort_keys, ListCursor, PagedState};

/// Where this page starts, and how its state is kept between pages.
struct ListPage {
    request: ListArgument,
    page_size: usize,
    after: Option<EntryId>,
    reference: Option<Vec<u8>>,
}

async fn begin_page(
    ctx: &DsaContext,
    session: &Session,
    arg: &ListArgument,
) -> Result<ListPage, OperationError> {
    match &arg.paged_results {
        None => Ok(ListPage {
            request: arg.clone(),
            page_size: ctx.limits().size_limit(arg.service_controls.size_limit),
            after: None,
            reference: None,
        }),
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
            Ok(ListPage {
                request: arg.clone(),
                page_size: (*page_size).min(ctx.limits().max_size_limit),
                after: None,
                reference: Some(reference),
            })
        }
        Some(PagedResultsRequest::QueryReference(reference)) => {
            match session.paging().await.get(reference) {
                Some(PagedState::List(cursor)) => Ok(ListPage {
                    request: cursor.request.clone(),
                    page_size: cursor.page_size,
                    after: cursor.after,
                    reference: Some(reference.clone()),
                }),
                _ => {
                    request_warn!(reference = %render_reference(reference), "unknown list query reference");
                    Err(OperationError::Service(ServiceProblem::InvalidQueryReference))
                }
            }
        }
        Some(PagedResultsRequest::AbandonQuery(reference)) => {
            session.paging().await.remove(reference);
            request_info!(reference = %render_reference(reference), "paged list abandoned");
            Err(OperationError::Abandoned)
        }
    }
}

/// List the subordinates of `state.found`.
///
/// Each subordinate is judged with the administrative areas in force at the subordinate
/// itself. Ones the requester may not discover are left out. Subordinate references become
/// continuation references in `state.sr_continuation` rather than listed names.
#[instrument(level = "debug", skip_all, fields(base = %state.name))]
pub async fn list_i(
    ctx: &DsaContext,
    inv: &Invocation,
    session: &Session,
    state: &mut OperationDispatcherState,
    arg: &ListArgument,
) -> Result<ListResult, OperationError> {
    let base = state
        .found
        .clone()
        .ok_or_else(|| OperationError::InvalidState("list without a resolved base".to_string()))?;
    let page = begin_page(ctx, session, arg).await?;

    let filter = if page
        .request
        .service_controls
        .has(ServiceControlOptions::SUBENTRIES)
    {
        SubordinateFilter::Subentries
    } else {
        SubordinateFilter::Entries
    };

    if page.after.is_none() {
        let refs = nssr_references(
            &base,
            &base.dn,
            OperationProgress::proceeding(base.dn.len()),
            state.operation,
        );
        state.sr_continuation.extend(refs);
    }

    let batch_size = ctx.limits().subordinate_batch_size;
    let mut subordinates = Vec::new();
    let mut limit_problem = None;
    let mut more = false;
    let mut last_consumed = page.after;
    let mut cursor = page.after;

    'batches: loop {
        if inv.is_abandoned() {
            return Err(OperationError::Abandoned);
        }
        if inv.time_exceeded() {
            request_warn!(base = %base.dn, "list stopped at the time limit");
            limit_problem = Some(LimitProblem::TimeLimitExceeded);
            more = true;
            break 'batches;
        }
        let batch = ctx
            .store
            .list_subordinates(&base, batch_size, cursor, filter)
            .await?;
        let exhausted = batch.len() < batch_size;

        for child in batch {
            cursor = Some(child.id);
            if inv.is_abandoned() {
                return Err(OperationError::Abandoned);
            }
            if inv.time_exceeded() {
                request_warn!(base = %base.dn, "list stopped at the time limit");
                limit_problem = Some(LimitProblem::TimeLimitExceeded);
                more = true;
                break 'batches;
            }

            if child.is(DseType::FAMILY_MEMBER) && !page.request.list_family {
                last_consumed = Some(child.id);
                continue;
            }

            let access = ctx.access_at(inv, &state.adm_points, &child).await?;
            if !access.may_discover() {
                security_access!(dn = %child.dn, "denied ❌ - subordinate hidden from list");
                last_consumed = Some(child.id);
                continue;
            }

            if child.is(DseType::SUBR) {
                let cr = specific_reference(
                    &child,
                    child.dn.clone(),
                    OperationProgress::completed(),
                    state.operation,
                )
                .map(|mut cr| {
                    cr.entry_only = true;
                    cr
                });
                if let Some(cr) = cr {
                    state.sr_continuation.push(cr);
                }
                last_consumed = Some(child.id);
                continue;
            }

            if !child.dse.is_any(DseType::ENTRY | DseType::ALIAS | DseType::SUBENTRY) {
                last_consumed = Some(child.id);
                continue;
            }

            let Some(rdn) = child.rdn().cloned() else {
                last_consumed = Some(child.id);
                continue;
            };

            if subordinates.len() == page.page_size {
                more = true;
                break 'batches;
            }

            subordinates.push(SubordinateInfo {
                rdn,
                alias_entry: child.is(DseType::ALIAS),
                from_entry: !child.is(DseType::SHADOW),
            });
            last_consumed = Some(child.id);
        }

        if exhausted {
            break;
        }
    }

    let mut poq = PartialOutcomeQualifier {
        limit_problem,
        ..Default::default()
    };

    match page.reference {
        Some(reference) => {
            let mut paging = session.paging().await;
            if more {
                paging.insert(
                    reference.clone(),
                    PagedState::List(ListCursor {
                        request: page.request,
                        page_size: page.page_size,
                        after: last_consumed,
                    }),
                );
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

    request_info!(base = %base.dn, returned = subordinates.len(), more, "list page complete");

    Ok(ListResult {
        name: state.alias_dereferenced().then(|| base.dn.clone()),
        subordinates,
        partial_outcome_qualifier: (!poq.is_empty()).then_some(poq),
        alias_dereferenced: state.alias_dereferenced(),
    })
}

/// List, as asked of the DSA holding a subordinate context prefix. The superior has
/// already listed the other subordinates, only the context prefix itself is reported.
#[instrument(level = "debug", skip_all, fields(base = %state.name))]
pub async fn list_ii(
    ctx: &DsaContext,
    inv: &Invocation,
    state: &mut OperationDispatcherState,
) -> Result<ListResult, OperationError> {
    let cp = state
        .found
        .clone()
        .ok_or_else(|| OperationError::InvalidState("list without a resolved base".to_string()))?;
    inv.check()?;

    let mut subordinates = Vec::new();
    let access = ctx.access_at(inv, &state.adm_points, &cp).await?;
    if access.may_discover() {
        if let Some(rdn) = cp.rdn().cloned() {
            subordinates.push(SubordinateInfo {
                rdn,
                alias_entry: cp.is(DseType::ALIAS),
                from_entry: !cp.is(DseType::SHADOW),
            });
        }
    } else {
        security_access!(dn = %cp.dn, "denied ❌ - context prefix hidden from list");
    }

    Ok(ListResult {
        name: None,
        subordinates,
        partial_outcome_qualifier: None,
        alias_dereferenced: state.alias_dereferenced(),
    })
}
