//! Container selection for reuse and preemption.
//!
//! Both functions are pure: they read the ledger and the matcher and return a
//! decision; the scheduler applies it.

use std::cmp::Reverse;

use crate::core::ledger::{Assignment, HeldContainer, RequestLedger, TaskRequest};
use crate::core::matcher::ContainerSignatureMatcher;
use crate::core::MatchError;
use crate::util::serde::{ContainerId, Resource};

/// Containers to take back so a pending request can be served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreemptionPlan {
    /// Idle containers to return to the cluster directly.
    pub release_idle: Vec<ContainerId>,
    /// Active containers whose tasks must first be told to give them up.
    pub preempt_active: Vec<ContainerId>,
    /// Combined allotment of every selected container.
    pub freed: Resource,
}

impl PreemptionPlan {
    /// True when nothing needs to be released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.release_idle.is_empty() && self.preempt_active.is_empty()
    }
}

/// Pick the idle container to reuse for `required`.
///
/// Among idle containers whose allotment covers the request's capability and
/// whose signature is a superset of the request's, the one with the least
/// resource slack over the request's capability wins
/// (memory first, then vcores); ties go to the lowest container id.
///
/// # Errors
///
/// Propagates matcher failures.
pub fn pick_idle_container<'a, I>(
    held: I,
    required: &TaskRequest,
    matcher: &dyn ContainerSignatureMatcher,
) -> Result<Option<ContainerId>, MatchError>
where
    I: IntoIterator<Item = &'a HeldContainer>,
{
    let mut best: Option<((u64, u32), &ContainerId)> = None;
    for h in held
        .into_iter()
        .filter(|h| h.is_idle() && h.container.resource.covers(&required.capability))
    {
        if !matcher.is_super_set(Some(&h.signature), Some(&required.signature))? {
            continue;
        }
        let key = (h.container.resource.slack_over(&required.capability), &h.container.id);
        let better = match &best {
            Some(current) => key < *current,
            None => true,
        };
        if better {
            best = Some(key);
        }
    }
    Ok(best.map(|(_, id)| id.clone()))
}

struct ActiveCandidate<'a> {
    held: &'a HeldContainer,
    exact: bool,
    task_priority: crate::util::serde::Priority,
}

/// Decide which held containers to take back for `pending`.
///
/// The shortfall is the request's capability minus the cluster headroom and
/// minus whatever is already on its way back. See [`plan_preemption_within`].
///
/// # Errors
///
/// Propagates matcher failures.
pub fn plan_preemption(
    ledger: &RequestLedger,
    pending: &TaskRequest,
    headroom: Resource,
    matcher: &dyn ContainerSignatureMatcher,
) -> Result<PreemptionPlan, MatchError> {
    let available = headroom.saturating_add(&ledger.releasing_resources());
    plan_preemption_within(ledger, pending, available, matcher)
}

/// Decide which held containers to take back for `pending` when `available`
/// is all that will be free for it.
///
/// Candidates must have a
/// signature that is a superset of the request's. Idle candidates come first.
/// Active candidates must run lower-priority work; those that are not an
/// exact match for their current task go first, least important and most
/// recently assigned first. Selection stops as soon as the shortfall is
/// covered, and nothing is selected if it cannot be covered at all.
///
/// # Errors
///
/// Propagates matcher failures.
pub fn plan_preemption_within(
    ledger: &RequestLedger,
    pending: &TaskRequest,
    available: Resource,
    matcher: &dyn ContainerSignatureMatcher,
) -> Result<PreemptionPlan, MatchError> {
    let shortfall = pending.capability.saturating_sub(&available);
    if shortfall.is_zero() {
        return Ok(PreemptionPlan::default());
    }

    let mut idle: Vec<&HeldContainer> = Vec::new();
    let mut active: Vec<ActiveCandidate<'_>> = Vec::new();
    for held in ledger.held_containers() {
        match held.assignment {
            Assignment::Idle { .. } => {
                if matcher.is_super_set(Some(&held.signature), Some(&pending.signature))? {
                    idle.push(held);
                }
            }
            Assignment::Active { cookie } => {
                let Ok(task) = ledger.lookup_by_cookie(cookie) else {
                    continue;
                };
                if !pending.priority.outranks(task.priority) {
                    continue;
                }
                if !matcher.is_super_set(Some(&held.signature), Some(&pending.signature))? {
                    continue;
                }
                let exact = matcher.is_exact_match(Some(&held.signature), Some(&task.signature))?;
                active.push(ActiveCandidate {
                    held,
                    exact,
                    task_priority: task.priority,
                });
            }
            Assignment::BeingReleased { .. } | Assignment::Released { .. } => {}
        }
    }

    idle.sort_by(|a, b| {
        let ka = (a.container.resource.slack_over(&pending.capability), &a.container.id);
        let kb = (b.container.resource.slack_over(&pending.capability), &b.container.id);
        ka.cmp(&kb)
    });
    active.sort_by_key(|c| {
        (
            c.exact,
            Reverse(c.task_priority),
            Reverse(c.held.assigned_at_ms),
            c.held.container.id.clone(),
        )
    });

    let mut plan = PreemptionPlan::default();
    for held in idle {
        if plan.freed.covers(&shortfall) {
            break;
        }
        plan.freed = plan.freed.saturating_add(&held.container.resource);
        plan.release_idle.push(held.container.id.clone());
    }
    for candidate in active {
        if plan.freed.covers(&shortfall) {
            break;
        }
        plan.freed = plan.freed.saturating_add(&candidate.held.container.resource);
        plan.preempt_active.push(candidate.held.container.id.clone());
    }

    if plan.freed.covers(&shortfall) {
        Ok(plan)
    } else {
        Ok(PreemptionPlan::default())
    }
}
