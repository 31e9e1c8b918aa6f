//! Entitlement normalization
//!
//! Every connect/disconnect/replace request, whichever side it starts from,
//! is reduced to the same per-user steps so that the graph always converges
//! on one canonical shape:
//!
//! - A user never holds a blanket grant to a customer together with a
//!   specific grant to one of that customer's jobs.
//! - Specific grants covering every job of a customer collapse into a single
//!   blanket grant.
//! - Excluding one job from a blanket grant expands the blanket into specific
//!   grants to the remaining jobs.
//!
//! A specific connect that does not cover the whole customer removes an
//! existing blanket grant to that customer, narrowing the user's access to the
//! requested jobs. This matches the long-standing provider behaviour and is
//! covered by `test_connect_job_narrows_blanket`.
//!
//! Ids that are not present in the graph are skipped silently.

use std::collections::BTreeSet;

use super::graph::AccessGraph;
use super::types::EntityId;

// ============================================================================
// User side
// ============================================================================

pub fn connect_user_jobs(graph: &mut AccessGraph, user: &EntityId, jobs: &[EntityId]) {
    if !graph.has_user(user) {
        return;
    }
    for job in jobs {
        if !graph.has_job(job) {
            continue;
        }
        let Some(customer) = graph.parent_of(job).cloned() else {
            // An orphaned job has no customer to collapse into.
            graph.grant_specific(user, job);
            continue;
        };

        let customer_jobs = graph.jobs_of(&customer);
        let covers_customer = match graph.grants_of(user) {
            Some(grants) => customer_jobs
                .iter()
                .all(|cj| cj == job || grants.jobs.contains(cj)),
            None => false,
        };

        if covers_customer {
            graph.grant_blanket(user, &customer);
            for cj in &customer_jobs {
                graph.revoke_specific(user, cj);
            }
        } else {
            graph.grant_specific(user, job);
            graph.revoke_blanket(user, &customer);
        }
    }
}

pub fn disconnect_user_job(graph: &mut AccessGraph, user: &EntityId, job: &EntityId) {
    if !graph.has_user(user) || !graph.has_job(job) {
        return;
    }
    match graph.parent_of(job).cloned() {
        Some(customer) if graph.has_blanket(user, &customer) => {
            for cj in graph.jobs_of(&customer) {
                if &cj != job {
                    graph.grant_specific(user, &cj);
                }
            }
            graph.revoke_blanket(user, &customer);
            graph.revoke_specific(user, job);
        }
        _ => {
            graph.revoke_specific(user, job);
        }
    }
}

pub fn replace_user_jobs(graph: &mut AccessGraph, user: &EntityId, jobs: &[EntityId]) {
    let Some(held) = graph.grants_of(user).map(|g| g.jobs.clone()) else {
        return;
    };
    for job in &held {
        graph.revoke_specific(user, job);
    }
    connect_user_jobs(graph, user, jobs);
}

pub fn connect_user_customers(graph: &mut AccessGraph, user: &EntityId, customers: &[EntityId]) {
    if !graph.has_user(user) {
        return;
    }
    for customer in customers {
        if !graph.has_customer(customer) {
            continue;
        }
        graph.grant_blanket(user, customer);
        for cj in graph.jobs_of(customer) {
            graph.revoke_specific(user, &cj);
        }
    }
}

/// Plain removal: while the blanket grant exists the user holds no specific
/// grants to the customer's jobs, so there is nothing to expand.
pub fn disconnect_user_customer(graph: &mut AccessGraph, user: &EntityId, customer: &EntityId) {
    graph.revoke_blanket(user, customer);
}

pub fn replace_user_customers(graph: &mut AccessGraph, user: &EntityId, customers: &[EntityId]) {
    let Some(held) = graph.grants_of(user).map(|g| g.customers.clone()) else {
        return;
    };
    for customer in &held {
        graph.revoke_blanket(user, customer);
    }
    connect_user_customers(graph, user, customers);
}

// ============================================================================
// Customer side
// ============================================================================

pub fn connect_customer_users(graph: &mut AccessGraph, customer: &EntityId, users: &[EntityId]) {
    if !graph.has_customer(customer) {
        return;
    }
    let target = std::slice::from_ref(customer);
    for user in users {
        connect_user_customers(graph, user, target);
    }
}

pub fn disconnect_customer_user(graph: &mut AccessGraph, customer: &EntityId, user: &EntityId) {
    disconnect_user_customer(graph, user, customer);
}

pub fn replace_customer_users(graph: &mut AccessGraph, customer: &EntityId, users: &[EntityId]) {
    if !graph.has_customer(customer) {
        return;
    }
    for holder in graph.blanket_holders(customer) {
        graph.revoke_blanket(&holder, customer);
    }
    connect_customer_users(graph, customer, users);
}

// ============================================================================
// Job side
// ============================================================================

pub fn connect_job_users(graph: &mut AccessGraph, job: &EntityId, users: &[EntityId]) {
    if !graph.has_job(job) {
        return;
    }
    let target = std::slice::from_ref(job);
    for user in users {
        connect_user_jobs(graph, user, target);
    }
}

pub fn disconnect_job_user(graph: &mut AccessGraph, job: &EntityId, user: &EntityId) {
    disconnect_user_job(graph, user, job);
}

/// Clears the specific grants to the job, then connects the requested users.
/// Blanket grants to the job's customer held by other users are untouched.
pub fn replace_job_users(graph: &mut AccessGraph, job: &EntityId, users: &[EntityId]) {
    if !graph.has_job(job) {
        return;
    }
    for holder in graph.specific_holders(job) {
        graph.revoke_specific(&holder, job);
    }
    connect_job_users(graph, job, users);
}

// ============================================================================
// Job set changes
// ============================================================================

/// Collapse the specific grants of any loaded user that now cover every job
/// of `customer`, as happens when one of its jobs is deleted.
pub fn collapse_covered(graph: &mut AccessGraph, customer: &EntityId) {
    let customer_jobs = graph.jobs_of(customer);
    if customer_jobs.is_empty() {
        return;
    }
    let holders: BTreeSet<EntityId> = customer_jobs
        .iter()
        .flat_map(|job| graph.specific_holders(job))
        .collect();
    for user in holders {
        let covered = graph
            .grants_of(&user)
            .is_some_and(|g| customer_jobs.is_subset(&g.jobs));
        if covered {
            graph.grant_blanket(&user, customer);
            for job in &customer_jobs {
                graph.revoke_specific(&user, job);
            }
        }
    }
}
