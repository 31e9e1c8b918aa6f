//! Load-time view of the entitlement graph
//!
//! An [`AccessGraph`] holds the slice of the User↔Customer and User↔Job
//! relations needed for one normalization step, together with the
//! Customer→Job parentage those relations are judged against. It is filled
//! by the database layer in a single read, mutated in memory by the
//! normalizer, and then diffed against its starting point so that only the
//! net edge changes are written back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::types::EntityId;

/// A single access edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grant {
    /// User↔Customer: every current and future job of the customer
    Blanket { user: EntityId, customer: EntityId },
    /// User↔Job: exactly one job
    Specific { user: EntityId, job: EntityId },
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::Blanket { user, customer } => write!(f, "User {} Cust {}", user, customer),
            Grant::Specific { user, job } => write!(f, "User {} Job {}", user, job),
        }
    }
}

/// The grants held by one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserGrants {
    pub customers: BTreeSet<EntityId>,
    pub jobs: BTreeSet<EntityId>,
}

/// Net difference between the loaded graph and its current state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantChanges {
    pub added: Vec<Grant>,
    pub removed: Vec<Grant>,
}

impl GrantChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccessGraph {
    users: BTreeMap<EntityId, UserGrants>,
    customer_jobs: BTreeMap<EntityId, BTreeSet<EntityId>>,
    job_parents: BTreeMap<EntityId, Option<EntityId>>,
    baseline: BTreeSet<Grant>,
}

impl AccessGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Register a user with the grants it currently holds.
    pub fn insert_user(&mut self, user: EntityId, grants: UserGrants) {
        self.baseline.extend(edges_of(&user, &grants));
        self.users.insert(user, grants);
    }

    /// Register a customer with its full current job set.
    pub fn insert_customer(&mut self, customer: EntityId, jobs: BTreeSet<EntityId>) {
        for job in &jobs {
            self.job_parents.insert(job.clone(), Some(customer.clone()));
        }
        self.customer_jobs.insert(customer, jobs);
    }

    /// Register a job and its parent customer (if any).
    pub fn insert_job(&mut self, job: EntityId, parent: Option<EntityId>) {
        if let Some(customer) = &parent {
            self.customer_jobs
                .entry(customer.clone())
                .or_default()
                .insert(job.clone());
        }
        self.job_parents.insert(job, parent);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn has_user(&self, user: &EntityId) -> bool {
        self.users.contains_key(user)
    }

    pub fn has_customer(&self, customer: &EntityId) -> bool {
        self.customer_jobs.contains_key(customer)
    }

    pub fn has_job(&self, job: &EntityId) -> bool {
        self.job_parents.contains_key(job)
    }

    pub fn grants_of(&self, user: &EntityId) -> Option<&UserGrants> {
        self.users.get(user)
    }

    pub fn parent_of(&self, job: &EntityId) -> Option<&EntityId> {
        self.job_parents.get(job).and_then(Option::as_ref)
    }

    /// Every current job of a customer (empty when unknown).
    pub fn jobs_of(&self, customer: &EntityId) -> BTreeSet<EntityId> {
        self.customer_jobs.get(customer).cloned().unwrap_or_default()
    }

    pub fn has_blanket(&self, user: &EntityId, customer: &EntityId) -> bool {
        self.users
            .get(user)
            .is_some_and(|g| g.customers.contains(customer))
    }

    pub fn has_specific(&self, user: &EntityId, job: &EntityId) -> bool {
        self.users.get(user).is_some_and(|g| g.jobs.contains(job))
    }

    /// Loaded users holding a blanket grant to the customer.
    pub fn blanket_holders(&self, customer: &EntityId) -> Vec<EntityId> {
        self.users
            .iter()
            .filter(|(_, g)| g.customers.contains(customer))
            .map(|(u, _)| u.clone())
            .collect()
    }

    /// Loaded users holding a specific grant to the job.
    pub fn specific_holders(&self, job: &EntityId) -> Vec<EntityId> {
        self.users
            .iter()
            .filter(|(_, g)| g.jobs.contains(job))
            .map(|(u, _)| u.clone())
            .collect()
    }

    /// (user, job) pairs where both a blanket grant to the job's customer
    /// and a specific grant to the job are held.
    pub fn exclusivity_violations(&self) -> Vec<(EntityId, EntityId)> {
        let mut found = Vec::new();
        for (user, grants) in &self.users {
            for job in &grants.jobs {
                if let Some(customer) = self.parent_of(job) {
                    if grants.customers.contains(customer) {
                        found.push((user.clone(), job.clone()));
                    }
                }
            }
        }
        found
    }

    // ========================================================================
    // Mutation primitives
    // ========================================================================

    /// Returns true when the edge was absent and is now present.
    pub fn grant_blanket(&mut self, user: &EntityId, customer: &EntityId) -> bool {
        match self.users.get_mut(user) {
            Some(g) => g.customers.insert(customer.clone()),
            None => false,
        }
    }

    pub fn revoke_blanket(&mut self, user: &EntityId, customer: &EntityId) -> bool {
        match self.users.get_mut(user) {
            Some(g) => g.customers.remove(customer),
            None => false,
        }
    }

    pub fn grant_specific(&mut self, user: &EntityId, job: &EntityId) -> bool {
        match self.users.get_mut(user) {
            Some(g) => g.jobs.insert(job.clone()),
            None => false,
        }
    }

    pub fn revoke_specific(&mut self, user: &EntityId, job: &EntityId) -> bool {
        match self.users.get_mut(user) {
            Some(g) => g.jobs.remove(job),
            None => false,
        }
    }

    // ========================================================================
    // Diff
    // ========================================================================

    /// Net edge changes since loading. Edges removed and re-added cancel out.
    pub fn changes(&self) -> GrantChanges {
        let current: BTreeSet<Grant> = self
            .users
            .iter()
            .flat_map(|(user, grants)| edges_of(user, grants))
            .collect();

        GrantChanges {
            added: current.difference(&self.baseline).cloned().collect(),
            removed: self.baseline.difference(&current).cloned().collect(),
        }
    }
}

fn edges_of(user: &EntityId, grants: &UserGrants) -> Vec<Grant> {
    let blankets = grants.customers.iter().map(|c| Grant::Blanket {
        user: user.clone(),
        customer: c.clone(),
    });
    let specifics = grants.jobs.iter().map(|j| Grant::Specific {
        user: user.clone(),
        job: j.clone(),
    });
    blankets.chain(specifics).collect()
}
