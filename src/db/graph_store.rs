//! Loading and saving the access graph
//!
//! One normalization step reads everything it may touch in a single pass
//! through [`load_access_graph`] and writes back only the net edge changes
//! through [`apply_changes`], both on the caller's transaction.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;

use super::repository::{delete_edge, edge_sources, edge_targets, entity_exists, insert_edge, EdgeTable};
use crate::error::Result;
use crate::licensing::{AccessGraph, EntityId, EntityKind, Grant, GrantChanges, UserGrants};

/// What to load for one normalization step.
///
/// Every customer reachable from the listed jobs (or named directly) is
/// loaded with its full job set. With `holders` set, users holding a grant to
/// any listed customer or job are loaded as well.
#[derive(Debug, Clone, Default)]
pub struct GraphScope {
    pub users: Vec<EntityId>,
    pub customers: Vec<EntityId>,
    pub jobs: Vec<EntityId>,
    pub holders: bool,
}

impl GraphScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(mut self, users: impl IntoIterator<Item = EntityId>) -> Self {
        self.users.extend(users);
        self
    }

    pub fn with_customers(mut self, customers: impl IntoIterator<Item = EntityId>) -> Self {
        self.customers.extend(customers);
        self
    }

    pub fn with_jobs(mut self, jobs: impl IntoIterator<Item = EntityId>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    pub fn with_holders(mut self) -> Self {
        self.holders = true;
        self
    }
}

pub async fn load_access_graph(
    conn: &mut SqliteConnection,
    scope: &GraphScope,
) -> Result<AccessGraph> {
    let mut graph = AccessGraph::new();

    let mut job_rows = Vec::new();
    for job in &scope.jobs {
        let row = sqlx::query_as::<_, (EntityId, Option<EntityId>)>(
            "SELECT id, customer_id FROM jobs WHERE id = ?",
        )
        .bind(job)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = row {
            job_rows.push(row);
        }
    }

    let mut customers: BTreeSet<EntityId> = scope.customers.iter().cloned().collect();
    customers.extend(job_rows.iter().filter_map(|(_, parent)| parent.clone()));
    for customer in &customers {
        if !entity_exists(conn, EntityKind::Customer, customer).await? {
            continue;
        }
        let jobs = sqlx::query_scalar::<_, EntityId>("SELECT id FROM jobs WHERE customer_id = ?")
            .bind(customer)
            .fetch_all(&mut *conn)
            .await?;
        graph.insert_customer(customer.clone(), jobs.into_iter().collect());
    }
    for (job, parent) in job_rows {
        graph.insert_job(job, parent);
    }

    let mut users: BTreeSet<EntityId> = scope.users.iter().cloned().collect();
    if scope.holders {
        for customer in &scope.customers {
            users.extend(edge_sources(conn, EdgeTable::UserCustomers, customer).await?);
        }
        for job in &scope.jobs {
            users.extend(edge_sources(conn, EdgeTable::UserJobs, job).await?);
        }
    }
    for user in users {
        if !entity_exists(conn, EntityKind::User, &user).await? {
            continue;
        }
        let grants = UserGrants {
            customers: edge_targets(conn, EdgeTable::UserCustomers, &user)
                .await?
                .into_iter()
                .collect(),
            jobs: edge_targets(conn, EdgeTable::UserJobs, &user)
                .await?
                .into_iter()
                .collect(),
        };
        graph.insert_user(user, grants);
    }

    Ok(graph)
}

/// Write the net grant changes, removals first, logging each edge.
pub async fn apply_changes(conn: &mut SqliteConnection, changes: &GrantChanges) -> Result<()> {
    for grant in &changes.removed {
        let (edge, user, target) = grant_edge(grant);
        delete_edge(conn, edge, user, target).await?;
        tracing::info!(user_id = %user, "DEL {}", grant);
    }
    for grant in &changes.added {
        let (edge, user, target) = grant_edge(grant);
        insert_edge(conn, edge, user, target).await?;
        tracing::info!(user_id = %user, "ADD {}", grant);
    }
    Ok(())
}

fn grant_edge(grant: &Grant) -> (EdgeTable, &EntityId, &EntityId) {
    match grant {
        Grant::Blanket { user, customer } => (EdgeTable::UserCustomers, user, customer),
        Grant::Specific { user, job } => (EdgeTable::UserJobs, user, job),
    }
}
