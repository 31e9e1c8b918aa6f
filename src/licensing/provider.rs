//! Licensing provider
//!
//! Entry point for every licensing operation. Ids arrive as strings and are
//! validated here; entitlement changes run as one load/normalize/save
//! transaction each.

use sqlx::SqlitePool;

use super::graph::AccessGraph;
use super::normalizer;
use super::realm::RealmScope;
use super::types::{Customer, EntityId, Job, Realm, User};
use crate::db::{
    apply_changes, begin_write, delete_job_rows, load_access_graph, EdgeEnd, EdgeTable,
    EdgeUpdate, GraphScope, LicensingRepository,
};
use crate::error::Result;

/// The entity a normalization step starts from. The step has no effect when
/// it does not exist.
enum Initiator<'a> {
    User(&'a EntityId),
    Customer(&'a EntityId),
    Job(&'a EntityId),
}

impl Initiator<'_> {
    fn is_loaded(&self, graph: &AccessGraph) -> bool {
        match self {
            Initiator::User(id) => graph.has_user(id),
            Initiator::Customer(id) => graph.has_customer(id),
            Initiator::Job(id) => graph.has_job(id),
        }
    }
}

#[derive(Clone)]
pub struct LicensingProvider {
    pool: SqlitePool,
}

impl LicensingProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn repo(&self) -> LicensingRepository<'_> {
        LicensingRepository::new(&self.pool)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn read_user(&self, id: &str) -> Result<Option<User>> {
        self.repo().read_user(&EntityId::parse(id)?).await
    }

    pub async fn read_customer(&self, id: &str) -> Result<Option<Customer>> {
        self.repo().read_customer(&EntityId::parse(id)?).await
    }

    pub async fn read_job(&self, id: &str) -> Result<Option<Job>> {
        self.repo().read_job(&EntityId::parse(id)?).await
    }

    pub async fn read_realm(&self, id: &str) -> Result<Option<Realm>> {
        self.repo().read_realm(&EntityId::parse(id)?).await
    }

    pub async fn read_users_by_name(&self, name: &str) -> Result<Vec<User>> {
        self.repo().read_users_by_name(name).await
    }

    pub async fn read_customers_by_name(&self, name: &str) -> Result<Vec<Customer>> {
        self.repo().read_customers_by_name(name).await
    }

    pub async fn read_jobs_by_name(&self, name: &str) -> Result<Vec<Job>> {
        self.repo().read_jobs_by_name(name).await
    }

    pub async fn read_realms_by_name(&self, name: &str) -> Result<Vec<Realm>> {
        self.repo().read_realms_by_name(name).await
    }

    /// Users belonging to any of the realms, or all users when none are given.
    pub async fn list_users<S: AsRef<str>>(&self, realm_ids: &[S]) -> Result<Vec<User>> {
        let scope = RealmScope::new(EntityId::parse_all(realm_ids)?);
        let users = self.repo().list_users().await?;
        Ok(users
            .into_iter()
            .filter(|u| scope.admits(&u.realm_ids))
            .collect())
    }

    /// Customers belonging to any of the realms, or all when none are given.
    pub async fn list_customers<S: AsRef<str>>(&self, realm_ids: &[S]) -> Result<Vec<Customer>> {
        let scope = RealmScope::new(EntityId::parse_all(realm_ids)?);
        let customers = self.repo().list_customers().await?;
        Ok(customers
            .into_iter()
            .filter(|c| scope.admits(&c.realm_ids))
            .collect())
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.repo().list_jobs().await
    }

    pub async fn list_realms(&self) -> Result<Vec<Realm>> {
        self.repo().list_realms().await
    }

    // ========================================================================
    // Updates and deletes
    // ========================================================================

    pub async fn update_user(&self, user: &User) -> Result<User> {
        self.repo().update_user(user).await
    }

    pub async fn update_customer(&self, customer: &Customer) -> Result<Customer> {
        self.repo().update_customer(customer).await
    }

    pub async fn update_job(&self, job: &Job) -> Result<Job> {
        self.repo().update_job(job).await
    }

    pub async fn update_realm(&self, realm: &Realm) -> Result<Realm> {
        self.repo().update_realm(realm).await
    }

    pub async fn delete_user(&self, id: &str) -> Result<u64> {
        self.repo().delete_user(&EntityId::parse(id)?).await
    }

    pub async fn delete_customer(&self, id: &str, remove_jobs: bool) -> Result<u64> {
        self.repo()
            .delete_customer(&EntityId::parse(id)?, remove_jobs)
            .await
    }

    pub async fn delete_realm(&self, id: &str) -> Result<u64> {
        self.repo().delete_realm(&EntityId::parse(id)?).await
    }

    /// Delete a job and its grants. Users whose specific grants now cover
    /// every remaining job of the parent are collapsed to a blanket grant.
    pub async fn delete_job(&self, id: &str) -> Result<u64> {
        let id = EntityId::parse(id)?;
        let mut tx = begin_write(&self.pool).await?;

        let parent = sqlx::query_scalar::<_, Option<EntityId>>(
            "SELECT customer_id FROM jobs WHERE id = ?",
        )
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?
        .flatten();

        let removed = delete_job_rows(&mut tx, &id).await?;

        if let Some(customer) = parent {
            let siblings = sqlx::query_scalar::<_, EntityId>(
                "SELECT id FROM jobs WHERE customer_id = ?",
            )
            .bind(&customer)
            .fetch_all(&mut *tx)
            .await?;
            let scope = GraphScope::new()
                .with_customers([customer.clone()])
                .with_jobs(siblings)
                .with_holders();
            let mut graph = load_access_graph(&mut tx, &scope).await?;
            normalizer::collapse_covered(&mut graph, &customer);
            apply_changes(&mut tx, &graph.changes()).await?;
        }

        tx.commit().await?;
        tracing::info!(job_id = %id, removed, "Deleted job");
        Ok(removed)
    }

    // ========================================================================
    // Entitlements
    // ========================================================================

    /// Load the scope, run one normalization step and save the net changes.
    /// Returns false without writing when the initiating entity is missing.
    async fn normalize<F>(&self, scope: GraphScope, initiator: Initiator<'_>, step: F) -> Result<bool>
    where
        F: FnOnce(&mut AccessGraph),
    {
        let mut tx = begin_write(&self.pool).await?;
        let mut graph = load_access_graph(&mut tx, &scope).await?;
        if !initiator.is_loaded(&graph) {
            return Ok(false);
        }

        step(&mut graph);

        let overlaps = graph.exclusivity_violations();
        if !overlaps.is_empty() {
            tracing::warn!(
                count = overlaps.len(),
                "Grants overlap after normalization, stored data predates the exclusivity rule"
            );
        }

        let changes = graph.changes();
        apply_changes(&mut tx, &changes).await?;
        tx.commit().await?;

        tracing::debug!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            "Normalized grants"
        );
        Ok(true)
    }

    async fn refreshed_user(&self, applied: bool, id: &EntityId) -> Result<Option<User>> {
        if applied {
            self.repo().read_user(id).await
        } else {
            Ok(None)
        }
    }

    async fn refreshed_customer(&self, applied: bool, id: &EntityId) -> Result<Option<Customer>> {
        if applied {
            self.repo().read_customer(id).await
        } else {
            Ok(None)
        }
    }

    async fn refreshed_job(&self, applied: bool, id: &EntityId) -> Result<Option<Job>> {
        if applied {
            self.repo().read_job(id).await
        } else {
            Ok(None)
        }
    }

    pub async fn connect_user_jobs<S: AsRef<str>>(
        &self,
        user_id: &str,
        job_ids: &[S],
    ) -> Result<Option<User>> {
        let user = EntityId::parse(user_id)?;
        let jobs = EntityId::parse_all(job_ids)?;
        let scope = GraphScope::new()
            .with_users([user.clone()])
            .with_jobs(jobs.iter().cloned());
        let applied = self
            .normalize(scope, Initiator::User(&user), |g| {
                normalizer::connect_user_jobs(g, &user, &jobs)
            })
            .await?;
        self.refreshed_user(applied, &user).await
    }

    pub async fn disconnect_user_job(&self, user_id: &str, job_id: &str) -> Result<Option<User>> {
        let user = EntityId::parse(user_id)?;
        let job = EntityId::parse(job_id)?;
        let scope = GraphScope::new()
            .with_users([user.clone()])
            .with_jobs([job.clone()]);
        let applied = self
            .normalize(scope, Initiator::User(&user), |g| {
                normalizer::disconnect_user_job(g, &user, &job)
            })
            .await?;
        self.refreshed_user(applied, &user).await
    }

    pub async fn replace_user_jobs<S: AsRef<str>>(
        &self,
        user_id: &str,
        job_ids: &[S],
    ) -> Result<Option<User>> {
        let user = EntityId::parse(user_id)?;
        let jobs = EntityId::parse_all(job_ids)?;
        let scope = GraphScope::new()
            .with_users([user.clone()])
            .with_jobs(jobs.iter().cloned());
        let applied = self
            .normalize(scope, Initiator::User(&user), |g| {
                normalizer::replace_user_jobs(g, &user, &jobs)
            })
            .await?;
        self.refreshed_user(applied, &user).await
    }

    pub async fn connect_user_customers<S: AsRef<str>>(
        &self,
        user_id: &str,
        customer_ids: &[S],
    ) -> Result<Option<User>> {
        let user = EntityId::parse(user_id)?;
        let customers = EntityId::parse_all(customer_ids)?;
        let scope = GraphScope::new()
            .with_users([user.clone()])
            .with_customers(customers.iter().cloned());
        let applied = self
            .normalize(scope, Initiator::User(&user), |g| {
                normalizer::connect_user_customers(g, &user, &customers)
            })
            .await?;
        self.refreshed_user(applied, &user).await
    }

    pub async fn disconnect_user_customer(
        &self,
        user_id: &str,
        customer_id: &str,
    ) -> Result<Option<User>> {
        let user = EntityId::parse(user_id)?;
        let customer = EntityId::parse(customer_id)?;
        let scope = GraphScope::new()
            .with_users([user.clone()])
            .with_customers([customer.clone()]);
        let applied = self
            .normalize(scope, Initiator::User(&user), |g| {
                normalizer::disconnect_user_customer(g, &user, &customer)
            })
            .await?;
        self.refreshed_user(applied, &user).await
    }

    pub async fn replace_user_customers<S: AsRef<str>>(
        &self,
        user_id: &str,
        customer_ids: &[S],
    ) -> Result<Option<User>> {
        let user = EntityId::parse(user_id)?;
        let customers = EntityId::parse_all(customer_ids)?;
        let scope = GraphScope::new()
            .with_users([user.clone()])
            .with_customers(customers.iter().cloned());
        let applied = self
            .normalize(scope, Initiator::User(&user), |g| {
                normalizer::replace_user_customers(g, &user, &customers)
            })
            .await?;
        self.refreshed_user(applied, &user).await
    }

    pub async fn connect_customer_users<S: AsRef<str>>(
        &self,
        customer_id: &str,
        user_ids: &[S],
    ) -> Result<Option<Customer>> {
        let customer = EntityId::parse(customer_id)?;
        let users = EntityId::parse_all(user_ids)?;
        let scope = GraphScope::new()
            .with_customers([customer.clone()])
            .with_users(users.iter().cloned());
        let applied = self
            .normalize(scope, Initiator::Customer(&customer), |g| {
                normalizer::connect_customer_users(g, &customer, &users)
            })
            .await?;
        self.refreshed_customer(applied, &customer).await
    }

    pub async fn disconnect_customer_user(
        &self,
        customer_id: &str,
        user_id: &str,
    ) -> Result<Option<Customer>> {
        let customer = EntityId::parse(customer_id)?;
        let user = EntityId::parse(user_id)?;
        let scope = GraphScope::new()
            .with_customers([customer.clone()])
            .with_users([user.clone()]);
        let applied = self
            .normalize(scope, Initiator::Customer(&customer), |g| {
                normalizer::disconnect_customer_user(g, &customer, &user)
            })
            .await?;
        self.refreshed_customer(applied, &customer).await
    }

    pub async fn replace_customer_users<S: AsRef<str>>(
        &self,
        customer_id: &str,
        user_ids: &[S],
    ) -> Result<Option<Customer>> {
        let customer = EntityId::parse(customer_id)?;
        let users = EntityId::parse_all(user_ids)?;
        let scope = GraphScope::new()
            .with_customers([customer.clone()])
            .with_users(users.iter().cloned())
            .with_holders();
        let applied = self
            .normalize(scope, Initiator::Customer(&customer), |g| {
                normalizer::replace_customer_users(g, &customer, &users)
            })
            .await?;
        self.refreshed_customer(applied, &customer).await
    }

    pub async fn connect_job_users<S: AsRef<str>>(
        &self,
        job_id: &str,
        user_ids: &[S],
    ) -> Result<Option<Job>> {
        let job = EntityId::parse(job_id)?;
        let users = EntityId::parse_all(user_ids)?;
        let scope = GraphScope::new()
            .with_jobs([job.clone()])
            .with_users(users.iter().cloned());
        let applied = self
            .normalize(scope, Initiator::Job(&job), |g| {
                normalizer::connect_job_users(g, &job, &users)
            })
            .await?;
        self.refreshed_job(applied, &job).await
    }

    pub async fn disconnect_job_user(&self, job_id: &str, user_id: &str) -> Result<Option<Job>> {
        let job = EntityId::parse(job_id)?;
        let user = EntityId::parse(user_id)?;
        let scope = GraphScope::new()
            .with_jobs([job.clone()])
            .with_users([user.clone()]);
        let applied = self
            .normalize(scope, Initiator::Job(&job), |g| {
                normalizer::disconnect_job_user(g, &job, &user)
            })
            .await?;
        self.refreshed_job(applied, &job).await
    }

    pub async fn replace_job_users<S: AsRef<str>>(
        &self,
        job_id: &str,
        user_ids: &[S],
    ) -> Result<Option<Job>> {
        let job = EntityId::parse(job_id)?;
        let users = EntityId::parse_all(user_ids)?;
        let scope = GraphScope::new()
            .with_jobs([job.clone()])
            .with_users(users.iter().cloned())
            .with_holders();
        let applied = self
            .normalize(scope, Initiator::Job(&job), |g| {
                normalizer::replace_job_users(g, &job, &users)
            })
            .await?;
        self.refreshed_job(applied, &job).await
    }

    // ========================================================================
    // Realm memberships
    // ========================================================================

    async fn memberships<S: AsRef<str>>(
        &self,
        edge: EdgeTable,
        end: EdgeEnd,
        anchor: &str,
        targets: &[S],
        update: EdgeUpdate,
    ) -> Result<Option<EntityId>> {
        let anchor = EntityId::parse(anchor)?;
        let targets = EntityId::parse_all(targets)?;
        let applied = self
            .repo()
            .update_edges(edge, end, &anchor, &targets, update)
            .await?;
        Ok(applied.then_some(anchor))
    }

    async fn realm_after(&self, applied: Option<EntityId>) -> Result<Option<Realm>> {
        match applied {
            Some(id) => self.repo().read_realm(&id).await,
            None => Ok(None),
        }
    }

    async fn user_after(&self, applied: Option<EntityId>) -> Result<Option<User>> {
        match applied {
            Some(id) => self.repo().read_user(&id).await,
            None => Ok(None),
        }
    }

    async fn customer_after(&self, applied: Option<EntityId>) -> Result<Option<Customer>> {
        match applied {
            Some(id) => self.repo().read_customer(&id).await,
            None => Ok(None),
        }
    }

    pub async fn connect_realm_users<S: AsRef<str>>(
        &self,
        realm_id: &str,
        user_ids: &[S],
    ) -> Result<Option<Realm>> {
        let applied = self
            .memberships(EdgeTable::UserRealms, EdgeEnd::Right, realm_id, user_ids, EdgeUpdate::Connect)
            .await?;
        self.realm_after(applied).await
    }

    pub async fn disconnect_realm_user(&self, realm_id: &str, user_id: &str) -> Result<Option<Realm>> {
        let applied = self
            .memberships(EdgeTable::UserRealms, EdgeEnd::Right, realm_id, &[user_id], EdgeUpdate::Disconnect)
            .await?;
        self.realm_after(applied).await
    }

    pub async fn replace_realm_users<S: AsRef<str>>(
        &self,
        realm_id: &str,
        user_ids: &[S],
    ) -> Result<Option<Realm>> {
        let applied = self
            .memberships(EdgeTable::UserRealms, EdgeEnd::Right, realm_id, user_ids, EdgeUpdate::Replace)
            .await?;
        self.realm_after(applied).await
    }

    pub async fn connect_realm_customers<S: AsRef<str>>(
        &self,
        realm_id: &str,
        customer_ids: &[S],
    ) -> Result<Option<Realm>> {
        let applied = self
            .memberships(EdgeTable::CustomerRealms, EdgeEnd::Right, realm_id, customer_ids, EdgeUpdate::Connect)
            .await?;
        self.realm_after(applied).await
    }

    pub async fn disconnect_realm_customer(
        &self,
        realm_id: &str,
        customer_id: &str,
    ) -> Result<Option<Realm>> {
        let applied = self
            .memberships(EdgeTable::CustomerRealms, EdgeEnd::Right, realm_id, &[customer_id], EdgeUpdate::Disconnect)
            .await?;
        self.realm_after(applied).await
    }

    pub async fn replace_realm_customers<S: AsRef<str>>(
        &self,
        realm_id: &str,
        customer_ids: &[S],
    ) -> Result<Option<Realm>> {
        let applied = self
            .memberships(EdgeTable::CustomerRealms, EdgeEnd::Right, realm_id, customer_ids, EdgeUpdate::Replace)
            .await?;
        self.realm_after(applied).await
    }

    pub async fn connect_user_realms<S: AsRef<str>>(
        &self,
        user_id: &str,
        realm_ids: &[S],
    ) -> Result<Option<User>> {
        let applied = self
            .memberships(EdgeTable::UserRealms, EdgeEnd::Left, user_id, realm_ids, EdgeUpdate::Connect)
            .await?;
        self.user_after(applied).await
    }

    pub async fn disconnect_user_realm(&self, user_id: &str, realm_id: &str) -> Result<Option<User>> {
        let applied = self
            .memberships(EdgeTable::UserRealms, EdgeEnd::Left, user_id, &[realm_id], EdgeUpdate::Disconnect)
            .await?;
        self.user_after(applied).await
    }

    pub async fn replace_user_realms<S: AsRef<str>>(
        &self,
        user_id: &str,
        realm_ids: &[S],
    ) -> Result<Option<User>> {
        let applied = self
            .memberships(EdgeTable::UserRealms, EdgeEnd::Left, user_id, realm_ids, EdgeUpdate::Replace)
            .await?;
        self.user_after(applied).await
    }

    pub async fn connect_customer_realms<S: AsRef<str>>(
        &self,
        customer_id: &str,
        realm_ids: &[S],
    ) -> Result<Option<Customer>> {
        let applied = self
            .memberships(EdgeTable::CustomerRealms, EdgeEnd::Left, customer_id, realm_ids, EdgeUpdate::Connect)
            .await?;
        self.customer_after(applied).await
    }

    pub async fn disconnect_customer_realm(
        &self,
        customer_id: &str,
        realm_id: &str,
    ) -> Result<Option<Customer>> {
        let applied = self
            .memberships(EdgeTable::CustomerRealms, EdgeEnd::Left, customer_id, &[realm_id], EdgeUpdate::Disconnect)
            .await?;
        self.customer_after(applied).await
    }

    pub async fn replace_customer_realms<S: AsRef<str>>(
        &self,
        customer_id: &str,
        realm_ids: &[S],
    ) -> Result<Option<Customer>> {
        let applied = self
            .memberships(EdgeTable::CustomerRealms, EdgeEnd::Left, customer_id, realm_ids, EdgeUpdate::Replace)
            .await?;
        self.customer_after(applied).await
    }
}
