//! Licensing entity persistence

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{SqliteConnection, SqlitePool};

use super::begin_write;
use crate::error::{AppError, Result};
use crate::licensing::types::{join_names, split_names};
use crate::licensing::{Customer, EntityId, EntityKind, Job, Realm, User};

/// Attempts at drawing a free id before giving up.
const MINT_ATTEMPTS: usize = 64;

// ============================================================================
// Join tables
// ============================================================================

/// A many-to-many join table, `left` and `right` named by entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTable {
    UserCustomers,
    UserJobs,
    UserRealms,
    CustomerRealms,
}

impl EdgeTable {
    fn table(self) -> &'static str {
        match self {
            EdgeTable::UserCustomers => "user_customers",
            EdgeTable::UserJobs => "user_jobs",
            EdgeTable::UserRealms => "user_realms",
            EdgeTable::CustomerRealms => "customer_realms",
        }
    }

    fn columns(self) -> (&'static str, &'static str) {
        match self {
            EdgeTable::UserCustomers => ("user_id", "customer_id"),
            EdgeTable::UserJobs => ("user_id", "job_id"),
            EdgeTable::UserRealms => ("user_id", "realm_id"),
            EdgeTable::CustomerRealms => ("customer_id", "realm_id"),
        }
    }

    pub fn kinds(self) -> (EntityKind, EntityKind) {
        match self {
            EdgeTable::UserCustomers => (EntityKind::User, EntityKind::Customer),
            EdgeTable::UserJobs => (EntityKind::User, EntityKind::Job),
            EdgeTable::UserRealms => (EntityKind::User, EntityKind::Realm),
            EdgeTable::CustomerRealms => (EntityKind::Customer, EntityKind::Realm),
        }
    }
}

/// Which end of a join table an id sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEnd {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpdate {
    Connect,
    Disconnect,
    Replace,
}

/// Ids on the right end of edges whose left end is `left`.
pub(crate) async fn edge_targets(
    conn: &mut SqliteConnection,
    edge: EdgeTable,
    left: &EntityId,
) -> Result<Vec<EntityId>> {
    let (l, r) = edge.columns();
    let sql = format!("SELECT {r} FROM {} WHERE {l} = ? ORDER BY {r}", edge.table());
    let ids = sqlx::query_scalar::<_, EntityId>(&sql)
        .bind(left)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

/// Ids on the left end of edges whose right end is `right`.
pub(crate) async fn edge_sources(
    conn: &mut SqliteConnection,
    edge: EdgeTable,
    right: &EntityId,
) -> Result<Vec<EntityId>> {
    let (l, r) = edge.columns();
    let sql = format!("SELECT {l} FROM {} WHERE {r} = ? ORDER BY {l}", edge.table());
    let ids = sqlx::query_scalar::<_, EntityId>(&sql)
        .bind(right)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

pub(crate) async fn insert_edge(
    conn: &mut SqliteConnection,
    edge: EdgeTable,
    left: &EntityId,
    right: &EntityId,
) -> Result<bool> {
    let (l, r) = edge.columns();
    let sql = format!("INSERT OR IGNORE INTO {} ({l}, {r}) VALUES (?, ?)", edge.table());
    let result = sqlx::query(&sql)
        .bind(left)
        .bind(right)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn delete_edge(
    conn: &mut SqliteConnection,
    edge: EdgeTable,
    left: &EntityId,
    right: &EntityId,
) -> Result<bool> {
    let (l, r) = edge.columns();
    let sql = format!("DELETE FROM {} WHERE {l} = ? AND {r} = ?", edge.table());
    let result = sqlx::query(&sql)
        .bind(left)
        .bind(right)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every edge touching `id` at the given end. Returns rows removed.
async fn delete_edges_of(
    conn: &mut SqliteConnection,
    edge: EdgeTable,
    end: EdgeEnd,
    id: &EntityId,
) -> Result<u64> {
    let (l, r) = edge.columns();
    let column = match end {
        EdgeEnd::Left => l,
        EdgeEnd::Right => r,
    };
    let sql = format!("DELETE FROM {} WHERE {column} = ?", edge.table());
    let result = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub(crate) async fn entity_exists(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &EntityId,
) -> Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", kind.table());
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

/// Draw an unused id from the kind's numeric band.
async fn mint_id(conn: &mut SqliteConnection, kind: EntityKind) -> Result<EntityId> {
    for _ in 0..MINT_ATTEMPTS {
        let n = rand::thread_rng().gen_range(kind.id_range());
        let candidate = EntityId::from_number(n);
        if !entity_exists(conn, kind, &candidate).await? {
            return Ok(candidate);
        }
    }
    Err(AppError::Internal(format!(
        "No free id found in {} after {} attempts",
        kind.table(),
        MINT_ATTEMPTS
    )))
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: EntityId,
    name: String,
    email: Option<String>,
    comment: Option<String>,
    roles: Option<String>,
    is_disabled: bool,
    created: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: EntityId,
    name: String,
    display_name: Option<String>,
    storage_key: String,
    comment: Option<String>,
    inactive: bool,
    created: String,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: EntityId,
    name: String,
    display_name: Option<String>,
    customer_id: Option<EntityId>,
    description: Option<String>,
    vartree_names: Option<String>,
    inactive: bool,
    created: String,
    last_update: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct RealmRow {
    id: EntityId,
    name: String,
    inactive: bool,
    created: String,
}

const USER_COLUMNS: &str = "id, name, email, comment, roles, is_disabled, created";
const CUSTOMER_COLUMNS: &str = "id, name, display_name, storage_key, comment, inactive, created";
const JOB_COLUMNS: &str = "id, name, display_name, customer_id, description, vartree_names, \
                           inactive, created, last_update";
const REALM_COLUMNS: &str = "id, name, inactive, created";

async fn hydrate_user(conn: &mut SqliteConnection, row: UserRow) -> Result<User> {
    Ok(User {
        customer_ids: edge_targets(conn, EdgeTable::UserCustomers, &row.id).await?,
        job_ids: edge_targets(conn, EdgeTable::UserJobs, &row.id).await?,
        realm_ids: edge_targets(conn, EdgeTable::UserRealms, &row.id).await?,
        name: row.name,
        email: row.email,
        comment: row.comment,
        roles: split_names(row.roles.as_deref()),
        is_disabled: row.is_disabled,
        created: parse_time(Some(&row.created)),
        id: Some(row.id),
    })
}

async fn hydrate_customer(conn: &mut SqliteConnection, row: CustomerRow) -> Result<Customer> {
    let job_ids = sqlx::query_scalar::<_, EntityId>(
        "SELECT id FROM jobs WHERE customer_id = ? ORDER BY id",
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Customer {
        user_ids: edge_sources(conn, EdgeTable::UserCustomers, &row.id).await?,
        realm_ids: edge_targets(conn, EdgeTable::CustomerRealms, &row.id).await?,
        job_ids,
        name: row.name,
        display_name: row.display_name,
        storage_key: row.storage_key,
        comment: row.comment,
        inactive: row.inactive,
        created: parse_time(Some(&row.created)),
        id: Some(row.id),
    })
}

async fn hydrate_job(conn: &mut SqliteConnection, row: JobRow) -> Result<Job> {
    Ok(Job {
        user_ids: edge_sources(conn, EdgeTable::UserJobs, &row.id).await?,
        name: row.name,
        display_name: row.display_name,
        customer_id: row.customer_id,
        description: row.description,
        vartree_names: split_names(row.vartree_names.as_deref()),
        inactive: row.inactive,
        created: parse_time(Some(&row.created)),
        last_update: parse_time(row.last_update.as_deref()),
        id: Some(row.id),
    })
}

async fn hydrate_realm(conn: &mut SqliteConnection, row: RealmRow) -> Result<Realm> {
    Ok(Realm {
        user_ids: edge_sources(conn, EdgeTable::UserRealms, &row.id).await?,
        customer_ids: edge_sources(conn, EdgeTable::CustomerRealms, &row.id).await?,
        name: row.name,
        inactive: row.inactive,
        created: parse_time(Some(&row.created)),
        id: Some(row.id),
    })
}

// ============================================================================
// Repository
// ============================================================================

/// Licensing repository
pub struct LicensingRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LicensingRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub async fn read_user(&self, id: &EntityId) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(hydrate_user(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn read_users_by_name(&self, name: &str) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE name = ? ORDER BY id");
        self.fetch_users(&sql, Some(name)).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY name, id");
        self.fetch_users(&sql, None).await
    }

    async fn fetch_users(&self, sql: &str, name: Option<&str>) -> Result<Vec<User>> {
        let mut conn = self.pool.acquire().await?;
        let mut query = sqlx::query_as::<_, UserRow>(sql);
        if let Some(name) = name {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&mut *conn).await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(hydrate_user(&mut conn, row).await?);
        }
        Ok(users)
    }

    /// Insert (no id) or update the scalar fields of a user. Grants and
    /// memberships are changed through the connect operations only.
    pub async fn update_user(&self, user: &User) -> Result<User> {
        let mut tx = begin_write(self.pool).await?;

        let id = match &user.id {
            None => {
                let id = mint_id(&mut tx, EntityKind::User).await?;
                sqlx::query(
                    r#"
                    INSERT INTO users (id, name, email, comment, roles, is_disabled, created)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.comment)
                .bind(join_names(&user.roles))
                .bind(user.is_disabled)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
                tracing::info!(user_id = %id, name = %user.name, "Created user");
                id
            }
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE users
                    SET name = ?, email = ?, comment = ?, roles = ?, is_disabled = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.comment)
                .bind(join_names(&user.roles))
                .bind(user.is_disabled)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(AppError::IdentityNotFound(format!(
                        "User Id {} does not exist",
                        id
                    )));
                }
                id.clone()
            }
        };

        tx.commit().await?;
        self.read_user(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch saved user".to_string()))
    }

    /// Delete a user and every edge touching it. Returns rows removed.
    pub async fn delete_user(&self, id: &EntityId) -> Result<u64> {
        let mut tx = begin_write(self.pool).await?;
        let mut removed = 0;
        for edge in [
            EdgeTable::UserCustomers,
            EdgeTable::UserJobs,
            EdgeTable::UserRealms,
        ] {
            removed += delete_edges_of(&mut tx, edge, EdgeEnd::Left, id).await?;
        }
        removed += sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::info!(user_id = %id, removed, "Deleted user");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Customers
    // ------------------------------------------------------------------------

    pub async fn read_customer(&self, id: &EntityId) -> Result<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?");
        let row = sqlx::query_as::<_, CustomerRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(hydrate_customer(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn read_customers_by_name(&self, name: &str) -> Result<Vec<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE name = ? ORDER BY id");
        self.fetch_customers(&sql, Some(name)).await
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY name, id");
        self.fetch_customers(&sql, None).await
    }

    async fn fetch_customers(&self, sql: &str, name: Option<&str>) -> Result<Vec<Customer>> {
        let mut conn = self.pool.acquire().await?;
        let mut query = sqlx::query_as::<_, CustomerRow>(sql);
        if let Some(name) = name {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&mut *conn).await?;

        let mut customers = Vec::with_capacity(rows.len());
        for row in rows {
            customers.push(hydrate_customer(&mut conn, row).await?);
        }
        Ok(customers)
    }

    pub async fn update_customer(&self, customer: &Customer) -> Result<Customer> {
        let mut tx = begin_write(self.pool).await?;

        let id = match &customer.id {
            None => {
                let id = mint_id(&mut tx, EntityKind::Customer).await?;
                sqlx::query(
                    r#"
                    INSERT INTO customers (id, name, display_name, storage_key, comment, inactive, created)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&customer.name)
                .bind(&customer.display_name)
                .bind(&customer.storage_key)
                .bind(&customer.comment)
                .bind(customer.inactive)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
                tracing::info!(customer_id = %id, name = %customer.name, "Created customer");
                id
            }
            Some(id) => {
                let result = sqlx::query(
                    r#"
                    UPDATE customers
                    SET name = ?, display_name = ?, storage_key = ?, comment = ?, inactive = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&customer.name)
                .bind(&customer.display_name)
                .bind(&customer.storage_key)
                .bind(&customer.comment)
                .bind(customer.inactive)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(AppError::CustomerNotFound(format!(
                        "Customer Id {} does not exist",
                        id
                    )));
                }
                id.clone()
            }
        };

        tx.commit().await?;
        self.read_customer(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch saved customer".to_string()))
    }

    /// Delete a customer and its edges. Child jobs are detached, or deleted
    /// with their edges when `remove_jobs` is set. Returns rows removed.
    pub async fn delete_customer(&self, id: &EntityId, remove_jobs: bool) -> Result<u64> {
        let mut tx = begin_write(self.pool).await?;
        let mut removed = 0;

        let job_ids = sqlx::query_scalar::<_, EntityId>("SELECT id FROM jobs WHERE customer_id = ?")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        if remove_jobs {
            for job in &job_ids {
                removed += delete_job_rows(&mut tx, job).await?;
            }
        } else {
            sqlx::query("UPDATE jobs SET customer_id = NULL WHERE customer_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        removed += delete_edges_of(&mut tx, EdgeTable::UserCustomers, EdgeEnd::Right, id).await?;
        removed += delete_edges_of(&mut tx, EdgeTable::CustomerRealms, EdgeEnd::Left, id).await?;
        removed += sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::info!(
            customer_id = %id,
            jobs = job_ids.len(),
            remove_jobs,
            removed,
            "Deleted customer"
        );
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    pub async fn read_job(&self, id: &EntityId) -> Result<Option<Job>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(hydrate_job(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn read_jobs_by_name(&self, name: &str) -> Result<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ? ORDER BY id");
        self.fetch_jobs(&sql, Some(name)).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY name, id");
        self.fetch_jobs(&sql, None).await
    }

    async fn fetch_jobs(&self, sql: &str, name: Option<&str>) -> Result<Vec<Job>> {
        let mut conn = self.pool.acquire().await?;
        let mut query = sqlx::query_as::<_, JobRow>(sql);
        if let Some(name) = name {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&mut *conn).await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(hydrate_job(&mut conn, row).await?);
        }
        Ok(jobs)
    }

    /// Insert or update a job. The parent customer is taken from the job on
    /// insert and kept as stored on update.
    pub async fn update_job(&self, job: &Job) -> Result<Job> {
        let mut tx = begin_write(self.pool).await?;
        let now = Utc::now().to_rfc3339();

        let id = match &job.id {
            None => {
                if let Some(customer) = &job.customer_id {
                    if !entity_exists(&mut tx, EntityKind::Customer, customer).await? {
                        return Err(AppError::CustomerNotFound(format!(
                            "Customer Id {} does not exist",
                            customer
                        )));
                    }
                }
                let id = mint_id(&mut tx, EntityKind::Job).await?;
                sqlx::query(
                    r#"
                    INSERT INTO jobs (id, name, display_name, customer_id, description,
                                      vartree_names, inactive, created, last_update)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&job.name)
                .bind(&job.display_name)
                .bind(&job.customer_id)
                .bind(&job.description)
                .bind(join_names(&job.vartree_names))
                .bind(job.inactive)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                tracing::info!(job_id = %id, name = %job.name, "Created job");
                id
            }
            Some(id) => {
                let stored_parent = sqlx::query_scalar::<_, Option<EntityId>>(
                    "SELECT customer_id FROM jobs WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::JobNotFound(format!("Job Id {} does not exist", id)))?;
                if stored_parent != job.customer_id {
                    tracing::warn!(
                        job_id = %id,
                        "Ignoring parent customer change on existing job"
                    );
                }

                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET name = ?, display_name = ?, description = ?, vartree_names = ?,
                        inactive = ?, last_update = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&job.name)
                .bind(&job.display_name)
                .bind(&job.description)
                .bind(join_names(&job.vartree_names))
                .bind(job.inactive)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id.clone()
            }
        };

        tx.commit().await?;
        self.read_job(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch saved job".to_string()))
    }

    // ------------------------------------------------------------------------
    // Realms
    // ------------------------------------------------------------------------

    pub async fn read_realm(&self, id: &EntityId) -> Result<Option<Realm>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {REALM_COLUMNS} FROM realms WHERE id = ?");
        let row = sqlx::query_as::<_, RealmRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(hydrate_realm(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn read_realms_by_name(&self, name: &str) -> Result<Vec<Realm>> {
        let sql = format!("SELECT {REALM_COLUMNS} FROM realms WHERE name = ? ORDER BY id");
        self.fetch_realms(&sql, Some(name)).await
    }

    pub async fn list_realms(&self) -> Result<Vec<Realm>> {
        let sql = format!("SELECT {REALM_COLUMNS} FROM realms ORDER BY name, id");
        self.fetch_realms(&sql, None).await
    }

    async fn fetch_realms(&self, sql: &str, name: Option<&str>) -> Result<Vec<Realm>> {
        let mut conn = self.pool.acquire().await?;
        let mut query = sqlx::query_as::<_, RealmRow>(sql);
        if let Some(name) = name {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&mut *conn).await?;

        let mut realms = Vec::with_capacity(rows.len());
        for row in rows {
            realms.push(hydrate_realm(&mut conn, row).await?);
        }
        Ok(realms)
    }

    pub async fn update_realm(&self, realm: &Realm) -> Result<Realm> {
        let mut tx = begin_write(self.pool).await?;

        let id = match &realm.id {
            None => {
                let id = mint_id(&mut tx, EntityKind::Realm).await?;
                sqlx::query("INSERT INTO realms (id, name, inactive, created) VALUES (?, ?, ?, ?)")
                    .bind(&id)
                    .bind(&realm.name)
                    .bind(realm.inactive)
                    .bind(Utc::now().to_rfc3339())
                    .execute(&mut *tx)
                    .await?;
                tracing::info!(realm_id = %id, name = %realm.name, "Created realm");
                id
            }
            Some(id) => {
                let result = sqlx::query("UPDATE realms SET name = ?, inactive = ? WHERE id = ?")
                    .bind(&realm.name)
                    .bind(realm.inactive)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(AppError::IdentityNotFound(format!(
                        "Realm Id {} does not exist",
                        id
                    )));
                }
                id.clone()
            }
        };

        tx.commit().await?;
        self.read_realm(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch saved realm".to_string()))
    }

    pub async fn delete_realm(&self, id: &EntityId) -> Result<u64> {
        let mut tx = begin_write(self.pool).await?;
        let mut removed = 0;
        removed += delete_edges_of(&mut tx, EdgeTable::UserRealms, EdgeEnd::Right, id).await?;
        removed += delete_edges_of(&mut tx, EdgeTable::CustomerRealms, EdgeEnd::Right, id).await?;
        removed += sqlx::query("DELETE FROM realms WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        tracing::info!(realm_id = %id, removed, "Deleted realm");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------------

    /// Plain set update of the edges at one end of a join table. Targets that
    /// do not exist are skipped. Returns false when `anchor` does not exist.
    pub async fn update_edges(
        &self,
        edge: EdgeTable,
        end: EdgeEnd,
        anchor: &EntityId,
        targets: &[EntityId],
        update: EdgeUpdate,
    ) -> Result<bool> {
        let (left_kind, right_kind) = edge.kinds();
        let (anchor_kind, target_kind) = match end {
            EdgeEnd::Left => (left_kind, right_kind),
            EdgeEnd::Right => (right_kind, left_kind),
        };

        let mut tx = begin_write(self.pool).await?;
        if !entity_exists(&mut tx, anchor_kind, anchor).await? {
            return Ok(false);
        }

        if update == EdgeUpdate::Replace {
            delete_edges_of(&mut tx, edge, end, anchor).await?;
        }

        for target in targets {
            let (left, right) = match end {
                EdgeEnd::Left => (anchor, target),
                EdgeEnd::Right => (target, anchor),
            };
            match update {
                EdgeUpdate::Connect | EdgeUpdate::Replace => {
                    if entity_exists(&mut tx, target_kind, target).await? {
                        insert_edge(&mut tx, edge, left, right).await?;
                    }
                }
                EdgeUpdate::Disconnect => {
                    delete_edge(&mut tx, edge, left, right).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(true)
    }
}

/// Delete a job row and its grants. Returns rows removed.
pub(crate) async fn delete_job_rows(conn: &mut SqliteConnection, id: &EntityId) -> Result<u64> {
    let mut removed = delete_edges_of(conn, EdgeTable::UserJobs, EdgeEnd::Right, id).await?;
    removed += sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    #[tokio::test]
    async fn test_user_lifecycle() {
        let pool = create_memory_pool().await.unwrap();
        let repo = LicensingRepository::new(&pool);

        let created = repo
            .update_user(&User {
                name: "alice".to_string(),
                roles: vec!["admin".to_string(), "ops".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        let id = created.id.clone().unwrap();
        let n: u32 = id.as_str().parse().unwrap();
        assert!(EntityKind::User.id_range().contains(&n));
        assert!(created.created.is_some());
        assert_eq!(created.roles, vec!["admin", "ops"]);

        let renamed = repo
            .update_user(&User {
                name: "alice2".to_string(),
                ..created.clone()
            })
            .await
            .unwrap();
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.name, "alice2");
        assert_eq!(repo.read_users_by_name("alice2").await.unwrap().len(), 1);

        assert_eq!(repo.delete_user(&id).await.unwrap(), 1);
        assert!(repo.read_user(&id).await.unwrap().is_none());
        assert_eq!(repo.delete_user(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_ids() {
        let pool = create_memory_pool().await.unwrap();
        let repo = LicensingRepository::new(&pool);
        let ghost = Some(EntityId::from_number(12_345_678));

        let err = repo
            .update_user(&User {
                id: ghost.clone(),
                name: "x".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdentityNotFound(_)));

        let err = repo
            .update_customer(&Customer {
                id: ghost.clone(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CustomerNotFound(_)));

        let err = repo
            .update_job(&Job {
                id: ghost,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_customer_detaches_or_removes_jobs() {
        let pool = create_memory_pool().await.unwrap();
        let repo = LicensingRepository::new(&pool);

        let customer = repo
            .update_customer(&Customer {
                name: "acme".to_string(),
                storage_key: "memory:".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let customer_id = customer.id.clone().unwrap();
        let job = repo
            .update_job(&Job {
                name: "survey".to_string(),
                customer_id: Some(customer_id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        let job_id = job.id.clone().unwrap();
        assert_eq!(
            repo.read_customer(&customer_id).await.unwrap().unwrap().job_ids,
            vec![job_id.clone()]
        );

        repo.delete_customer(&customer_id, false).await.unwrap();
        let detached = repo.read_job(&job_id).await.unwrap().unwrap();
        assert_eq!(detached.customer_id, None);

        let other = repo
            .update_customer(&Customer {
                name: "globex".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let other_id = other.id.clone().unwrap();
        let doomed = repo
            .update_job(&Job {
                name: "doomed".to_string(),
                customer_id: Some(other_id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        let removed = repo.delete_customer(&other_id, true).await.unwrap();
        assert_eq!(removed, 2);
        assert!(repo
            .read_job(doomed.id.as_ref().unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_job_parent_is_fixed() {
        let pool = create_memory_pool().await.unwrap();
        let repo = LicensingRepository::new(&pool);

        let err = repo
            .update_job(&Job {
                name: "stray".to_string(),
                customer_id: Some(EntityId::from_number(30_000_000)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CustomerNotFound(_)));

        let job = repo
            .update_job(&Job {
                name: "orphan".to_string(),
                vartree_names: vec!["age".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        let customer = repo
            .update_customer(&Customer {
                name: "acme".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = repo
            .update_job(&Job {
                customer_id: customer.id.clone(),
                description: Some("now described".to_string()),
                ..job.clone()
            })
            .await
            .unwrap();
        assert_eq!(updated.customer_id, None);
        assert_eq!(updated.description.as_deref(), Some("now described"));
        assert_eq!(updated.vartree_names, vec!["age"]);
        assert!(updated.last_update.is_some());
    }

    #[tokio::test]
    async fn test_update_edges() {
        let pool = create_memory_pool().await.unwrap();
        let repo = LicensingRepository::new(&pool);

        let realm = repo
            .update_realm(&Realm {
                name: "emea".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let realm_id = realm.id.clone().unwrap();
        let user = repo
            .update_user(&User {
                name: "bob".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let user_id = user.id.clone().unwrap();
        let ghost = EntityId::from_number(1);

        let applied = repo
            .update_edges(
                EdgeTable::UserRealms,
                EdgeEnd::Right,
                &realm_id,
                &[user_id.clone(), ghost.clone()],
                EdgeUpdate::Connect,
            )
            .await
            .unwrap();
        assert!(applied);
        let realm = repo.read_realm(&realm_id).await.unwrap().unwrap();
        assert_eq!(realm.user_ids, vec![user_id.clone()]);
        let user = repo.read_user(&user_id).await.unwrap().unwrap();
        assert_eq!(user.realm_ids, vec![realm_id.clone()]);

        repo.update_edges(
            EdgeTable::UserRealms,
            EdgeEnd::Left,
            &user_id,
            &[],
            EdgeUpdate::Replace,
        )
        .await
        .unwrap();
        let realm = repo.read_realm(&realm_id).await.unwrap().unwrap();
        assert!(realm.user_ids.is_empty());

        let missing = repo
            .update_edges(
                EdgeTable::UserRealms,
                EdgeEnd::Left,
                &ghost,
                &[realm_id],
                EdgeUpdate::Connect,
            )
            .await
            .unwrap();
        assert!(!missing);
    }
}
