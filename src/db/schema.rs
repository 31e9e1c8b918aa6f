//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Accounts
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    comment TEXT,
    roles TEXT,
    is_disabled INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_name ON users(name);

-- Tenants; storage_key locates the object-storage namespace
CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    display_name TEXT,
    storage_key TEXT NOT NULL DEFAULT '',
    comment TEXT,
    inactive INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_customers_name ON customers(name);

-- Work units; customer_id is NULL for orphaned jobs
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    display_name TEXT,
    customer_id TEXT,
    description TEXT,
    vartree_names TEXT,
    inactive INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL,
    last_update TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_name ON jobs(name);
CREATE INDEX IF NOT EXISTS idx_jobs_customer_id ON jobs(customer_id);

-- Visibility scopes
CREATE TABLE IF NOT EXISTS realms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    inactive INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_realms_name ON realms(name);

-- Blanket grants
CREATE TABLE IF NOT EXISTS user_customers (
    user_id TEXT NOT NULL,
    customer_id TEXT NOT NULL,
    PRIMARY KEY (user_id, customer_id)
);

CREATE INDEX IF NOT EXISTS idx_user_customers_customer ON user_customers(customer_id);

-- Specific grants
CREATE TABLE IF NOT EXISTS user_jobs (
    user_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    PRIMARY KEY (user_id, job_id)
);

CREATE INDEX IF NOT EXISTS idx_user_jobs_job ON user_jobs(job_id);

-- Realm memberships
CREATE TABLE IF NOT EXISTS user_realms (
    user_id TEXT NOT NULL,
    realm_id TEXT NOT NULL,
    PRIMARY KEY (user_id, realm_id)
);

CREATE INDEX IF NOT EXISTS idx_user_realms_realm ON user_realms(realm_id);

CREATE TABLE IF NOT EXISTS customer_realms (
    customer_id TEXT NOT NULL,
    realm_id TEXT NOT NULL,
    PRIMARY KEY (customer_id, realm_id)
);

CREATE INDEX IF NOT EXISTS idx_customer_realms_realm ON customer_realms(realm_id);
"#;
