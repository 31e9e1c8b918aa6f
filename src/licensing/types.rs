//! Licensing entities: Users, Customers, Jobs and Realms

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};

/// Opaque stable identifier of a licensing entity.
///
/// The reference store mints numeric ids, so anything that is not a run of
/// ASCII digits is rejected as badly formatted before it reaches a query.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::IdentityBadFormat(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parse a list of ids, failing on the first malformed one.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Self>> {
        raw.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    pub fn from_number(n: u32) -> Self {
        Self(n.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity kinds, each minting ids from its own numeric band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Job,
    Customer,
    Realm,
}

impl EntityKind {
    pub fn id_range(self) -> std::ops::Range<u32> {
        match self {
            EntityKind::User => 10_000_000..20_000_000,
            EntityKind::Job => 20_000_000..30_000_000,
            EntityKind::Customer => 30_000_000..40_000_000,
            EntityKind::Realm => 70_000_000..80_000_000,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Job => "jobs",
            EntityKind::Customer => "customers",
            EntityKind::Realm => "realms",
        }
    }
}

/// An account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// `None` on input means "create a new user"
    pub id: Option<EntityId>,
    pub name: String,
    pub email: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_disabled: bool,
    pub created: Option<DateTime<Utc>>,

    /// Blanket grants
    #[serde(default)]
    pub customer_ids: Vec<EntityId>,
    /// Specific grants
    #[serde(default)]
    pub job_ids: Vec<EntityId>,
    #[serde(default)]
    pub realm_ids: Vec<EntityId>,
}

/// A tenant. The storage key locates its object-storage namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Option<EntityId>,
    pub name: String,
    pub display_name: Option<String>,
    pub storage_key: String,
    pub comment: Option<String>,
    #[serde(default)]
    pub inactive: bool,
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub user_ids: Vec<EntityId>,
    #[serde(default)]
    pub job_ids: Vec<EntityId>,
    #[serde(default)]
    pub realm_ids: Vec<EntityId>,
}

/// A work unit. Its name is also the name of its storage container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Option<EntityId>,
    pub name: String,
    pub display_name: Option<String>,
    /// Parent customer, `None` when orphaned
    pub customer_id: Option<EntityId>,
    pub description: Option<String>,
    #[serde(default)]
    pub vartree_names: Vec<String>,
    #[serde(default)]
    pub inactive: bool,
    pub created: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,

    #[serde(default)]
    pub user_ids: Vec<EntityId>,
}

/// A visibility scope for listing users and customers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Realm {
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub user_ids: Vec<EntityId>,
    #[serde(default)]
    pub customer_ids: Vec<EntityId>,
}

/// Join a list of names the way they are persisted (space separated).
pub(crate) fn join_names(names: &[String]) -> Option<String> {
    if names.is_empty() {
        None
    } else {
        Some(names.join(" "))
    }
}

/// Split a persisted name list, tolerating legacy comma/semicolon separators.
pub(crate) fn split_names(joined: Option<&str>) -> Vec<String> {
    joined
        .map(|s| {
            s.split([',', ';', ' '])
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_id() {
        assert_eq!(EntityId::parse("10000335").unwrap().as_str(), "10000335");
        assert_eq!(EntityId::parse(" 42 ").unwrap().as_str(), "42");
        assert!(matches!(
            EntityId::parse("abc"),
            Err(AppError::IdentityBadFormat(_))
        ));
        assert!(EntityId::parse("").is_err());
        assert!(EntityId::parse("-5").is_err());
    }

    #[test]
    fn test_parse_all_fails_on_first_bad_id() {
        let ids = EntityId::parse_all(&["1", "2"]).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(EntityId::parse_all(&["1", "x2"]).is_err());
    }

    #[test]
    fn test_name_lists() {
        let names = vec!["age".to_string(), "region".to_string()];
        let joined = join_names(&names);
        assert_eq!(joined.as_deref(), Some("age region"));
        assert_eq!(split_names(joined.as_deref()), names);
        assert_eq!(split_names(Some("a,b; c")), vec!["a", "b", "c"]);
        assert!(join_names(&[]).is_none());
    }
}
