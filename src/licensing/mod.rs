//! Licensing domain
//!
//! Users, Customers, Jobs and Realms, the access grants between them and the
//! rules that keep those grants in canonical form.

pub mod graph;
pub mod normalizer;
mod provider;
pub mod realm;
pub mod types;

pub use graph::{AccessGraph, Grant, GrantChanges, UserGrants};
pub use provider::LicensingProvider;
pub use realm::RealmScope;
pub use types::{Customer, EntityId, EntityKind, Job, Realm, User};
