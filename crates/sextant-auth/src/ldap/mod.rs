//! LDAP realm
//!
//! Authenticates users against a directory by binding either with a DN built
//! from a template or with the DN found by a user search, then resolves
//! roles from group membership and the static role mapping.
//!
//! Features:
//! - Template and search-then-bind strategies
//! - Group search or `memberOf` group resolution
//! - Single-flight credential caching
//! - Failover / round-robin over several servers, LDAPS and STARTTLS

mod client;
mod directory;
mod groups;
mod realm;
mod roles;
mod session_factory;
mod template;
mod types;
mod user_search;

#[cfg(test)]
pub(crate) mod testing;

pub use client::LdapConnector;
pub use directory::{
    Directory, DirectoryConnection, DirectoryConnector, DirectoryEntry, DirectoryHandle,
    LdapSession, SearchRequest, NO_ATTRIBUTES,
};
pub use groups::GroupResolver;
pub use realm::{LdapRealm, AUTHENTICATE_FAILED};
pub use roles::RoleResolver;
pub use session_factory::{BindStrategy, SessionFactory};
pub use template::TemplateSessionFactory;
pub use types::RealmUsageStats;
pub use user_search::{ServiceAccount, ServiceConnections, ServiceLease, UserSearchSessionFactory};
