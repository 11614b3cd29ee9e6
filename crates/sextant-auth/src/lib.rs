//! LDAP authentication realm for Sextant

pub mod cache;
pub mod error;
pub mod ldap;
pub mod roles;

pub use cache::AuthenticationCache;
pub use error::{ConfigError, DirectoryError, RealmError, RealmResult, RoleMappingError};
pub use ldap::{BindStrategy, LdapConnector, LdapRealm, RealmUsageStats, AUTHENTICATE_FAILED};
pub use roles::{DnRoleMapper, RoleMapping, RoleMappingWatcher};
