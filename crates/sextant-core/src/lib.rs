//! Sextant Core Library
//!
//! Core types, settings, and utilities shared by Sextant authentication realms.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{LdapRealmSettings, SextantConfig};
pub use error::{Error, Result};
pub use types::{AuthenticationResult, AuthenticationStatus, Credential, User};

/// Sextant version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every realm setting key, as reported in configuration errors
pub const REALM_SETTINGS_PREFIX: &str = "sextant.security.realms";

/// Metadata key holding the DN the user was bound as
pub const METADATA_LDAP_DN: &str = "ldap_dn";

/// Metadata key holding the raw group DNs of the user
pub const METADATA_LDAP_GROUPS: &str = "ldap_groups";
