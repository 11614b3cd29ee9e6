//! Realm reporting types

use serde::Serialize;

/// Point-in-time snapshot reported by [`LdapRealm::usage_stats`](crate::LdapRealm::usage_stats)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealmUsageStats {
    pub name: String,
    pub order: i32,
    /// Cached authentication results
    pub size: usize,
    /// `ldaps://` URLs or STARTTLS
    pub ssl: bool,
    /// Users are found by search rather than DN templates
    pub user_search: bool,
    pub load_balance_type: &'static str,
}
