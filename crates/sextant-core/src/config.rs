//! Configuration for Sextant

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::REALM_SETTINGS_PREFIX;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SextantConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub realms: Vec<LdapRealmSettings>,
}

impl SextantConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| crate::Error::ConfigRead {
            path: path.to_string(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(level) = std::env::var("SEXTANT_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate every realm and reject duplicate realm names
    pub fn validate(&self) -> crate::Result<()> {
        let mut names = HashSet::new();
        for realm in &self.realms {
            if !names.insert(realm.name.as_str()) {
                return Err(crate::Error::DuplicateRealm(realm.name.clone()));
            }
            realm.validate()?;
        }
        Ok(())
    }

    pub fn realm(&self, name: &str) -> Option<&LdapRealmSettings> {
        self.realms.iter().find(|r| r.name == name)
    }

    /// Enabled realms in chain order
    pub fn ordered_realms(&self) -> Vec<&LdapRealmSettings> {
        let mut realms: Vec<_> = self.realms.iter().filter(|r| r.enabled).collect();
        realms.sort_by_key(|r| r.order);
        realms
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ============================================================================
// LDAP realm settings
// ============================================================================

/// Settings of a single LDAP realm
#[derive(Debug, Clone, Deserialize)]
pub struct LdapRealmSettings {
    /// Realm name, unique within the chain
    pub name: String,

    /// Position of the realm in the chain; lower runs first
    #[serde(default)]
    pub order: i32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory URLs (ldap:// or ldaps://)
    pub urls: Vec<String>,

    /// How connections are spread over `urls`
    #[serde(default)]
    pub load_balance: LoadBalanceType,

    /// Upgrade plain connections with STARTTLS
    #[serde(default)]
    pub start_tls: bool,

    /// DN templates; `{0}` is replaced by the escaped username
    /// Example: "cn={0},ou=people,o=sevenSeas"
    #[serde(default)]
    pub user_dn_templates: Option<Vec<String>>,

    /// Search for the user entry, then bind as it
    #[serde(default)]
    pub user_search: Option<UserSearchSettings>,

    /// Service account used for user searches; anonymous when absent
    #[serde(default)]
    pub bind_dn: Option<String>,

    #[serde(default)]
    pub bind_password: Option<SecretString>,

    /// Group search; when absent, groups are read from the user entry
    #[serde(default)]
    pub group_search: Option<GroupSearchSettings>,

    /// User entry attribute listing group DNs
    #[serde(default = "default_user_group_attribute")]
    pub user_group_attribute: String,

    /// How a group DN becomes a role name
    #[serde(default)]
    pub group_role_name: GroupRoleNaming,

    /// YAML file mapping roles to user and group DNs
    #[serde(default)]
    pub role_mapping_file: Option<PathBuf>,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub ssl: SslSettings,

    #[serde(default)]
    pub timeout: TimeoutSettings,
}

fn default_true() -> bool {
    true
}

fn default_user_group_attribute() -> String {
    "memberOf".to_string()
}

impl LdapRealmSettings {
    /// Minimal settings for a realm; callers fill in the bind strategy
    pub fn new(name: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            order: 0,
            enabled: true,
            urls,
            load_balance: LoadBalanceType::default(),
            start_tls: false,
            user_dn_templates: None,
            user_search: None,
            bind_dn: None,
            bind_password: None,
            group_search: None,
            user_group_attribute: default_user_group_attribute(),
            group_role_name: GroupRoleNaming::default(),
            role_mapping_file: None,
            cache: CacheSettings::default(),
            ssl: SslSettings::default(),
            timeout: TimeoutSettings::default(),
        }
    }

    /// Fully qualified key of a realm setting, as shown in errors
    pub fn setting_key(&self, key: &str) -> String {
        format!("{}.{}.{}", REALM_SETTINGS_PREFIX, self.name, key)
    }

    pub fn has_user_templates(&self) -> bool {
        self.user_dn_templates.is_some()
    }

    pub fn has_user_search(&self) -> bool {
        self.user_search.is_some()
    }

    /// Whether any URL is `ldaps://` or STARTTLS is requested
    pub fn uses_tls(&self) -> bool {
        self.start_tls
            || self
                .urls
                .iter()
                .any(|url| url.to_ascii_lowercase().starts_with("ldaps://"))
    }

    /// Validate values; bind strategy selection is checked by the realm itself
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::invalid_setting(
                REALM_SETTINGS_PREFIX,
                "realm name is required",
            ));
        }

        if self.urls.is_empty() {
            return Err(crate::Error::invalid_setting(
                self.setting_key("urls"),
                "at least one URL is required",
            ));
        }

        for url in &self.urls {
            let lower = url.to_ascii_lowercase();
            if !lower.starts_with("ldap://") && !lower.starts_with("ldaps://") {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("urls"),
                    format!("URL must start with ldap:// or ldaps://, got {}", url),
                ));
            }
        }

        if let Some(templates) = &self.user_dn_templates {
            if templates.is_empty() {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("user_dn_templates"),
                    "at least one template is required",
                ));
            }
            if let Some(bad) = templates.iter().find(|t| !t.contains("{0}")) {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("user_dn_templates"),
                    format!("template must contain {{0}} placeholder, got {}", bad),
                ));
            }
        }

        if let Some(search) = &self.user_search {
            if !search.filter.contains("{0}") {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("user_search.filter"),
                    "filter must contain {0} placeholder",
                ));
            }
            if search.pool.enabled && search.pool.size == 0 {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("user_search.pool.size"),
                    "pool size must be greater than zero",
                ));
            }
        }

        if self.bind_password.is_some() && self.bind_dn.is_none() {
            return Err(crate::Error::invalid_setting(
                self.setting_key("bind_password"),
                "bind_password requires bind_dn",
            ));
        }

        if let Some(groups) = &self.group_search {
            if groups.base_dn.trim().is_empty() && groups.scope == SearchScope::Base {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("group_search.base_dn"),
                    "an empty base DN cannot be searched with base scope",
                ));
            }
        }

        if let GroupRoleNaming::Attribute(attr) = &self.group_role_name {
            if attr.trim().is_empty() {
                return Err(crate::Error::invalid_setting(
                    self.setting_key("group_role_name.attribute"),
                    "attribute name is required",
                ));
            }
        }

        if self.cache.max_users == 0 {
            return Err(crate::Error::invalid_setting(
                self.setting_key("cache.max_users"),
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Directory search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Only the named entry
    Base,
    /// Immediate children of the base
    OneLevel,
    /// The base and all descendants
    #[default]
    SubTree,
}

/// URL selection across multiple directory servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceType {
    /// Always start from the first URL
    #[default]
    Failover,
    /// Rotate the starting URL on every connection
    RoundRobin,
}

impl LoadBalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceType::Failover => "failover",
            LoadBalanceType::RoundRobin => "round_robin",
        }
    }
}

/// User search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSearchSettings {
    /// Base DN; empty searches from the root
    #[serde(default)]
    pub base_dn: String,

    #[serde(default)]
    pub scope: SearchScope,

    /// `{0}` is replaced by the escaped username
    #[serde(default = "default_user_search_filter")]
    pub filter: String,

    #[serde(default)]
    pub pool: PoolSettings,
}

fn default_user_search_filter() -> String {
    "(uid={0})".to_string()
}

impl Default for UserSearchSettings {
    fn default() -> Self {
        Self {
            base_dn: String::new(),
            scope: SearchScope::default(),
            filter: default_user_search_filter(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool for the user search phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_pool_size")]
    pub size: usize,
}

fn default_pool_size() -> usize {
    20
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size: default_pool_size(),
        }
    }
}

/// Group search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSearchSettings {
    #[serde(default)]
    pub base_dn: String,

    #[serde(default)]
    pub scope: SearchScope,

    /// `{0}` is replaced by the user DN and `{1}` by the username
    #[serde(default = "default_group_search_filter")]
    pub filter: String,
}

fn default_group_search_filter() -> String {
    "(|(&(objectClass=groupOfNames)(member={0}))(&(objectClass=groupOfUniqueNames)(uniqueMember={0}))(&(objectClass=group)(member={0})))".to_string()
}

impl GroupSearchSettings {
    pub fn new(base_dn: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: default_group_search_filter(),
        }
    }
}

/// Rule turning a group DN into a role name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupRoleNaming {
    /// Value of the leading RDN, e.g. `cn=HMS Victory,...` -> `HMS Victory`
    #[default]
    LeadingRdn,
    /// Value of the most specific RDN with this attribute type
    Attribute(String),
    /// The group DN itself
    Dn,
    /// Groups only grant roles through the role mapping file
    None,
}

/// Authentication cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entry lifetime in seconds; zero or negative disables caching
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: i64,

    #[serde(default = "default_cache_max_users")]
    pub max_users: usize,
}

fn default_cache_ttl() -> i64 {
    1200 // 20 minutes
}

fn default_cache_max_users() -> usize {
    100_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
            max_users: default_cache_max_users(),
        }
    }
}

impl CacheSettings {
    pub fn enabled(&self) -> bool {
        self.ttl_seconds > 0
    }

    pub fn ttl(&self) -> Option<std::time::Duration> {
        u64::try_from(self.ttl_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(std::time::Duration::from_secs)
    }
}

/// TLS settings; certificate handling itself is delegated to the TLS stack
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SslSettings {
    #[serde(default)]
    pub verification_mode: VerificationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Verify the certificate chain and the hostname
    #[default]
    Full,
    /// Verify the certificate chain only
    Certificate,
    /// No verification (not recommended for production)
    None,
}

/// Directory timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_tcp_connect")]
    pub tcp_connect_seconds: u64,

    #[serde(default = "default_ldap_search")]
    pub ldap_search_seconds: u64,
}

fn default_tcp_connect() -> u64 {
    5
}

fn default_ldap_search() -> u64 {
    5
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            tcp_connect_seconds: default_tcp_connect(),
            ldap_search_seconds: default_ldap_search(),
        }
    }
}

impl TimeoutSettings {
    pub fn connect(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tcp_connect_seconds)
    }

    pub fn operation(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ldap_search_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[[realms]]
name = "sea"
order = 2
urls = ["ldap://ldap.sevenseas.test:389", "ldaps://backup.sevenseas.test:636"]
load_balance = "round_robin"
user_dn_templates = ["cn={0},ou=people,o=sevenSeas"]
role_mapping_file = "/etc/sextant/role_mapping.yml"
group_role_name = { attribute = "ou" }

[realms.group_search]
base_dn = "ou=crews,ou=groups,o=sevenSeas"
scope = "one_level"

[realms.cache]
ttl_seconds = -1

[[realms]]
name = "search"
urls = ["ldap://ldap.sevenseas.test"]
bind_dn = "cn=service,o=sevenSeas"
bind_password = "hunter2"

[realms.user_search]
base_dn = ""
"#;

    #[test]
    fn test_parse_config() {
        let config = SextantConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.realms.len(), 2);

        let sea = config.realm("sea").unwrap();
        assert_eq!(sea.order, 2);
        assert_eq!(sea.load_balance, LoadBalanceType::RoundRobin);
        assert!(sea.has_user_templates());
        assert!(!sea.has_user_search());
        assert!(sea.uses_tls());
        assert_eq!(sea.group_role_name, GroupRoleNaming::Attribute("ou".into()));
        let groups = sea.group_search.as_ref().unwrap();
        assert_eq!(groups.scope, SearchScope::OneLevel);
        assert!(!sea.cache.enabled());
        assert_eq!(sea.cache.ttl(), None);

        let search = config.realm("search").unwrap();
        let user_search = search.user_search.as_ref().unwrap();
        assert_eq!(user_search.base_dn, "");
        assert_eq!(user_search.scope, SearchScope::SubTree);
        assert_eq!(user_search.filter, "(uid={0})");
        assert!(user_search.pool.enabled);
        assert_eq!(search.cache.ttl(), Some(std::time::Duration::from_secs(1200)));
        assert_eq!(search.user_group_attribute, "memberOf");
        assert!(!search.uses_tls());
    }

    #[test]
    fn test_partial_logging_table() {
        let config = SextantConfig::from_toml_str("[logging]\nformat = \"json\"\n").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
        assert!(config.realms.is_empty());
    }

    #[test]
    fn test_ordered_realms() {
        let config = SextantConfig::from_toml_str(SAMPLE).unwrap();
        let names: Vec<_> = config.ordered_realms().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["search", "sea"]);
    }

    #[test]
    fn test_duplicate_realm_rejected() {
        let toml = r#"
[[realms]]
name = "a"
urls = ["ldap://x"]
[[realms]]
name = "a"
urls = ["ldap://y"]
"#;
        let err = SextantConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, crate::Error::DuplicateRealm(name) if name == "a"));
    }

    #[test]
    fn test_realm_validation() {
        let mut realm = LdapRealmSettings::new("sea", vec![]);
        assert!(realm.validate().is_err());

        realm.urls = vec!["http://nope".to_string()];
        let err = realm.validate().unwrap_err().to_string();
        assert!(err.contains("sextant.security.realms.sea.urls"));

        realm.urls = vec!["ldap://localhost:389".to_string()];
        realm.user_dn_templates = Some(vec!["cn=fixed,o=sevenSeas".to_string()]);
        assert!(realm.validate().is_err());

        realm.user_dn_templates = Some(vec!["cn={0},o=sevenSeas".to_string()]);
        assert!(realm.validate().is_ok());

        realm.group_search = Some(GroupSearchSettings::new("", SearchScope::Base));
        assert!(realm.validate().is_err());

        realm.group_search = Some(GroupSearchSettings::new("", SearchScope::SubTree));
        assert!(realm.validate().is_ok());
    }

    #[test]
    fn test_setting_key() {
        let realm = LdapRealmSettings::new("ldap1", vec!["ldap://x".into()]);
        assert_eq!(
            realm.setting_key("user_dn_templates"),
            "sextant.security.realms.ldap1.user_dn_templates"
        );
    }
}
