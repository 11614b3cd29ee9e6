//! In-memory directory for tests
//!
//! Holds a small `o=sevenSeas` tree, evaluates the filter subset the realm
//! produces (`&`, `|`, `!`, equality, presence), counts binds and open
//! connections, and can be made slow or unreachable.

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use sextant_core::config::SearchScope;
use sextant_core::utils::{dn_equals, normalize_dn, parent_dn, unescape_value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::DirectoryError;
use crate::ldap::directory::{DirectoryConnection, DirectoryConnector, DirectoryEntry, SearchRequest};

pub const SEVEN_SEAS_PASSWORD: &str = "pass";
pub const HARDY: &str = "Thomas Masterman Hardy";
pub const HARDY_DN: &str = "cn=Thomas Masterman Hardy,ou=people,o=sevenSeas";
pub const HORNBLOWER: &str = "Horatio Hornblower";
pub const HORNBLOWER_DN: &str = "cn=Horatio Hornblower,ou=people,o=sevenSeas";
pub const VICTORY_DN: &str = "cn=HMS Victory,ou=crews,ou=groups,o=sevenSeas";
pub const LYDIA_DN: &str = "cn=HMS Lydia,ou=crews,ou=groups,o=sevenSeas";
pub const SERVICE_DN: &str = "cn=Service Account,o=sevenSeas";
pub const SERVICE_PASSWORD: &str = "service-pass";
pub const USER_TEMPLATE: &str = "cn={0},ou=people,o=sevenSeas";

#[derive(Default)]
struct State {
    entries: Mutex<Vec<DirectoryEntry>>,
    passwords: Mutex<HashMap<String, String>>,
    bind_log: Mutex<Vec<String>>,
    connect_delay: Mutex<Option<Duration>>,
    operation_delay: Mutex<Option<Duration>>,
    unreachable: Mutex<Option<String>>,
    failing_search: Mutex<bool>,
    endpoints: AtomicUsize,
    open: AtomicUsize,
    unbinds: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<State>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixture tree shared by the realm tests
    pub fn seven_seas() -> Self {
        let directory = Self::new();
        directory.add_entry(DirectoryEntry::new("o=sevenSeas").with_attribute("objectClass", ["organization"]));
        directory.add_entry(DirectoryEntry::new("ou=people,o=sevenSeas").with_attribute("objectClass", ["organizationalUnit"]));
        directory.add_user(HARDY_DN, "hardy", &[VICTORY_DN]);
        directory.add_user(HORNBLOWER_DN, "hhornblo", &[LYDIA_DN]);
        directory.add_user("cn=William Bush,ou=people,o=sevenSeas", "wbush", &[LYDIA_DN]);
        directory.add_user("cn=John Smith,ou=people,o=sevenSeas", "smith", &[]);
        directory.add_user("cn=Jane Smith,ou=people,o=sevenSeas", "smith", &[]);
        directory.add_entry(DirectoryEntry::new("ou=groups,o=sevenSeas").with_attribute("objectClass", ["organizationalUnit"]));
        directory.add_entry(DirectoryEntry::new("ou=crews,ou=groups,o=sevenSeas").with_attribute("objectClass", ["organizationalUnit"]));
        directory.add_entry(
            DirectoryEntry::new(VICTORY_DN)
                .with_attribute("objectClass", ["groupOfNames"])
                .with_attribute("member", [HARDY_DN]),
        );
        directory.add_entry(
            DirectoryEntry::new(LYDIA_DN)
                .with_attribute("objectClass", ["groupOfUniqueNames"])
                .with_attribute("uniqueMember", [HORNBLOWER_DN, "cn=William Bush,ou=people,o=sevenSeas"]),
        );
        directory.add_entry(DirectoryEntry::new(SERVICE_DN).with_attribute("objectClass", ["person"]));
        directory.set_password(SERVICE_DN, SERVICE_PASSWORD);
        directory
    }

    pub fn add_user(&self, dn: &str, uid: &str, groups: &[&str]) {
        self.add_entry(
            DirectoryEntry::new(dn)
                .with_attribute("objectClass", ["person", "inetOrgPerson"])
                .with_attribute("uid", [uid])
                .with_attribute("memberOf", groups.iter().copied()),
        );
        self.set_password(dn, SEVEN_SEAS_PASSWORD);
    }

    pub fn add_entry(&self, entry: DirectoryEntry) {
        self.state.entries.lock().push(entry);
    }

    pub fn set_password(&self, dn: &str, password: &str) {
        self.state.passwords.lock().insert(normalize_dn(dn), password.to_string());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = Some(delay);
    }

    pub fn set_operation_delay(&self, delay: Duration) {
        *self.state.operation_delay.lock() = Some(delay);
    }

    /// Make every connect fail with the given reason
    pub fn set_unreachable(&self, reason: &str) {
        *self.state.unreachable.lock() = Some(reason.to_string());
    }

    pub fn set_failing_search(&self, failing: bool) {
        *self.state.failing_search.lock() = failing;
    }

    /// Endpoint count reported to `Directory`
    pub fn set_endpoints(&self, endpoints: usize) {
        self.state.endpoints.store(endpoints, Ordering::SeqCst);
    }

    pub fn connector(&self) -> Arc<dyn DirectoryConnector> {
        Arc::new(self.clone())
    }

    /// Bind attempts, successful or not
    pub fn binds(&self) -> usize {
        self.state.bind_log.lock().len()
    }

    pub fn binds_as(&self, dn: &str) -> usize {
        self.state.bind_log.lock().iter().filter(|bound| dn_equals(bound, dn)).count()
    }

    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn unbinds(&self) -> usize {
        self.state.unbinds.load(Ordering::SeqCst)
    }

    async fn operation_delay(&self) {
        let delay = *self.state.operation_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DirectoryConnector for InMemoryDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let unreachable = self.state.unreachable.lock().clone();
        if let Some(reason) = unreachable {
            return Err(DirectoryError::Connect {
                url: "ldap://..:12345".to_string(),
                reason,
            });
        }

        self.state.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConnection {
            directory: self.clone(),
        }))
    }

    fn endpoints(&self) -> usize {
        self.state.endpoints.load(Ordering::SeqCst).max(1)
    }
}

struct InMemoryConnection {
    directory: InMemoryDirectory,
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.directory.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DirectoryConnection for InMemoryConnection {
    async fn bind(&mut self, dn: &str, secret: &SecretString) -> Result<(), DirectoryError> {
        self.directory.state.bind_log.lock().push(dn.to_string());
        self.directory.operation_delay().await;

        let accepted = self
            .directory
            .state
            .passwords
            .lock()
            .get(&normalize_dn(dn))
            .is_some_and(|password| password == secret.expose_secret());

        if accepted {
            Ok(())
        } else {
            Err(DirectoryError::BindRejected {
                dn: dn.to_string(),
                rc: 49,
                message: "invalidCredentials".to_string(),
            })
        }
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.directory.operation_delay().await;

        if *self.directory.state.failing_search.lock() {
            return Err(DirectoryError::operation("search", "operationsError"));
        }

        let filter = Filter::parse(&request.filter)
            .ok_or_else(|| DirectoryError::operation("search", format!("bad filter {}", request.filter)))?;

        let entries = self.directory.state.entries.lock();
        if !request.base_dn.is_empty() && !entries.iter().any(|e| dn_equals(&e.dn, &request.base_dn)) {
            return Err(DirectoryError::operation("search", "noSuchObject"));
        }

        Ok(entries
            .iter()
            .filter(|entry| in_scope(&entry.dn, &request.base_dn, request.scope))
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.directory.state.unbinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let entry = normalize_dn(dn);
    let base = normalize_dn(base);
    match scope {
        SearchScope::Base => entry == base,
        SearchScope::OneLevel => normalize_dn(&parent_dn(dn)) == base,
        SearchScope::SubTree => {
            base.is_empty() || entry == base || entry.ends_with(&format!(",{}", base))
        }
    }
}

enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(input: &str) -> Option<Filter> {
        let (filter, rest) = parse_filter(input)?;
        rest.trim().is_empty().then_some(filter)
    }

    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(entry)),
            Filter::Or(items) => items.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || !entry.values(attr).is_empty()
            }
            Filter::Equal(attr, value) => entry.values(attr).iter().any(|v| dn_equals(v, value)),
        }
    }
}

fn parse_filter(input: &str) -> Option<(Filter, &str)> {
    let rest = input.trim_start().strip_prefix('(')?;
    match rest.chars().next()? {
        '&' => parse_list(&rest[1..]).map(|(items, rest)| (Filter::And(items), rest)),
        '|' => parse_list(&rest[1..]).map(|(items, rest)| (Filter::Or(items), rest)),
        '!' => {
            let (inner, rest) = parse_filter(&rest[1..])?;
            let rest = rest.trim_start().strip_prefix(')')?;
            Some((Filter::Not(Box::new(inner)), rest))
        }
        _ => {
            let end = rest.find(')')?;
            let (attr, value) = rest[..end].split_once('=')?;
            let filter = if value == "*" {
                Filter::Present(attr.trim().to_string())
            } else {
                Filter::Equal(attr.trim().to_string(), unescape_value(value))
            };
            Some((filter, &rest[end + 1..]))
        }
    }
}

fn parse_list(mut input: &str) -> Option<(Vec<Filter>, &str)> {
    let mut items = Vec::new();
    loop {
        let trimmed = input.trim_start();
        if let Some(rest) = trimmed.strip_prefix(')') {
            return Some((items, rest));
        }
        let (filter, rest) = parse_filter(trimmed)?;
        items.push(filter);
        input = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn search(directory: &InMemoryDirectory, base: &str, scope: SearchScope, filter: &str) -> Vec<String> {
        let mut connection = directory.connect().await.unwrap();
        connection
            .search(&SearchRequest::new(base, scope, filter))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.dn)
            .collect()
    }

    #[tokio::test]
    async fn test_scopes() {
        let directory = InMemoryDirectory::seven_seas();

        let base = search(&directory, "ou=crews,ou=groups,o=sevenSeas", SearchScope::Base, "(objectClass=*)").await;
        assert_eq!(base, vec!["ou=crews,ou=groups,o=sevenSeas"]);

        let one = search(&directory, "ou=groups,o=sevenSeas", SearchScope::OneLevel, "(objectClass=*)").await;
        assert_eq!(one, vec!["ou=crews,ou=groups,o=sevenSeas"]);

        let sub = search(&directory, "ou=groups,o=sevenSeas", SearchScope::SubTree, "(objectClass=groupOfNames)").await;
        assert_eq!(sub, vec![VICTORY_DN]);
    }

    #[tokio::test]
    async fn test_compound_filters() {
        let directory = InMemoryDirectory::seven_seas();
        let filter = format!(
            "(|(&(objectClass=groupOfNames)(member={0}))(&(objectClass=groupOfUniqueNames)(uniqueMember={0})))",
            HORNBLOWER_DN
        );
        assert_eq!(search(&directory, "", SearchScope::SubTree, &filter).await, vec![LYDIA_DN]);

        let smiths = search(&directory, "o=sevenSeas", SearchScope::SubTree, "(uid=smith)").await;
        assert_eq!(smiths.len(), 2);

        let not = search(&directory, "ou=people,o=sevenSeas", SearchScope::OneLevel, "(!(uid=smith))").await;
        assert_eq!(not.len(), 3);
    }
}
