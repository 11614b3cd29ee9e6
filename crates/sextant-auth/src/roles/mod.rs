//! Static DN to role mapping
//!
//! The mapping file is YAML, role name to a list of user or group DNs:
//!
//! ```yaml
//! avenger:
//!   - "cn=Horatio Hornblower,ou=people,o=sevenSeas"
//! captains:
//!   - "cn=HMS Victory,ou=crews,ou=groups,o=sevenSeas"
//! ```
//!
//! [`DnRoleMapper`] publishes the parsed file as an immutable snapshot and
//! swaps in a new one whenever the file changes. Every swap bumps a generation
//! counter that subscribers use to drop state derived from the old snapshot.

use arc_swap::ArcSwap;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sextant_core::config::LdapRealmSettings;
use sextant_core::utils::normalize_dn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, RoleMappingError};

/// One parsed mapping file, keyed by normalized DN
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMapping {
    by_dn: HashMap<String, Vec<String>>,
}

impl RoleMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let mut mapping = Self::default();

        let serde_yaml::Value::Mapping(roles) = value else {
            // an empty file parses as null
            return Ok(mapping);
        };

        for (role, dns) in roles {
            let role: String = serde_yaml::from_value(role)?;
            let dns: Vec<String> = match dns {
                serde_yaml::Value::Null => Vec::new(),
                other => serde_yaml::from_value(other)?,
            };
            for dn in dns {
                mapping.add(&dn, &role);
            }
        }

        Ok(mapping)
    }

    pub fn load(path: &Path) -> Result<Self, RoleMappingError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(RoleMappingError::Missing { path: display });
        }

        let content = std::fs::read_to_string(path).map_err(|source| RoleMappingError::Read {
            path: display.clone(),
            source,
        })?;

        Self::parse(&content).map_err(|source| RoleMappingError::Parse {
            path: display,
            source,
        })
    }

    fn add(&mut self, dn: &str, role: &str) {
        let roles = self.by_dn.entry(normalize_dn(dn)).or_default();
        if !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
    }

    /// Roles mapped to `dn`, compared case-insensitively
    pub fn roles_for(&self, dn: &str) -> &[String] {
        self.by_dn
            .get(&normalize_dn(dn))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Union of the roles of every DN, in DN order and without duplicates
    pub fn resolve<'a, I>(&self, dns: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut roles: Vec<String> = Vec::new();
        for dn in dns {
            for role in self.roles_for(dn) {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }
        roles
    }

    /// Number of distinct DNs
    pub fn len(&self) -> usize {
        self.by_dn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dn.is_empty()
    }
}

/// Current role mapping of a realm plus its refresh notifications
pub struct DnRoleMapper {
    path: Option<PathBuf>,
    mapping: ArcSwap<RoleMapping>,
    generation: watch::Sender<u64>,
}

impl DnRoleMapper {
    /// A mapper without a file; only explicit refreshes change its generation
    pub fn empty() -> Self {
        Self::with_mapping(None, RoleMapping::empty())
    }

    /// Load `path`. A missing or unparsable file yields an empty mapping.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mapping = load_lenient(&path);
        Self::with_mapping(Some(path), mapping)
    }

    pub fn from_settings(settings: &LdapRealmSettings) -> Self {
        match &settings.role_mapping_file {
            Some(path) => Self::new(path.clone()),
            None => Self::empty(),
        }
    }

    fn with_mapping(path: Option<PathBuf>, mapping: RoleMapping) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            path,
            mapping: ArcSwap::from_pointee(mapping),
            generation,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<RoleMapping> {
        self.mapping.load_full()
    }

    /// Mapped roles of the user DN, then of each group DN
    pub fn resolve_roles(&self, user_dn: &str, group_dns: &[String]) -> Vec<String> {
        let mapping = self.mapping.load();
        mapping.resolve(std::iter::once(user_dn).chain(group_dns.iter().map(String::as_str)))
    }

    /// Re-read the file and publish the new snapshot
    pub fn reload(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let mapping = load_lenient(path);
        info!(
            path = %path.display(),
            dns = mapping.len(),
            "Reloaded role mapping"
        );
        self.mapping.store(Arc::new(mapping));
        self.notify_refresh();
    }

    /// Tell subscribers that roles may have changed
    pub fn notify_refresh(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Reload whenever the mapping file changes, until the returned guard is
    /// dropped. Returns `None` without a file or outside a tokio runtime.
    pub fn watch(self: &Arc<Self>) -> Result<Option<RoleMappingWatcher>, ConfigError> {
        let Some(path) = self.path.clone() else {
            return Ok(None);
        };

        if tokio::runtime::Handle::try_current().is_err() {
            warn!(path = %path.display(), "No runtime available, role mapping file will not be watched");
            return Ok(None);
        }

        let watch_error = |source| ConfigError::Watch {
            path: path.display().to_string(),
            source,
        };

        let file_name = path.file_name().map(|name| name.to_os_string());
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(event)
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) =>
                {
                    // Watch the directory so editors that replace the file are seen
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref())
                    {
                        let _ = tx.send(());
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Role mapping watch error"),
            }
        })
        .map_err(watch_error)?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        let mapper = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // one reload per burst of events
                while rx.try_recv().is_ok() {}

                let Some(mapper) = mapper.upgrade() else {
                    break;
                };
                mapper.reload();
            }
        });

        debug!(path = %path.display(), "Watching role mapping file");
        Ok(Some(RoleMappingWatcher {
            _watcher: watcher,
            task,
        }))
    }
}

fn load_lenient(path: &Path) -> RoleMapping {
    match RoleMapping::load(path) {
        Ok(mapping) => mapping,
        Err(e @ RoleMappingError::Missing { .. }) => {
            warn!(error = %e, "Role mapping file not found, no DNs are mapped");
            RoleMapping::empty()
        }
        Err(e) => {
            error!(error = %e, "Failed to load role mapping, no DNs are mapped");
            RoleMapping::empty()
        }
    }
}

/// Keeps a role mapping file watched; dropping it stops the watch
pub struct RoleMappingWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for RoleMappingWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
