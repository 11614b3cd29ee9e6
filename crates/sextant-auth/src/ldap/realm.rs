//! The LDAP realm
//!
//! `authenticate` never fails: every error is folded into an unsuccessful
//! [`AuthenticationResult`] so the next realm in the chain can try. Only
//! construction returns errors.

use parking_lot::Mutex;
use sextant_core::config::LdapRealmSettings;
use sextant_core::{AuthenticationResult, Credential, User};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::AuthenticationCache;
use crate::error::{ConfigError, DirectoryError, RealmError, RealmResult};
use crate::ldap::client::LdapConnector;
use crate::ldap::directory::{Directory, DirectoryConnector};
use crate::ldap::groups::GroupResolver;
use crate::ldap::roles::RoleResolver;
use crate::ldap::session_factory::{BindStrategy, SessionFactory};
use crate::ldap::types::RealmUsageStats;
use crate::ldap::user_search::{ServiceLease, UserSearchSessionFactory};
use crate::roles::{DnRoleMapper, RoleMappingWatcher};

/// Message of every unsuccessful result
pub const AUTHENTICATE_FAILED: &str = "authenticate failed";

/// Drops cached results once the role mapping has moved on
struct RoleMappingSubscription {
    mapper: Arc<DnRoleMapper>,
    cache: Arc<AuthenticationCache>,
    applied: AtomicU64,
}

impl RoleMappingSubscription {
    fn catch_up(&self) {
        let current = self.mapper.generation();
        if self.applied.swap(current, Ordering::AcqRel) != current {
            debug!(generation = current, "Role mapping refreshed, clearing authentication cache");
            self.cache.invalidate_all();
        }
    }
}

pub struct LdapRealm {
    settings: LdapRealmSettings,
    session_factory: SessionFactory,
    roles: RoleResolver,
    cache: Arc<AuthenticationCache>,
    subscription: Arc<RoleMappingSubscription>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<RoleMappingWatcher>>,
}

impl LdapRealm {
    /// Build a realm over any directory connector
    pub fn new(
        settings: LdapRealmSettings,
        connector: Arc<dyn DirectoryConnector>,
        mapper: Arc<DnRoleMapper>,
    ) -> Result<Self, ConfigError> {
        let directory = Directory::new(connector, &settings.timeout);
        let session_factory = SessionFactory::from_settings(&settings, directory)?;
        settings.validate()?;

        let cache = Arc::new(AuthenticationCache::new(&settings.cache));
        let subscription = Arc::new(RoleMappingSubscription {
            mapper: mapper.clone(),
            cache: cache.clone(),
            applied: AtomicU64::new(mapper.generation()),
        });
        let refresh_task = spawn_refresh_listener(&subscription);

        let roles = RoleResolver::new(
            GroupResolver::from_settings(&settings),
            settings.group_role_name.clone(),
            mapper,
        );

        info!(
            realm = %settings.name,
            strategy = %session_factory.strategy(),
            cache = cache.enabled(),
            "Initialized LDAP realm"
        );

        Ok(Self {
            settings,
            session_factory,
            roles,
            cache,
            subscription,
            refresh_task: Mutex::new(refresh_task),
            watcher: Mutex::new(None),
        })
    }

    /// Build a realm talking to the configured directory servers, watching
    /// its role mapping file when a runtime is available
    pub fn from_settings(settings: LdapRealmSettings) -> Result<Self, ConfigError> {
        let connector = Arc::new(LdapConnector::new(&settings));
        let mapper = Arc::new(DnRoleMapper::from_settings(&settings));
        let realm = Self::new(settings, connector, mapper)?;
        realm.watch_role_mapping()?;
        Ok(realm)
    }

    /// Start watching the role mapping file, if there is one
    pub fn watch_role_mapping(&self) -> Result<(), ConfigError> {
        let watcher = self.roles.mapper().watch()?;
        *self.watcher.lock() = watcher;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn order(&self) -> i32 {
        self.settings.order
    }

    pub fn settings(&self) -> &LdapRealmSettings {
        &self.settings
    }

    pub fn strategy(&self) -> BindStrategy {
        self.session_factory.strategy()
    }

    pub fn role_mapper(&self) -> &Arc<DnRoleMapper> {
        self.roles.mapper()
    }

    pub async fn authenticate(&self, credential: &Credential) -> AuthenticationResult {
        self.subscription.catch_up();
        self.cache
            .get_or_populate(credential, || self.authenticate_uncached(credential))
            .await
    }

    async fn authenticate_uncached(&self, credential: &Credential) -> AuthenticationResult {
        let username = credential.username();

        match self.bind_and_resolve(credential).await {
            Ok(user) => {
                debug!(realm = %self.name(), username, roles = ?user.roles(), "Authenticated user");
                AuthenticationResult::success(user)
            }
            Err(e) if e.is_credential_failure() => {
                debug!(realm = %self.name(), username, error = %e, "Authentication failed");
                AuthenticationResult::unsuccessful(AUTHENTICATE_FAILED, e)
            }
            Err(e) => {
                warn!(realm = %self.name(), username, error = %e, "Authentication failed on directory error");
                AuthenticationResult::unsuccessful(AUTHENTICATE_FAILED, e)
            }
        }
    }

    async fn bind_and_resolve(&self, credential: &Credential) -> RealmResult<User> {
        let mut session = self.session_factory.session(credential).await?;
        let user_dn = session.user_dn().to_string();

        let user = self
            .roles
            .resolve(session.handle(), credential.username(), &user_dn)
            .await;
        session.close().await;

        Ok(user?)
    }

    /// Resolve a user and its roles without its secret. Needs the user
    /// search strategy; the lookup runs over the service account.
    pub async fn lookup_user(&self, username: &str) -> RealmResult<Option<User>> {
        let SessionFactory::UserSearch(factory) = &self.session_factory else {
            return Err(RealmError::LookupUnsupported);
        };

        let mut lease = factory.connections().acquire().await?;
        let result = self.lookup_over(factory, &mut lease, username).await;
        lease
            .finish(!matches!(result, Err(RealmError::Directory(_))))
            .await;
        result
    }

    async fn lookup_over(
        &self,
        factory: &UserSearchSessionFactory,
        lease: &mut ServiceLease<'_>,
        username: &str,
    ) -> RealmResult<Option<User>> {
        let user_dn = match factory.find_user_dn(lease, username).await {
            Ok(dn) => dn,
            Err(RealmError::UserNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let handle = lease.handle().ok_or(DirectoryError::PoolClosed)?;
        let user = self.roles.resolve(handle, username, &user_dn).await?;
        Ok(Some(user))
    }

    pub fn usage_stats(&self) -> RealmUsageStats {
        RealmUsageStats {
            name: self.settings.name.clone(),
            order: self.settings.order,
            size: self.cache.len(),
            ssl: self.settings.uses_tls(),
            user_search: self.settings.has_user_search(),
            load_balance_type: self.settings.load_balance.as_str(),
        }
    }

    /// Forget cached results for one user
    pub fn expire(&self, username: &str) {
        self.cache.expire(username);
    }

    pub fn expire_all(&self) {
        self.cache.invalidate_all();
    }

    /// Release pooled connections and stop following role mapping changes
    pub async fn close(&self) {
        self.session_factory.close().await;
        self.watcher.lock().take();
        if let Some(task) = self.refresh_task.lock().take() {
            task.abort();
        }
        info!(realm = %self.name(), "Closed LDAP realm");
    }
}

impl Drop for LdapRealm {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Invalidate promptly on refresh; `authenticate` also catches up itself,
/// so this is best effort and skipped outside a runtime
fn spawn_refresh_listener(subscription: &Arc<RoleMappingSubscription>) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let mut rx = subscription.mapper.subscribe();
    let subscription = Arc::downgrade(subscription);

    Some(runtime.spawn(async move {
        while rx.changed().await.is_ok() {
            let Some(subscription) = subscription.upgrade() else {
                break;
            };
            subscription.catch_up();
        }
    }))
}
