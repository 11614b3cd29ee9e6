//! Search for the user entry, then bind as it
//!
//! The search runs over service connections (bound as `bind_dn`, or anonymous)
//! that are pooled when `user_search.pool.enabled` is set. The user bind always
//! gets a fresh connection of its own.

use parking_lot::Mutex;
use secrecy::SecretString;
use sextant_core::config::{PoolSettings, UserSearchSettings};
use sextant_core::Credential;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};

use crate::error::{DirectoryError, RealmError, RealmResult};
use crate::ldap::directory::{Directory, DirectoryEntry, DirectoryHandle, LdapSession, SearchRequest};

/// Service account used for searches; `None` searches anonymously
#[derive(Clone, Default)]
pub struct ServiceAccount {
    pub bind_dn: Option<String>,
    pub bind_password: Option<SecretString>,
}

struct Pool {
    idle: Mutex<Vec<DirectoryHandle>>,
    permits: Semaphore,
}

/// Connections for the search phase
pub struct ServiceConnections {
    directory: Directory,
    account: ServiceAccount,
    pool: Option<Pool>,
    closed: AtomicBool,
}

/// One service connection, held for a single search sequence
pub struct ServiceLease<'a> {
    connections: &'a ServiceConnections,
    handle: Option<DirectoryHandle>,
    _permit: Option<SemaphorePermit<'a>>,
}

impl ServiceConnections {
    pub fn new(directory: Directory, account: ServiceAccount, pool: &PoolSettings) -> Self {
        Self {
            directory,
            account,
            pool: pool.enabled.then(|| Pool {
                idle: Mutex::new(Vec::new()),
                permits: Semaphore::new(pool.size),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn idle_connections(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.idle.lock().len())
    }

    pub async fn acquire(&self) -> Result<ServiceLease<'_>, DirectoryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DirectoryError::PoolClosed);
        }

        let (permit, reused) = match &self.pool {
            Some(pool) => {
                let permit = pool
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| DirectoryError::PoolClosed)?;
                let reused = pool.idle.lock().pop();
                (Some(permit), reused)
            }
            None => (None, None),
        };

        let handle = match reused {
            Some(handle) => handle,
            None => self.open_bound().await?,
        };

        Ok(ServiceLease {
            connections: self,
            handle: Some(handle),
            _permit: permit,
        })
    }

    async fn open_bound(&self) -> Result<DirectoryHandle, DirectoryError> {
        let mut handle = self.directory.open().await?;

        if let Some(dn) = &self.account.bind_dn {
            let password = self
                .account
                .bind_password
                .clone()
                .unwrap_or_else(|| SecretString::from(""));

            if let Err(e) = handle.bind(dn, &password).await {
                handle.release().await;
                // A refused service bind is a configuration fault, not a user's bad password
                return Err(match e {
                    DirectoryError::BindRejected { dn, rc, message } => DirectoryError::operation(
                        "service bind",
                        format!("bind as [{}] rejected with result code {}: {}", dn, rc, message),
                    ),
                    other => other,
                });
            }
        }

        Ok(handle)
    }

    /// Release idle connections and refuse further leases
    pub async fn close(&self) {
        let Some(pool) = &self.pool else {
            self.closed.store(true, Ordering::Release);
            return;
        };

        // `finish` reads the flag under the same lock
        let idle = {
            let mut idle = pool.idle.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *idle)
        };

        pool.permits.close();
        let count = idle.len();
        for handle in idle {
            handle.release().await;
        }
        info!(released = count, "Closed user search connection pool");
    }
}

impl ServiceLease<'_> {
    pub fn handle(&mut self) -> Option<&mut DirectoryHandle> {
        self.handle.as_mut()
    }

    pub async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let handle = self.handle.as_mut().ok_or(DirectoryError::PoolClosed)?;
        handle.search(request).await
    }

    /// Give the connection back. Connections that saw an error are closed
    /// rather than reused.
    pub async fn finish(mut self, healthy: bool) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let rejected = match &self.connections.pool {
            Some(pool) if healthy => {
                let mut idle = pool.idle.lock();
                if self.connections.closed.load(Ordering::Acquire) {
                    Some(handle)
                } else {
                    idle.push(handle);
                    None
                }
            }
            _ => Some(handle),
        };

        if let Some(handle) = rejected {
            handle.release().await;
        }
    }
}

/// Search-then-bind
pub struct UserSearchSessionFactory {
    directory: Directory,
    settings: UserSearchSettings,
    connections: ServiceConnections,
}

impl UserSearchSessionFactory {
    pub fn new(directory: Directory, settings: UserSearchSettings, account: ServiceAccount) -> Self {
        let connections = ServiceConnections::new(directory.clone(), account, &settings.pool);
        Self {
            directory,
            settings,
            connections,
        }
    }

    pub fn connections(&self) -> &ServiceConnections {
        &self.connections
    }

    fn user_filter(&self, username: &str) -> String {
        self.settings.filter.replace("{0}", &ldap3::ldap_escape(username))
    }

    /// Find the single entry matching `username` over the given lease
    pub async fn find_user_dn(&self, lease: &mut ServiceLease<'_>, username: &str) -> RealmResult<String> {
        let request = SearchRequest::new(
            self.settings.base_dn.clone(),
            self.settings.scope,
            self.user_filter(username),
        );

        let mut entries = lease.search(&request).await?;
        match entries.len() {
            0 => Err(RealmError::UserNotFound(username.to_string())),
            1 => Ok(entries.remove(0).dn),
            count => Err(RealmError::AmbiguousUser {
                username: username.to_string(),
                count,
            }),
        }
    }

    async fn search_user_dn(&self, username: &str) -> RealmResult<String> {
        let mut lease = self.connections.acquire().await?;
        let result = self.find_user_dn(&mut lease, username).await;
        let healthy = !matches!(result, Err(RealmError::Directory(_)));
        lease.finish(healthy).await;
        result
    }

    pub async fn session(&self, credential: &Credential) -> RealmResult<LdapSession> {
        let username = credential.username();
        if credential.has_empty_secret() {
            return Err(RealmError::InvalidCredentials(username.to_string()));
        }

        let dn = self.search_user_dn(username).await?;
        debug!(username, dn = %dn, "Found user entry");

        let mut handle = self.directory.open().await?;
        match handle.bind(&dn, credential.secret()).await {
            Ok(()) => Ok(LdapSession::new(dn, handle)),
            Err(e) => {
                handle.release().await;
                if e.is_bind_rejected() {
                    debug!(dn = %dn, error = %e, "User bind rejected");
                    Err(RealmError::InvalidCredentials(username.to_string()))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    pub async fn close(&self) {
        self.connections.close().await;
    }
}
