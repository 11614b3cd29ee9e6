//! ldap3 directory connector
//!
//! Opens LDAP, LDAPS and STARTTLS connections to the realm's URLs, falling
//! through to the next URL when a server cannot be reached.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};
use sextant_core::config::{LdapRealmSettings, LoadBalanceType, SearchScope, VerificationMode};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::DirectoryError;
use crate::ldap::directory::{DirectoryConnection, DirectoryConnector, DirectoryEntry, SearchRequest};

/// Result codes meaning the server refused the presented credentials
const REJECTED_BIND_CODES: [u32; 4] = [
    48, // inappropriateAuthentication
    49, // invalidCredentials
    50, // insufficientAccessRights
    53, // unwillingToPerform
];

/// Production connector backed by `ldap3`
pub struct LdapConnector {
    urls: Vec<String>,
    load_balance: LoadBalanceType,
    start_tls: bool,
    no_tls_verify: bool,
    connect_timeout: Duration,
    next: AtomicUsize,
}

impl LdapConnector {
    pub fn new(settings: &LdapRealmSettings) -> Self {
        Self {
            urls: settings.urls.clone(),
            load_balance: settings.load_balance,
            start_tls: settings.start_tls,
            // rustls has no chain-only mode; `certificate` verifies fully
            no_tls_verify: settings.ssl.verification_mode == VerificationMode::None,
            connect_timeout: settings.timeout.connect(),
            next: AtomicUsize::new(0),
        }
    }

    fn connection_settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_starttls(self.start_tls)
            .set_no_tls_verify(self.no_tls_verify)
    }

    /// URLs in the order the next connection attempt should try them
    fn candidates(&self) -> Vec<&str> {
        if self.urls.is_empty() {
            return Vec::new();
        }

        let start = match self.load_balance {
            LoadBalanceType::Failover => 0,
            LoadBalanceType::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % self.urls.len(),
        };

        self.urls
            .iter()
            .cycle()
            .skip(start)
            .take(self.urls.len())
            .map(String::as_str)
            .collect()
    }
}

/// Try each URL in turn, giving every attempt its own `timeout`, and return
/// the first connection established
async fn connect_any<'a, T, F, Fut>(
    urls: Vec<&'a str>,
    timeout: Duration,
    mut connect: F,
) -> Result<T, DirectoryError>
where
    F: FnMut(&'a str) -> Fut,
    Fut: Future<Output = Result<T, DirectoryError>>,
{
    let mut last_error = None;

    for url in urls {
        let error = match tokio::time::timeout(timeout, connect(url)).await {
            Ok(Ok(connection)) => {
                debug!(url, "Connected to directory server");
                return Ok(connection);
            }
            Ok(Err(e)) => e,
            Err(_) => DirectoryError::Connect {
                url: url.to_string(),
                reason: format!("timed out after {:?}", timeout),
            },
        };
        warn!(url, error = %error, "Failed to connect to directory server");
        last_error = Some(error);
    }

    Err(last_error.unwrap_or_else(|| DirectoryError::Connect {
        url: String::new(),
        reason: "no directory URLs configured".to_string(),
    }))
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        connect_any(self.candidates(), self.connect_timeout, |url| async move {
            let (conn, ldap) = LdapConnAsync::with_settings(self.connection_settings(), url)
                .await
                .map_err(|e| DirectoryError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            let driver = tokio::spawn(async move {
                if let Err(e) = conn.drive().await {
                    warn!(error = %e, "LDAP connection terminated");
                }
            });
            Ok::<_, DirectoryError>(Box::new(Ldap3Connection { ldap, driver }) as Box<dyn DirectoryConnection>)
        })
        .await
    }

    fn endpoints(&self) -> usize {
        self.urls.len()
    }
}

struct Ldap3Connection {
    ldap: Ldap,
    driver: JoinHandle<()>,
}

impl Drop for Ldap3Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::SubTree => Scope::Subtree,
    }
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn bind(&mut self, dn: &str, secret: &SecretString) -> Result<(), DirectoryError> {
        let result = self
            .ldap
            .simple_bind(dn, secret.expose_secret())
            .await
            .map_err(|e| DirectoryError::operation("bind", e))?;

        match result.rc {
            0 => Ok(()),
            rc if REJECTED_BIND_CODES.contains(&rc) => Err(DirectoryError::BindRejected {
                dn: dn.to_string(),
                rc,
                message: result.text,
            }),
            rc => Err(DirectoryError::operation(
                "bind",
                format!("result code {}: {}", rc, result.text),
            )),
        }
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let attrs: Vec<&str> = request.attributes.iter().map(String::as_str).collect();

        let (entries, _res) = self
            .ldap
            .search(&request.base_dn, scope(request.scope), &request.filter, attrs)
            .await
            .map_err(|e| DirectoryError::operation("search", e))?
            .success()
            .map_err(|e| DirectoryError::operation("search", e))?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs.into_iter().collect(),
            })
            .collect())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| DirectoryError::operation("unbind", e))
    }
}
