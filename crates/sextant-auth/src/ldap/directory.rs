//! Directory capability
//!
//! The realm never talks to a wire client directly. It goes through
//! [`DirectoryConnector`] / [`DirectoryConnection`], which the `ldap3` backed
//! [`LdapConnector`](crate::ldap::LdapConnector) implements in production.
//! [`Directory`] adds the connect and per-operation timeouts on top, and
//! [`DirectoryHandle`] owns one connection for the length of one attempt.

use async_trait::async_trait;
use secrecy::SecretString;
use sextant_core::config::{SearchScope, TimeoutSettings};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::DirectoryError;

/// An entry returned by a search
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Values of an attribute; attribute names compare case-insensitively
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }
}

/// Attribute list requesting no attributes at all (RFC 4511 section 4.5.1.8)
pub const NO_ATTRIBUTES: &str = "1.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new(base_dn: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            attributes: vec![NO_ATTRIBUTES.to_string()],
        }
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

/// Opens connections to a directory
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Connect to the first reachable endpoint, giving each one the connect
    /// timeout
    async fn connect(&self) -> Result<Box<dyn DirectoryConnection>, DirectoryError>;

    /// Number of endpoints `connect` may try
    fn endpoints(&self) -> usize {
        1
    }
}

/// One open directory connection, used by a single task at a time
///
/// Dropping a connection without calling [`unbind`](Self::unbind) must still
/// close the underlying transport.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind. A refusal by the server is [`DirectoryError::BindRejected`].
    async fn bind(&mut self, dn: &str, secret: &SecretString) -> Result<(), DirectoryError>;

    async fn search(&mut self, request: &SearchRequest) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    async fn unbind(&mut self) -> Result<(), DirectoryError>;
}

async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, DirectoryError>
where
    F: Future<Output = Result<T, DirectoryError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DirectoryError::Timeout { operation, timeout })?
}

/// A connector plus the timeouts every operation runs under
#[derive(Clone)]
pub struct Directory {
    connector: Arc<dyn DirectoryConnector>,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl Directory {
    pub fn new(connector: Arc<dyn DirectoryConnector>, timeouts: &TimeoutSettings) -> Self {
        Self {
            connector,
            connect_timeout: timeouts.connect(),
            operation_timeout: timeouts.operation(),
        }
    }

    /// Open a new, unbound connection. The connector may try every endpoint
    /// in turn, so the overall budget is one connect timeout per endpoint.
    pub async fn open(&self) -> Result<DirectoryHandle, DirectoryError> {
        let endpoints = u32::try_from(self.connector.endpoints().max(1)).unwrap_or(u32::MAX);
        let budget = self.connect_timeout.saturating_mul(endpoints);
        let connection = with_timeout("connect", budget, self.connector.connect()).await?;

        Ok(DirectoryHandle {
            connection,
            operation_timeout: self.operation_timeout,
        })
    }
}

/// Exclusive ownership of one connection
pub struct DirectoryHandle {
    connection: Box<dyn DirectoryConnection>,
    operation_timeout: Duration,
}

impl DirectoryHandle {
    pub async fn bind(&mut self, dn: &str, secret: &SecretString) -> Result<(), DirectoryError> {
        with_timeout(
            "bind",
            self.operation_timeout,
            self.connection.bind(dn, secret),
        )
        .await
    }

    pub async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        with_timeout(
            "search",
            self.operation_timeout,
            self.connection.search(request),
        )
        .await
    }

    /// Unbind and close. Failures are only logged: the connection is gone
    /// either way.
    pub async fn release(mut self) {
        if let Err(e) = with_timeout(
            "unbind",
            self.operation_timeout,
            self.connection.unbind(),
        )
        .await
        {
            debug!(error = %e, "Directory unbind failed");
        }
    }
}

/// A connection bound as an authenticated user
///
/// Produced only by a successful bind. The owner must [`close`](Self::close)
/// it once role resolution is done, whatever the outcome.
pub struct LdapSession {
    user_dn: String,
    handle: DirectoryHandle,
}

impl LdapSession {
    pub(crate) fn new(user_dn: String, handle: DirectoryHandle) -> Self {
        Self { user_dn, handle }
    }

    /// The DN the session is bound as
    pub fn user_dn(&self) -> &str {
        &self.user_dn
    }

    pub(crate) fn handle(&mut self) -> &mut DirectoryHandle {
        &mut self.handle
    }

    pub async fn close(self) {
        self.handle.release().await;
    }
}
