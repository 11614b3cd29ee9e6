//! Bind with a DN built from a template

use sextant_core::Credential;
use tracing::debug;

use crate::error::{RealmError, RealmResult};
use crate::ldap::directory::{Directory, LdapSession};

const USERNAME_PLACEHOLDER: &str = "{0}";

/// Tries each configured template in order; the first accepted bind wins
pub struct TemplateSessionFactory {
    directory: Directory,
    templates: Vec<String>,
}

impl TemplateSessionFactory {
    pub fn new(directory: Directory, templates: Vec<String>) -> Self {
        Self {
            directory,
            templates,
        }
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    /// The candidate DN for `username`, with DN special characters escaped
    pub fn user_dn(template: &str, username: &str) -> String {
        template.replace(USERNAME_PLACEHOLDER, &ldap3::dn_escape(username))
    }

    pub async fn session(&self, credential: &Credential) -> RealmResult<LdapSession> {
        let username = credential.username();
        if credential.has_empty_secret() {
            return Err(RealmError::InvalidCredentials(username.to_string()));
        }

        for template in &self.templates {
            let dn = Self::user_dn(template, username);
            let mut handle = self.directory.open().await?;

            match handle.bind(&dn, credential.secret()).await {
                Ok(()) => {
                    debug!(dn = %dn, "Bound with user template");
                    return Ok(LdapSession::new(dn, handle));
                }
                Err(e) if e.is_bind_rejected() => {
                    debug!(dn = %dn, error = %e, "Template bind rejected");
                    handle.release().await;
                }
                Err(e) => {
                    handle.release().await;
                    return Err(e.into());
                }
            }
        }

        Err(RealmError::InvalidCredentials(username.to_string()))
    }
}
