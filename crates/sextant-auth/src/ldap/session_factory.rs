//! Bind strategy selection

use sextant_core::config::LdapRealmSettings;
use sextant_core::Credential;
use std::fmt;

use crate::error::{ConfigError, RealmResult};
use crate::ldap::directory::{Directory, LdapSession};
use crate::ldap::template::TemplateSessionFactory;
use crate::ldap::user_search::{ServiceAccount, UserSearchSessionFactory};

/// How a realm turns a credential into a bound session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStrategy {
    Template,
    UserSearch,
}

impl BindStrategy {
    /// Choose from the settings present. Exactly one of `user_dn_templates`
    /// and `user_search` must be configured.
    pub fn select(settings: &LdapRealmSettings) -> Result<Self, ConfigError> {
        let user_search = settings.setting_key("user_search.");
        let user_template = settings.setting_key("user_dn_templates");

        match (settings.has_user_search(), settings.has_user_templates()) {
            (true, true) => Err(ConfigError::ConflictingBindSettings {
                user_search,
                user_template,
            }),
            (false, false) => Err(ConfigError::MissingBindSettings {
                user_search,
                user_template,
            }),
            (true, false) => Ok(BindStrategy::UserSearch),
            (false, true) => Ok(BindStrategy::Template),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BindStrategy::Template => "template",
            BindStrategy::UserSearch => "user_search",
        }
    }
}

impl fmt::Display for BindStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum SessionFactory {
    Template(TemplateSessionFactory),
    UserSearch(UserSearchSessionFactory),
}

impl SessionFactory {
    pub fn from_settings(settings: &LdapRealmSettings, directory: Directory) -> Result<Self, ConfigError> {
        let factory = match BindStrategy::select(settings)? {
            BindStrategy::Template => SessionFactory::Template(TemplateSessionFactory::new(
                directory,
                settings.user_dn_templates.clone().unwrap_or_default(),
            )),
            BindStrategy::UserSearch => SessionFactory::UserSearch(UserSearchSessionFactory::new(
                directory,
                settings.user_search.clone().unwrap_or_default(),
                ServiceAccount {
                    bind_dn: settings.bind_dn.clone(),
                    bind_password: settings.bind_password.clone(),
                },
            )),
        };
        Ok(factory)
    }

    pub fn strategy(&self) -> BindStrategy {
        match self {
            SessionFactory::Template(_) => BindStrategy::Template,
            SessionFactory::UserSearch(_) => BindStrategy::UserSearch,
        }
    }

    /// Bind as the credential's user
    pub async fn session(&self, credential: &Credential) -> RealmResult<LdapSession> {
        match self {
            SessionFactory::Template(factory) => factory.session(credential).await,
            SessionFactory::UserSearch(factory) => factory.session(credential).await,
        }
    }

    pub async fn close(&self) {
        if let SessionFactory::UserSearch(factory) = self {
            factory.close().await;
        }
    }
}
