//! Credential types

use secrecy::{ExposeSecret, SecretString};

/// A username and secret presented to a realm.
///
/// The secret is zeroized when the credential is dropped and is redacted from
/// `Debug` output.
#[derive(Debug)]
pub struct Credential {
    username: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<SecretString>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Whether the secret is empty; an empty secret must never reach a bind
    pub fn has_empty_secret(&self) -> bool {
        self.secret.expose_secret().is_empty()
    }
}
